//! Scalar expression IR: a small algebraic DAG over typed scalars.
//!
//! Kernels are built by composing these expressions over the special
//! induction variables `gidx` (output linear index) and `ridx` (reduction
//! index), then simplified and handed to a backend for compilation. The
//! same nodes double as the constant folder and the CPU executor.

use crate::{DType, Error, Result};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// A literal scalar value.
///
/// `Float16` constants are carried widened as `F32`; the owning node's
/// declared dtype governs.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Literal {
    /// 32-bit float (also backs float16 constants)
    F32(f32),
    /// 32-bit signed integer
    I32(i32),
    /// 32-bit unsigned integer
    U32(u32),
    /// Boolean
    Bool(bool),
}

impl Literal {
    /// The natural dtype of this literal.
    pub fn dtype(self) -> DType {
        match self {
            Literal::F32(_) => DType::Float32,
            Literal::I32(_) => DType::Int32,
            Literal::U32(_) => DType::Uint32,
            Literal::Bool(_) => DType::Bool,
        }
    }

    /// The additive identity for a dtype.
    pub fn zero(dtype: DType) -> Literal {
        match dtype {
            DType::Float32 | DType::Float16 => Literal::F32(0.0),
            DType::Int32 => Literal::I32(0),
            DType::Uint32 => Literal::U32(0),
            DType::Bool => Literal::Bool(false),
        }
    }

    /// The multiplicative identity for a dtype.
    pub fn one(dtype: DType) -> Literal {
        match dtype {
            DType::Float32 | DType::Float16 => Literal::F32(1.0),
            DType::Int32 => Literal::I32(1),
            DType::Uint32 => Literal::U32(1),
            DType::Bool => Literal::Bool(true),
        }
    }

    /// Reinterpret as a storage word.
    pub fn to_bits(self) -> u32 {
        match self {
            Literal::F32(v) => v.to_bits(),
            Literal::I32(v) => v as u32,
            Literal::U32(v) => v,
            Literal::Bool(v) => v as u32,
        }
    }

    /// Reinterpret a storage word as a literal of the given dtype.
    pub fn from_bits(bits: u32, dtype: DType) -> Literal {
        match dtype {
            DType::Float32 | DType::Float16 => Literal::F32(f32::from_bits(bits)),
            DType::Int32 => Literal::I32(bits as i32),
            DType::Uint32 => Literal::U32(bits),
            DType::Bool => Literal::Bool(bits != 0),
        }
    }

    /// Convert to f32, for host-side consumption.
    pub fn as_f32(self) -> f32 {
        match self {
            Literal::F32(v) => v,
            Literal::I32(v) => v as f32,
            Literal::U32(v) => v as f32,
            Literal::Bool(v) => v as u32 as f32,
        }
    }

    /// Convert to i64 (index arithmetic).
    pub fn as_i64(self) -> i64 {
        match self {
            Literal::F32(v) => v as i64,
            Literal::I32(v) => v as i64,
            Literal::U32(v) => v as i64,
            Literal::Bool(v) => v as i64,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Literal::F32(v) => v == 0.0,
            Literal::I32(v) => v == 0,
            Literal::U32(v) => v == 0,
            Literal::Bool(v) => !v,
        }
    }

    fn is_one(self) -> bool {
        match self {
            Literal::F32(v) => v == 1.0,
            Literal::I32(v) => v == 1,
            Literal::U32(v) => v == 1,
            Literal::Bool(v) => v,
        }
    }

    fn is_neg_one(self) -> bool {
        match self {
            Literal::F32(v) => v == -1.0,
            Literal::I32(v) => v == -1,
            _ => false,
        }
    }

    /// True when this literal can represent values of `dtype`.
    fn matches(self, dtype: DType) -> bool {
        match self {
            Literal::F32(_) => dtype.is_float(),
            Literal::I32(_) => dtype == DType::Int32,
            Literal::U32(_) => dtype == DType::Uint32,
            Literal::Bool(_) => dtype == DType::Bool,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::F32(v) => write!(f, "{:?}", v),
            Literal::I32(v) => write!(f, "{}", v),
            Literal::U32(v) => write!(f, "{}u", v),
            Literal::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Node kind of a scalar expression.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExprOp {
    /// Binary add (boolean OR)
    Add,
    /// Binary subtract
    Sub,
    /// Binary multiply (boolean AND)
    Mul,
    /// Integer floor division
    Idiv,
    /// Complement of floor division
    Mod,
    /// Less-than comparison (boolean result)
    Cmplt,
    /// Not-equal comparison (boolean result)
    Cmpne,
    /// Sine (float)
    Sin,
    /// Cosine (float)
    Cos,
    /// Multiplicative inverse (float)
    Recip,
    /// Ternary select: `where(cond, a, b)`
    Where,
    /// Literal constant
    Const,
    /// Symbolic free variable, bounded by its `n`
    Special,
    /// Read of buffer `gid` at a computed linear index
    GlobalIndex,
}

/// Payload carried by `Const`, `Special`, and `GlobalIndex` nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprArg {
    /// No payload
    None,
    /// Literal for a `Const` node
    Lit(Literal),
    /// Name and exclusive upper bound of a `Special` variable
    Var(&'static str, usize),
    /// Buffer number of a `GlobalIndex`
    Gid(usize),
}

#[derive(Debug)]
struct ExprNode {
    op: ExprOp,
    dtype: DType,
    src: Vec<ScalarExpr>,
    arg: ExprArg,
    /// True when the subtree contains a Special or GlobalIndex.
    free: bool,
}

/// An immutable scalar expression DAG node, cheap to clone and shared
/// structurally.
#[derive(Debug, Clone)]
pub struct ScalarExpr(Arc<ExprNode>);

impl ScalarExpr {
    fn node(op: ExprOp, dtype: DType, src: Vec<ScalarExpr>, arg: ExprArg) -> Self {
        let free = matches!(op, ExprOp::Special | ExprOp::GlobalIndex)
            || src.iter().any(|s| s.0.free);
        ScalarExpr(Arc::new(ExprNode {
            op,
            dtype,
            src,
            arg,
            free,
        }))
    }

    /// Build a constant from a literal (dtype is the literal's own).
    pub fn constant(lit: Literal) -> Self {
        Self::node(ExprOp::Const, lit.dtype(), vec![], ExprArg::Lit(lit))
    }

    /// Build a constant of an explicit dtype (used for float16).
    pub fn const_of(lit: Literal, dtype: DType) -> Self {
        debug_assert!(lit.matches(dtype), "literal {} does not fit {}", lit, dtype);
        Self::node(ExprOp::Const, dtype, vec![], ExprArg::Lit(lit))
    }

    /// f32 constant.
    pub fn f32(v: f32) -> Self {
        Self::constant(Literal::F32(v))
    }

    /// i32 constant.
    pub fn i32(v: i32) -> Self {
        Self::constant(Literal::I32(v))
    }

    /// The zero of a dtype.
    pub fn zero(dtype: DType) -> Self {
        Self::const_of(Literal::zero(dtype), dtype)
    }

    /// A symbolic free variable with the given name and exclusive bound.
    ///
    /// Specials are always Int32-typed except the reduction accumulator
    /// variables, built via [`ScalarExpr::acc`] / [`ScalarExpr::val`].
    pub fn special(name: &'static str, n: usize) -> Self {
        Self::node(ExprOp::Special, DType::Int32, vec![], ExprArg::Var(name, n))
    }

    /// The kernel output linear index, in `[0, n)`.
    pub fn gidx(n: usize) -> Self {
        Self::special("gidx", n)
    }

    /// The reduction loop index, in `[0, n)`.
    pub fn ridx(n: usize) -> Self {
        Self::special("ridx", n)
    }

    /// The reduction accumulator, used inside a combine expression.
    pub fn acc(dtype: DType) -> Self {
        Self::node(ExprOp::Special, dtype, vec![], ExprArg::Var("acc", 0))
    }

    /// The incoming value of a reduction combine expression.
    pub fn val(dtype: DType) -> Self {
        Self::node(ExprOp::Special, dtype, vec![], ExprArg::Var("val", 0))
    }

    /// Read buffer `gid` at the linear index computed by `index`.
    pub fn global(gid: usize, index: ScalarExpr, dtype: DType) -> Self {
        debug_assert_eq!(index.dtype(), DType::Int32, "index must be int32");
        Self::node(ExprOp::GlobalIndex, dtype, vec![index], ExprArg::Gid(gid))
    }

    fn binary(op: ExprOp, a: &ScalarExpr, b: &ScalarExpr, dtype: DType) -> Self {
        debug_assert_eq!(a.dtype(), b.dtype(), "{:?} operands must agree", op);
        Self::node(op, dtype, vec![a.clone(), b.clone()], ExprArg::None)
    }

    /// Addition; boolean OR for bool operands.
    pub fn add(&self, other: &ScalarExpr) -> Self {
        Self::binary(ExprOp::Add, self, other, self.dtype())
    }

    /// Subtraction (not defined for bool).
    pub fn sub(&self, other: &ScalarExpr) -> Self {
        debug_assert_ne!(self.dtype(), DType::Bool, "sub on bool");
        Self::binary(ExprOp::Sub, self, other, self.dtype())
    }

    /// Multiplication; boolean AND for bool operands.
    pub fn mul(&self, other: &ScalarExpr) -> Self {
        Self::binary(ExprOp::Mul, self, other, self.dtype())
    }

    /// Integer floor division (toward negative infinity).
    pub fn idiv(&self, other: &ScalarExpr) -> Self {
        debug_assert!(self.dtype().is_int(), "idiv on {}", self.dtype());
        Self::binary(ExprOp::Idiv, self, other, self.dtype())
    }

    /// Complement of floor division: `a - idiv(a, b) * b`.
    pub fn modulo(&self, other: &ScalarExpr) -> Self {
        debug_assert!(self.dtype().is_int(), "mod on {}", self.dtype());
        Self::binary(ExprOp::Mod, self, other, self.dtype())
    }

    /// Less-than; boolean result.
    pub fn cmplt(&self, other: &ScalarExpr) -> Self {
        Self::binary(ExprOp::Cmplt, self, other, DType::Bool)
    }

    /// Not-equal; boolean result.
    pub fn cmpne(&self, other: &ScalarExpr) -> Self {
        Self::binary(ExprOp::Cmpne, self, other, DType::Bool)
    }

    /// Sine (float operand).
    pub fn sin(&self) -> Self {
        debug_assert!(self.dtype().is_float(), "sin on {}", self.dtype());
        Self::node(ExprOp::Sin, self.dtype(), vec![self.clone()], ExprArg::None)
    }

    /// Cosine (float operand).
    pub fn cos(&self) -> Self {
        debug_assert!(self.dtype().is_float(), "cos on {}", self.dtype());
        Self::node(ExprOp::Cos, self.dtype(), vec![self.clone()], ExprArg::None)
    }

    /// Multiplicative inverse (float operand).
    pub fn recip(&self) -> Self {
        debug_assert!(self.dtype().is_float(), "recip on {}", self.dtype());
        Self::node(ExprOp::Recip, self.dtype(), vec![self.clone()], ExprArg::None)
    }

    /// Ternary select: `cond ? a : b`.
    pub fn select(cond: &ScalarExpr, a: &ScalarExpr, b: &ScalarExpr) -> Self {
        debug_assert_eq!(cond.dtype(), DType::Bool, "select condition must be bool");
        debug_assert_eq!(a.dtype(), b.dtype(), "select arms must agree");
        Self::node(
            ExprOp::Where,
            a.dtype(),
            vec![cond.clone(), a.clone(), b.clone()],
            ExprArg::None,
        )
    }

    /// The node kind.
    #[inline]
    pub fn op(&self) -> ExprOp {
        self.0.op
    }

    /// The node's dtype.
    #[inline]
    pub fn dtype(&self) -> DType {
        self.0.dtype
    }

    /// The node's sources.
    #[inline]
    pub fn sources(&self) -> &[ScalarExpr] {
        &self.0.src
    }

    /// The node's payload.
    #[inline]
    pub fn arg(&self) -> &ExprArg {
        &self.0.arg
    }

    /// The literal, if this is a `Const` node.
    pub fn as_const(&self) -> Option<Literal> {
        match self.0.arg {
            ExprArg::Lit(lit) if self.0.op == ExprOp::Const => Some(lit),
            _ => None,
        }
    }

    /// True when the subtree contains a free variable or a buffer read.
    #[inline]
    pub fn has_free(&self) -> bool {
        self.0.free
    }

    /// Identity key for memoization maps.
    #[inline]
    pub fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// The highest buffer number referenced, if any.
    pub fn max_gid(&self) -> Option<usize> {
        let mut seen: FxHashMap<usize, ()> = FxHashMap::default();
        let mut max = None;
        self.walk_gids(&mut seen, &mut max);
        max
    }

    fn walk_gids(&self, seen: &mut FxHashMap<usize, ()>, max: &mut Option<usize>) {
        if seen.insert(self.key(), ()).is_some() {
            return;
        }
        if let ExprArg::Gid(g) = self.0.arg {
            *max = Some(max.map_or(g, |m: usize| m.max(g)));
        }
        for s in &self.0.src {
            s.walk_gids(seen, max);
        }
    }

    /// Rewrite every `Special` named `name` into `repl`.
    ///
    /// Used to fold an index expression into a consumer: substituting
    /// `gidx` with the consumer's folded index.
    pub fn subst_special(&self, name: &str, repl: &ScalarExpr) -> ScalarExpr {
        let mut memo = FxHashMap::default();
        self.rewrite(&mut memo, &mut |e| match e.arg() {
            ExprArg::Var(n, _) if *n == name => Some(repl.clone()),
            _ => None,
        })
    }

    /// Shift every buffer number by `offset`.
    ///
    /// Used when merging the input tables of two lazy arrays.
    pub fn shift_gids(&self, offset: usize) -> ScalarExpr {
        if offset == 0 {
            return self.clone();
        }
        let mut memo = FxHashMap::default();
        self.rewrite(&mut memo, &mut |e| match e.arg() {
            ExprArg::Gid(g) if e.op() == ExprOp::GlobalIndex => Some(ScalarExpr::node(
                ExprOp::GlobalIndex,
                e.dtype(),
                e.sources().to_vec(),
                ExprArg::Gid(g + offset),
            )),
            _ => None,
        })
    }

    /// Renumber buffer reads through an explicit gid map.
    pub fn remap_gids(&self, map: &FxHashMap<usize, usize>) -> ScalarExpr {
        let mut memo = FxHashMap::default();
        self.rewrite(&mut memo, &mut |e| match e.arg() {
            ExprArg::Gid(g) if e.op() == ExprOp::GlobalIndex => {
                map.get(g).map(|&ng| {
                    ScalarExpr::node(
                        ExprOp::GlobalIndex,
                        e.dtype(),
                        e.sources().to_vec(),
                        ExprArg::Gid(ng),
                    )
                })
            }
            _ => None,
        })
    }

    /// Bottom-up rewrite with memoization on node identity. `f` fires on
    /// the node after its children were rewritten; returning `None` keeps
    /// the (possibly rebuilt) node.
    fn rewrite(
        &self,
        memo: &mut FxHashMap<usize, ScalarExpr>,
        f: &mut dyn FnMut(&ScalarExpr) -> Option<ScalarExpr>,
    ) -> ScalarExpr {
        if let Some(hit) = memo.get(&self.key()) {
            return hit.clone();
        }
        let src: Vec<ScalarExpr> = self.0.src.iter().map(|s| s.rewrite(memo, f)).collect();
        let changed = src
            .iter()
            .zip(&self.0.src)
            .any(|(a, b)| !Arc::ptr_eq(&a.0, &b.0));
        let rebuilt = if changed {
            ScalarExpr::node(self.0.op, self.0.dtype, src, self.0.arg.clone())
        } else {
            self.clone()
        };
        let out = f(&rebuilt).unwrap_or(rebuilt);
        memo.insert(self.key(), out.clone());
        out
    }

    /// Simplify the expression.
    ///
    /// Applies identity folds and full constant folding bottom-up,
    /// memoized on node identity. Idempotent: simplifying a simplified
    /// expression returns a structurally equal tree.
    pub fn simplify(&self) -> ScalarExpr {
        let mut memo = FxHashMap::default();
        self.rewrite(&mut memo, &mut simplify_step)
    }

    /// Evaluate the expression in a context binding specials and buffers.
    pub fn evaluate(&self, ctx: &EvalContext) -> Result<Literal> {
        let lhs = |e: &ScalarExpr| e.evaluate(ctx);
        match self.0.op {
            ExprOp::Const => Ok(self.as_const().unwrap_or(Literal::zero(self.dtype()))),
            ExprOp::Special => {
                let name = match self.0.arg {
                    ExprArg::Var(n, _) => n,
                    _ => unreachable!(),
                };
                ctx.vars.get(name).copied().ok_or_else(|| {
                    Error::Unsupported(format!("unbound special variable `{}`", name))
                })
            }
            ExprOp::GlobalIndex => {
                let gid = match self.0.arg {
                    ExprArg::Gid(g) => g,
                    _ => unreachable!(),
                };
                let idx = lhs(&self.0.src[0])?.as_i64();
                let buf = ctx.buffers.get(gid).ok_or_else(|| {
                    Error::Reference(format!("kernel references unbound buffer {}", gid))
                })?;
                if idx < 0 || idx as usize >= buf.len() {
                    return Err(Error::Backend(format!(
                        "index {} out of bounds for buffer {} of length {}",
                        idx,
                        gid,
                        buf.len()
                    )));
                }
                Ok(Literal::from_bits(buf[idx as usize], self.dtype()))
            }
            ExprOp::Add => eval_add(lhs(&self.0.src[0])?, lhs(&self.0.src[1])?),
            ExprOp::Sub => eval_sub(lhs(&self.0.src[0])?, lhs(&self.0.src[1])?),
            ExprOp::Mul => eval_mul(lhs(&self.0.src[0])?, lhs(&self.0.src[1])?),
            ExprOp::Idiv => eval_idiv(lhs(&self.0.src[0])?, lhs(&self.0.src[1])?),
            ExprOp::Mod => eval_mod(lhs(&self.0.src[0])?, lhs(&self.0.src[1])?),
            ExprOp::Cmplt => {
                let (a, b) = (lhs(&self.0.src[0])?, lhs(&self.0.src[1])?);
                Ok(Literal::Bool(match (a, b) {
                    (Literal::F32(x), Literal::F32(y)) => x < y,
                    (Literal::I32(x), Literal::I32(y)) => x < y,
                    (Literal::U32(x), Literal::U32(y)) => x < y,
                    (Literal::Bool(x), Literal::Bool(y)) => !x & y,
                    _ => return Err(Error::Dtype("cmplt operand mismatch".into())),
                }))
            }
            ExprOp::Cmpne => {
                let (a, b) = (lhs(&self.0.src[0])?, lhs(&self.0.src[1])?);
                Ok(Literal::Bool(a != b))
            }
            ExprOp::Sin => match lhs(&self.0.src[0])? {
                Literal::F32(x) => Ok(Literal::F32(x.sin())),
                _ => Err(Error::Dtype("sin on non-float".into())),
            },
            ExprOp::Cos => match lhs(&self.0.src[0])? {
                Literal::F32(x) => Ok(Literal::F32(x.cos())),
                _ => Err(Error::Dtype("cos on non-float".into())),
            },
            ExprOp::Recip => match lhs(&self.0.src[0])? {
                Literal::F32(x) => Ok(Literal::F32(1.0 / x)),
                _ => Err(Error::Dtype("recip on non-float".into())),
            },
            ExprOp::Where => {
                let cond = lhs(&self.0.src[0])?;
                match cond {
                    Literal::Bool(true) => lhs(&self.0.src[1]),
                    Literal::Bool(false) => lhs(&self.0.src[2]),
                    _ => Err(Error::Dtype("where condition must be bool".into())),
                }
            }
        }
    }
}

impl PartialEq for ScalarExpr {
    /// Structural equality, with a pointer fast path.
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.op == other.0.op
            && self.0.dtype == other.0.dtype
            && self.0.arg == other.0.arg
            && self.0.src.len() == other.0.src.len()
            && self.0.src.iter().zip(&other.0.src).all(|(a, b)| a == b)
    }
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.op {
            ExprOp::Const => write!(f, "{}", self.as_const().unwrap()),
            ExprOp::Special => match self.0.arg {
                ExprArg::Var(n, b) => write!(f, "{}<{}>", n, b),
                _ => unreachable!(),
            },
            ExprOp::GlobalIndex => match self.0.arg {
                ExprArg::Gid(g) => {
                    write!(f, "g{}:{}[{}]", g, self.0.dtype, self.0.src[0])
                }
                _ => unreachable!(),
            },
            ExprOp::Add => write!(f, "({}+{})", self.0.src[0], self.0.src[1]),
            ExprOp::Sub => write!(f, "({}-{})", self.0.src[0], self.0.src[1]),
            ExprOp::Mul => write!(f, "({}*{})", self.0.src[0], self.0.src[1]),
            ExprOp::Idiv => write!(f, "({}//{})", self.0.src[0], self.0.src[1]),
            ExprOp::Mod => write!(f, "({}%{})", self.0.src[0], self.0.src[1]),
            ExprOp::Cmplt => write!(f, "({}<{})", self.0.src[0], self.0.src[1]),
            ExprOp::Cmpne => write!(f, "({}!={})", self.0.src[0], self.0.src[1]),
            ExprOp::Sin => write!(f, "sin({})", self.0.src[0]),
            ExprOp::Cos => write!(f, "cos({})", self.0.src[0]),
            ExprOp::Recip => write!(f, "recip({})", self.0.src[0]),
            ExprOp::Where => write!(
                f,
                "where({},{},{})",
                self.0.src[0], self.0.src[1], self.0.src[2]
            ),
        }
    }
}

/// Context for expression evaluation: special-variable bindings and
/// word-addressed input buffers indexed by gid.
#[derive(Default)]
pub struct EvalContext<'a> {
    /// Bindings for `Special` variables by name.
    pub vars: FxHashMap<&'static str, Literal>,
    /// Input buffers, one word per element.
    pub buffers: Vec<&'a [u32]>,
}

impl<'a> EvalContext<'a> {
    /// An empty context (constant folding).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Bind a special variable.
    pub fn bind(&mut self, name: &'static str, value: Literal) {
        self.vars.insert(name, value);
    }
}

fn eval_add(a: Literal, b: Literal) -> Result<Literal> {
    Ok(match (a, b) {
        (Literal::F32(x), Literal::F32(y)) => Literal::F32(x + y),
        (Literal::I32(x), Literal::I32(y)) => Literal::I32(x.wrapping_add(y)),
        (Literal::U32(x), Literal::U32(y)) => Literal::U32(x.wrapping_add(y)),
        (Literal::Bool(x), Literal::Bool(y)) => Literal::Bool(x | y),
        _ => return Err(Error::Dtype("add operand mismatch".into())),
    })
}

fn eval_sub(a: Literal, b: Literal) -> Result<Literal> {
    Ok(match (a, b) {
        (Literal::F32(x), Literal::F32(y)) => Literal::F32(x - y),
        (Literal::I32(x), Literal::I32(y)) => Literal::I32(x.wrapping_sub(y)),
        (Literal::U32(x), Literal::U32(y)) => Literal::U32(x.wrapping_sub(y)),
        _ => return Err(Error::Dtype("sub operand mismatch".into())),
    })
}

fn eval_mul(a: Literal, b: Literal) -> Result<Literal> {
    Ok(match (a, b) {
        (Literal::F32(x), Literal::F32(y)) => Literal::F32(x * y),
        (Literal::I32(x), Literal::I32(y)) => Literal::I32(x.wrapping_mul(y)),
        (Literal::U32(x), Literal::U32(y)) => Literal::U32(x.wrapping_mul(y)),
        (Literal::Bool(x), Literal::Bool(y)) => Literal::Bool(x & y),
        _ => return Err(Error::Dtype("mul operand mismatch".into())),
    })
}

/// Floor division for i32 (rounds toward negative infinity).
pub fn floor_div(a: i32, b: i32) -> i32 {
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

/// Complement of floor division: `a - floor_div(a, b) * b`.
pub fn floor_mod(a: i32, b: i32) -> i32 {
    a.wrapping_sub(floor_div(a, b).wrapping_mul(b))
}

fn eval_idiv(a: Literal, b: Literal) -> Result<Literal> {
    Ok(match (a, b) {
        (Literal::I32(_), Literal::I32(0)) | (Literal::U32(_), Literal::U32(0)) => {
            return Err(Error::Backend("integer division by zero".into()))
        }
        (Literal::I32(x), Literal::I32(y)) => Literal::I32(floor_div(x, y)),
        (Literal::U32(x), Literal::U32(y)) => Literal::U32(x / y),
        _ => return Err(Error::Dtype("idiv requires integer operands".into())),
    })
}

fn eval_mod(a: Literal, b: Literal) -> Result<Literal> {
    Ok(match (a, b) {
        (Literal::I32(_), Literal::I32(0)) | (Literal::U32(_), Literal::U32(0)) => {
            return Err(Error::Backend("integer modulo by zero".into()))
        }
        (Literal::I32(x), Literal::I32(y)) => Literal::I32(floor_mod(x, y)),
        (Literal::U32(x), Literal::U32(y)) => Literal::U32(x % y),
        _ => return Err(Error::Dtype("mod requires integer operands".into())),
    })
}

/// One simplification step, applied to a node whose children are already
/// simplified. Returns `None` when nothing applies.
fn simplify_step(e: &ScalarExpr) -> Option<ScalarExpr> {
    // Closed subtrees fold to a constant outright.
    if !e.has_free() && e.op() != ExprOp::Const {
        if let Ok(lit) = e.evaluate(&EvalContext::empty()) {
            return Some(ScalarExpr::const_of(lit, e.dtype()));
        }
    }

    let src = e.sources();
    match e.op() {
        ExprOp::Add => {
            let (a, b) = (&src[0], &src[1]);
            if b.as_const().is_some_and(|l| l.is_zero()) {
                return Some(a.clone());
            }
            if a.as_const().is_some_and(|l| l.is_zero()) {
                return Some(b.clone());
            }
            // a + (-1)*b  =>  a - b, and its mirror.
            if let Some(n) = negated_factor(b) {
                return Some(a.sub(&n));
            }
            if let Some(n) = negated_factor(a) {
                return Some(b.sub(&n));
            }
            None
        }
        ExprOp::Sub => {
            let (a, b) = (&src[0], &src[1]);
            if b.as_const().is_some_and(|l| l.is_zero()) {
                return Some(a.clone());
            }
            None
        }
        ExprOp::Mul => {
            let (a, b) = (&src[0], &src[1]);
            if b.as_const().is_some_and(|l| l.is_one()) {
                return Some(a.clone());
            }
            if a.as_const().is_some_and(|l| l.is_one()) {
                return Some(b.clone());
            }
            if a.as_const().is_some_and(|l| l.is_zero())
                || b.as_const().is_some_and(|l| l.is_zero())
            {
                return Some(ScalarExpr::zero(e.dtype()));
            }
            None
        }
        ExprOp::Idiv => {
            let (a, b) = (&src[0], &src[1]);
            if b.as_const().is_some_and(|l| l.is_one()) {
                return Some(a.clone());
            }
            None
        }
        ExprOp::Where => match src[0].as_const() {
            Some(Literal::Bool(true)) => Some(src[1].clone()),
            Some(Literal::Bool(false)) => Some(src[2].clone()),
            _ => {
                if src[1] == src[2] {
                    Some(src[1].clone())
                } else {
                    None
                }
            }
        },
        _ => None,
    }
}

/// If `e` is `(-1) * x` or `x * (-1)`, return `x`.
fn negated_factor(e: &ScalarExpr) -> Option<ScalarExpr> {
    if e.op() != ExprOp::Mul {
        return None;
    }
    let (a, b) = (&e.sources()[0], &e.sources()[1]);
    if a.as_const().is_some_and(|l| l.is_neg_one()) {
        return Some(b.clone());
    }
    if b.as_const().is_some_and(|l| l.is_neg_one()) {
        return Some(a.clone());
    }
    None
}
