//! Forward-mode automatic differentiation (jvp) and the derived
//! gradient operators.
//!
//! A JVP tracer pairs a primal with a tangent; every primitive has a
//! linearization rule. `jacfwd` pushes one basis tangent per input
//! element through `vmap(jvp)`, and `grad` is `jacfwd` of a
//! scalar-valued function reshaped to the argument.

use crate::array::{zeros_like, Array};
use crate::trace::interpreter::{bind, bind1, JvpPair, TraceGuard, TraceKind, TracerValue};
use crate::trace::jit::{interpret_jaxpr, trace_jaxpr, Jaxpr};
use crate::trace::primitive::Primitive;
use crate::tree::{Tree, TreeDef};
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::sync::{Arc, Mutex, OnceLock};

fn pair(level: usize, primal: Array, tangent: Array) -> Array {
    Array::from_value(TracerValue::Jvp(Arc::new(JvpPair {
        level,
        primal,
        tangent,
    })))
}

/// Process a primitive under a JVP trace: unpack pairs (lifting lower
/// operands with zero tangents), apply the linearization rule, repack.
pub(crate) fn process_jvp(
    prim: &Primitive,
    inputs: &[Array],
    level: usize,
) -> Result<Vec<Array>> {
    let mut primals = Vec::with_capacity(inputs.len());
    let mut tangents = Vec::with_capacity(inputs.len());
    for a in inputs {
        match a.value() {
            TracerValue::Jvp(p) if p.level == level => {
                primals.push(p.primal.clone());
                tangents.push(p.tangent.clone());
            }
            _ => {
                primals.push(a.clone());
                tangents.push(zeros_like(a));
            }
        }
    }
    let (p, t) = (&primals, &tangents);

    let (primal_out, tangent_out): (Vec<Array>, Vec<Array>) = match prim {
        Primitive::Add => (vec![p[0].add(&p[1])?], vec![t[0].add(&t[1])?]),
        Primitive::Mul => {
            let primal = p[0].mul(&p[1])?;
            let tangent = p[0].mul(&t[1])?.add(&t[0].mul(&p[1])?)?;
            (vec![primal], vec![tangent])
        }
        Primitive::Neg => (vec![p[0].neg()?], vec![t[0].neg()?]),
        Primitive::Reciprocal => {
            let r = p[0].reciprocal()?;
            let tangent = r.mul(&r)?.mul(&t[0])?.neg()?;
            (vec![r], vec![tangent])
        }
        Primitive::Sin => {
            let tangent = p[0].cos()?.mul(&t[0])?;
            (vec![p[0].sin()?], vec![tangent])
        }
        Primitive::Cos => {
            let tangent = p[0].sin()?.neg()?.mul(&t[0])?;
            (vec![p[0].cos()?], vec![tangent])
        }
        Primitive::Min => {
            // Tangent follows the selected operand; ties select the
            // second operand's tangent.
            let primal = p[0].minimum(&p[1])?;
            let tangent = p[0].lt(&p[1])?.where_(&t[0], &t[1])?;
            (vec![primal], vec![tangent])
        }
        Primitive::Max => {
            let primal = p[0].maximum(&p[1])?;
            let tangent = p[1].lt(&p[0])?.where_(&t[0], &t[1])?;
            (vec![primal], vec![tangent])
        }
        Primitive::Idiv | Primitive::Mod | Primitive::Compare(_) => {
            // Integer- and boolean-producing ops carry zero tangents.
            let primal = bind1(prim.clone(), &primals)?;
            let tangent = zeros_like(&primal);
            (vec![primal], vec![tangent])
        }
        Primitive::Where => {
            let primal = bind1(prim.clone(), &[p[0].clone(), p[1].clone(), p[2].clone()])?;
            let tangent = bind1(prim.clone(), &[p[0].clone(), t[1].clone(), t[2].clone()])?;
            (vec![primal], vec![tangent])
        }
        Primitive::ReduceSum { .. }
        | Primitive::Transpose { .. }
        | Primitive::Broadcast { .. }
        | Primitive::Reshape { .. }
        | Primitive::Flip { .. }
        | Primitive::Shrink { .. }
        | Primitive::Pad { .. } => {
            // Structural ops commute identically with themselves.
            let primal = bind1(prim.clone(), &primals)?;
            let tangent = bind1(prim.clone(), &tangents)?;
            (vec![primal], vec![tangent])
        }
        Primitive::ReduceMax { .. } | Primitive::ReduceMin { .. } => {
            return Err(Error::Unsupported(format!(
                "no differentiation rule for {}",
                prim.name()
            )));
        }
        Primitive::JitCall { jaxpr, .. } => {
            let (jvp_jaxpr, consts) = jvp_jaxpr(jaxpr)?;
            let mut call_args = consts;
            call_args.extend(primals.iter().cloned());
            call_args.extend(tangents.iter().cloned());
            let outs = bind(
                Primitive::JitCall {
                    jaxpr: jvp_jaxpr.clone(),
                    num_consts: jvp_jaxpr.num_consts,
                },
                &call_args,
            )?;
            let m = outs.len() / 2;
            (outs[..m].to_vec(), outs[m..].to_vec())
        }
    };

    Ok(primal_out
        .into_iter()
        .zip(tangent_out)
        .map(|(primal, tangent)| pair(level, primal, tangent))
        .collect())
}

/// JVP-transform a recorded program, once per program.
///
/// The transformed jaxpr takes the original inputs (captured constants
/// included, with zero tangents) doubled: primals then tangents.
fn jvp_jaxpr(jaxpr: &Arc<Jaxpr>) -> Result<(Arc<Jaxpr>, Vec<Array>)> {
    // Keyed by program identity; the original is pinned in the map so
    // its address cannot be reused by a later allocation.
    type Memo = FxHashMap<usize, (Arc<Jaxpr>, (Arc<Jaxpr>, Vec<Array>))>;
    static MEMO: OnceLock<Mutex<Memo>> = OnceLock::new();
    let memo = MEMO.get_or_init(|| Mutex::new(FxHashMap::default()));
    let key = Arc::as_ptr(jaxpr) as usize;
    if let Some((_, hit)) = memo.lock().unwrap().get(&key) {
        return Ok(hit.clone());
    }

    let n = jaxpr.invars.len();
    let mut avals = jaxpr.invars.clone();
    avals.extend(jaxpr.invars.iter().cloned());
    let inner = jaxpr.clone();
    let f = move |args: &[Array]| -> Result<Vec<Array>> {
        let (p, t) = args.split_at(n);
        let (mut po, to) = jvp(|xs| interpret_jaxpr(&inner, xs), p, t)?;
        po.extend(to);
        Ok(po)
    };
    let traced = trace_jaxpr(&f, &avals)?;
    memo.lock()
        .unwrap()
        .insert(key, (jaxpr.clone(), traced.clone()));
    Ok(traced)
}

/// Compute `(f(primals), df(primals) @ tangents)` in one forward pass.
///
/// # Examples
///
/// ```
/// use lazyjax::{jvp, Array, Shape};
///
/// let x = Array::from_vec(vec![3.0], Shape::new(vec![1])).unwrap();
/// let v = Array::from_vec(vec![1.0], Shape::new(vec![1])).unwrap();
/// let (y, dy) = jvp(|xs| Ok(vec![xs[0].sin()?]), &[x], &[v]).unwrap();
/// assert!((y[0].data().unwrap()[0] - 0.14112).abs() < 1e-5);
/// assert!((dy[0].data().unwrap()[0] + 0.98999).abs() < 1e-5);
/// ```
pub fn jvp<F>(f: F, primals: &[Array], tangents: &[Array]) -> Result<(Vec<Array>, Vec<Array>)>
where
    F: Fn(&[Array]) -> Result<Vec<Array>>,
{
    if primals.len() != tangents.len() {
        return Err(Error::TreeMismatch(format!(
            "{} primals vs {} tangents",
            primals.len(),
            tangents.len()
        )));
    }
    for (i, (p, t)) in primals.iter().zip(tangents).enumerate() {
        if p.aval() != t.aval() {
            return Err(Error::Shape(format!(
                "tangent {} has {}:{} but primal has {}:{}",
                i,
                t.shape(),
                t.dtype(),
                p.shape(),
                p.dtype()
            )));
        }
    }

    let guard = TraceGuard::push(TraceKind::Jvp, false);
    let level = guard.level();
    let wrapped: Vec<Array> = primals
        .iter()
        .zip(tangents)
        .map(|(p, t)| pair(level, p.clone(), t.clone()))
        .collect();
    let outs = f(&wrapped)?;

    let mut primal_out = Vec::with_capacity(outs.len());
    let mut tangent_out = Vec::with_capacity(outs.len());
    for out in outs {
        match out.value().clone() {
            TracerValue::Jvp(p) if p.level == level => {
                primal_out.push(p.primal.clone());
                tangent_out.push(p.tangent.clone());
            }
            _ => {
                tangent_out.push(zeros_like(&out));
                primal_out.push(out);
            }
        }
    }
    Ok((primal_out, tangent_out))
}

/// Tree-structured [`jvp`]: nested primals and tangents must match
/// structurally; outputs preserve the function's structure.
pub fn jvp_tree<F>(f: F, primals: &Tree, tangents: &Tree) -> Result<(Tree, Tree)>
where
    F: Fn(&Tree) -> Result<Tree>,
{
    let (pl, pdef) = primals.flatten();
    let (tl, tdef) = tangents.flatten();
    pdef.check_matches(&tdef)?;

    let out_def: RefCell<Option<TreeDef>> = RefCell::new(None);
    let flat = |xs: &[Array]| -> Result<Vec<Array>> {
        let tree = pdef.unflatten(xs.to_vec())?;
        let out = f(&tree)?;
        let (leaves, def) = out.flatten();
        *out_def.borrow_mut() = Some(def);
        Ok(leaves)
    };
    let (po, to) = jvp(flat, &pl, &tl)?;
    let def = out_def.into_inner().expect("function ran");
    Ok((def.unflatten(po)?, def.unflatten(to)?))
}

/// Tangent outputs of `f` at `x` for a batch of basis tangents on the
/// argument at `argnum`: the raw rows of the jacobian, batched over the
/// input element index.
fn jacobian_rows<F>(f: &F, args: &[Array], argnum: usize) -> Result<Vec<Array>>
where
    F: Fn(&[Array]) -> Result<Vec<Array>>,
{
    if argnum >= args.len() {
        return Err(Error::Shape(format!(
            "argnum {} out of bounds for {} arguments",
            argnum,
            args.len()
        )));
    }
    let x = &args[argnum];
    let n = x.size();
    let mut basis_shape = vec![n];
    basis_shape.extend(x.shape().as_slice());
    let basis = Array::eye(n, x.dtype())?.reshape(&basis_shape)?;

    let num_args = args.len();
    let inner = |batched: &[Array]| -> Result<Vec<Array>> {
        let primals = &batched[..num_args];
        let tangent = &batched[num_args];
        let tangents: Vec<Array> = primals
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i == argnum {
                    tangent.clone()
                } else {
                    zeros_like(p)
                }
            })
            .collect();
        let (_, to) = jvp(f, primals, &tangents)?;
        Ok(to)
    };

    let mut vmap_args: Vec<Array> = args.to_vec();
    vmap_args.push(basis);
    let mut in_axes = vec![None; num_args];
    in_axes.push(Some(0));
    crate::trace::vmap::vmap_flat(&inner, &vmap_args, &in_axes)
}

/// The jacobian of `f` at `x`, computed forward-mode, with shape
/// `out_shape ++ in_shape`.
pub fn jacfwd<F>(f: F) -> impl Fn(&Array) -> Result<Array>
where
    F: Fn(&Array) -> Result<Array>,
{
    move |x: &Array| {
        let rows = jacobian_rows(
            &|xs: &[Array]| Ok(vec![f(&xs[0])?]),
            std::slice::from_ref(x),
            0,
        )?;
        let jac = rows.into_iter().next().expect("one output");
        // Rows arrive as [in_size, out_shape...]; present as
        // out_shape ++ in_shape.
        let n = x.size();
        let out_size = jac.size() / n.max(1);
        let mut out_shape: Vec<usize> = jac.shape().as_slice()[1..].to_vec();
        out_shape.extend(x.shape().as_slice());
        jac.reshape(&[n, out_size])?
            .transpose()?
            .reshape(&out_shape)
    }
}

/// The gradient of a scalar-valued function with respect to the
/// argument at `argnum`.
pub fn grad_with_argnum<F>(f: F, argnum: usize) -> impl Fn(&[Array]) -> Result<Array>
where
    F: Fn(&[Array]) -> Result<Array>,
{
    move |args: &[Array]| {
        let rows = jacobian_rows(
            &|xs: &[Array]| Ok(vec![f(xs)?]),
            args,
            argnum,
        )?;
        let jac = rows.into_iter().next().expect("one output");
        if jac.size() != args[argnum].size() {
            return Err(Error::Shape(format!(
                "grad requires a scalar-valued function, got an output of {} elements",
                jac.size() / args[argnum].size().max(1)
            )));
        }
        jac.reshape(args[argnum].shape().as_slice())
    }
}

/// The gradient of a scalar-valued function of one array.
///
/// # Examples
///
/// ```
/// use lazyjax::{grad, Array, Shape};
///
/// let df = grad(|x: &Array| x.mul(x)?.sum_all());
/// let x = Array::from_vec(vec![1.0, 2.0, 3.0], Shape::new(vec![3])).unwrap();
/// assert_eq!(df(&x).unwrap().data().unwrap(), vec![2.0, 4.0, 6.0]);
/// ```
pub fn grad<F>(f: F) -> impl Fn(&Array) -> Result<Array>
where
    F: Fn(&Array) -> Result<Array>,
{
    let inner = grad_with_argnum(move |xs: &[Array]| f(&xs[0]), 0);
    move |x: &Array| inner(std::slice::from_ref(x))
}

/// Compute both the value and the gradient of a scalar-valued function.
pub fn value_and_grad<F>(f: F) -> impl Fn(&Array) -> Result<(Array, Array)>
where
    F: Fn(&Array) -> Result<Array> + Clone,
{
    move |x: &Array| {
        let value = f(x)?;
        let g = grad(f.clone());
        Ok((value, g(x)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn arr(data: Vec<f32>, shape: Vec<usize>) -> Array {
        Array::from_vec(data, Shape::new(shape)).unwrap()
    }

    #[test]
    fn test_jvp_mul_product_rule() {
        let x = arr(vec![2.0], vec![1]);
        let y = arr(vec![5.0], vec![1]);
        let dx = arr(vec![1.0], vec![1]);
        let dy = arr(vec![0.0], vec![1]);
        let (out, dout) = jvp(
            |xs| Ok(vec![xs[0].mul(&xs[1])?]),
            &[x, y],
            &[dx, dy],
        )
        .unwrap();
        assert_eq!(out[0].data().unwrap(), vec![10.0]);
        // d(xy)/dx = y = 5
        assert_eq!(dout[0].data().unwrap(), vec![5.0]);
    }

    #[test]
    fn test_jvp_length_mismatch_is_tree_error() {
        let x = arr(vec![1.0], vec![1]);
        let err = jvp(|xs| Ok(xs.to_vec()), &[x], &[]).unwrap_err();
        assert!(matches!(err, Error::TreeMismatch(_)));
    }

    #[test]
    fn test_grad_sum_of_squares() {
        let df = grad(|x: &Array| x.mul(x)?.sum_all());
        let x = arr(vec![1.0, 2.0, 3.0, 4.0], vec![4]);
        assert_eq!(df(&x).unwrap().data().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_nested_derivatives_of_sin() {
        // f = sin, f' = cos, f'' = -sin, f''' = -cos.
        let d1 = grad(|x: &Array| x.sin()?.sum_all());
        let d2 = grad(move |x: &Array| d1(x)?.sum_all());
        let d3 = grad(move |x: &Array| d2(x)?.sum_all());
        let x = arr(vec![3.0], vec![1]);
        let third = d3(&x).unwrap().data().unwrap()[0];
        assert!((third - 0.9899925).abs() < 1e-5, "got {}", third);
    }

    #[test]
    fn test_min_max_tangent_tie_breaking() {
        // At a tie, the second operand's tangent is selected.
        let x = arr(vec![1.0], vec![1]);
        let y = arr(vec![1.0], vec![1]);
        let dx = arr(vec![10.0], vec![1]);
        let dy = arr(vec![20.0], vec![1]);
        let (_, dout) = jvp(
            |xs| Ok(vec![xs[0].minimum(&xs[1])?]),
            &[x, y],
            &[dx, dy],
        )
        .unwrap();
        assert_eq!(dout[0].data().unwrap(), vec![20.0]);
    }

    #[test]
    fn test_jvp_tree_preserves_structure() {
        let primals = Tree::List(vec![
            Tree::Leaf(arr(vec![1.0, 2.0], vec![2])),
            Tree::Leaf(arr(vec![3.0], vec![1])),
        ]);
        let tangents = Tree::List(vec![
            Tree::Leaf(arr(vec![1.0, 0.0], vec![2])),
            Tree::Leaf(arr(vec![0.0], vec![1])),
        ]);
        let f = |t: &Tree| -> crate::Result<Tree> {
            let Tree::List(items) = t else { unreachable!() };
            let (Tree::Leaf(a), Tree::Leaf(b)) = (&items[0], &items[1]) else {
                unreachable!()
            };
            Ok(Tree::List(vec![Tree::Leaf(a.mul(a)?), Tree::Leaf(b.clone())]))
        };
        let (po, to) = jvp_tree(f, &primals, &tangents).unwrap();
        let Tree::List(pitems) = po else { panic!("structure lost") };
        assert_eq!(pitems.len(), 2);
        let Tree::List(titems) = to else { panic!("structure lost") };
        let Tree::Leaf(t0) = &titems[0] else { panic!() };
        // d(a*a) . [1, 0] = 2a ⊙ [1, 0] = [2, 0]
        assert_eq!(t0.data().unwrap(), vec![2.0, 0.0]);
    }

    #[test]
    fn test_jvp_tree_mismatch_reports_path() {
        let primals = Tree::List(vec![Tree::Leaf(arr(vec![1.0], vec![1]))]);
        let tangents = Tree::Leaf(arr(vec![1.0], vec![1]));
        let err = jvp_tree(|t: &Tree| Ok(t.clone()), &primals, &tangents).unwrap_err();
        assert!(matches!(err, Error::TreeMismatch(_)));
    }

    #[test]
    fn test_compare_tangent_is_zero() {
        let x = arr(vec![1.0, 5.0], vec![2]);
        let y = arr(vec![2.0, 2.0], vec![2]);
        let dx = arr(vec![1.0, 1.0], vec![2]);
        let dy = arr(vec![1.0, 1.0], vec![2]);
        let (out, dout) = jvp(
            |xs| Ok(vec![xs[0].lt(&xs[1])?]),
            &[x, y],
            &[dx, dy],
        )
        .unwrap();
        assert_eq!(out[0].data_bool().unwrap(), vec![true, false]);
        assert_eq!(dout[0].data_bool().unwrap(), vec![false, false]);
    }
}
