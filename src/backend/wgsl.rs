//! WGSL code generation for fused kernels.
//!
//! A kernel renders to a single compute shader: one storage binding per
//! input buffer, one read-write output binding, one thread per output
//! element, and the reduction loop (when present) run inline. Rendering
//! is a pure function of the kernel, so backends can cache compiled
//! pipelines by the generated source.

use crate::expr::{ExprArg, ExprOp, Literal, ScalarExpr};
use crate::kernel::Kernel;
use crate::DType;
use rustc_hash::FxHashMap;
use std::fmt::Write;

/// WGSL register type for a dtype.
fn reg_ty(dtype: DType) -> &'static str {
    match dtype {
        DType::Float32 | DType::Float16 => "f32",
        DType::Int32 => "i32",
        DType::Uint32 => "u32",
        DType::Bool => "bool",
    }
}

/// WGSL storage-buffer element type for a dtype (bool stored as u32).
fn store_ty(dtype: DType) -> &'static str {
    match dtype {
        DType::Float32 | DType::Float16 => "f32",
        DType::Int32 => "i32",
        DType::Uint32 => "u32",
        DType::Bool => "u32",
    }
}

/// Render a literal as a WGSL expression. Non-finite floats have no
/// literal form and go through a bitcast.
fn literal(lit: Literal) -> String {
    match lit {
        Literal::F32(v) if v.is_finite() => format!("{:?}", v),
        Literal::F32(v) => format!("bitcast<f32>(0x{:08x}u)", v.to_bits()),
        Literal::I32(v) => format!("{}", v),
        Literal::U32(v) => format!("{}u", v),
        Literal::Bool(v) => format!("{}", v),
    }
}

/// Collect the element dtype of every referenced input buffer.
fn input_dtypes(kernel: &Kernel) -> FxHashMap<usize, DType> {
    fn walk(e: &ScalarExpr, out: &mut FxHashMap<usize, DType>, seen: &mut FxHashMap<usize, ()>) {
        if seen.insert(e.key(), ()).is_some() {
            return;
        }
        if let ExprArg::Gid(g) = e.arg() {
            out.entry(*g).or_insert(e.dtype());
        }
        for s in e.sources() {
            walk(s, out, seen);
        }
    }
    let mut out = FxHashMap::default();
    let mut seen = FxHashMap::default();
    walk(&kernel.expr, &mut out, &mut seen);
    if let Some(r) = &kernel.reduce {
        walk(&r.combine, &mut out, &mut seen);
        if let Some(e) = &r.epilogue {
            walk(e, &mut out, &mut seen);
        }
    }
    out
}

/// SSA emitter for one straight-line region of the shader. Regions that
/// share a block scope must use distinct name prefixes.
struct Emitter<'a> {
    lines: &'a mut String,
    indent: &'static str,
    prefix: &'static str,
    memo: FxHashMap<usize, String>,
    next: usize,
}

impl<'a> Emitter<'a> {
    fn new(lines: &'a mut String, indent: &'static str, prefix: &'static str) -> Self {
        Emitter {
            lines,
            indent,
            prefix,
            memo: FxHashMap::default(),
            next: 0,
        }
    }

    fn emit(&mut self, e: &ScalarExpr) -> String {
        if let Some(name) = self.memo.get(&e.key()) {
            return name.clone();
        }
        let text = self.render(e);
        // Atoms are inlined; compound expressions get a let binding.
        let name = match e.op() {
            ExprOp::Const | ExprOp::Special => text,
            _ => {
                let name = format!("{}{}", self.prefix, self.next);
                self.next += 1;
                let _ = writeln!(
                    self.lines,
                    "{}let {}: {} = {};",
                    self.indent,
                    name,
                    reg_ty(e.dtype()),
                    text
                );
                name
            }
        };
        self.memo.insert(e.key(), name.clone());
        name
    }

    fn render(&mut self, e: &ScalarExpr) -> String {
        let src = e.sources().to_vec();
        match e.op() {
            ExprOp::Const => literal(e.as_const().unwrap()),
            ExprOp::Special => match e.arg() {
                ExprArg::Var(name, _) => (*name).to_string(),
                _ => unreachable!(),
            },
            ExprOp::GlobalIndex => {
                let gid = match e.arg() {
                    ExprArg::Gid(g) => *g,
                    _ => unreachable!(),
                };
                let idx = self.emit(&src[0]);
                if e.dtype() == DType::Bool {
                    format!("(in{}[{}] != 0u)", gid, idx)
                } else {
                    format!("in{}[{}]", gid, idx)
                }
            }
            ExprOp::Add => {
                let (a, b) = (self.emit(&src[0]), self.emit(&src[1]));
                if e.dtype() == DType::Bool {
                    format!("({} || {})", a, b)
                } else {
                    format!("({} + {})", a, b)
                }
            }
            ExprOp::Sub => {
                let (a, b) = (self.emit(&src[0]), self.emit(&src[1]));
                format!("({} - {})", a, b)
            }
            ExprOp::Mul => {
                let (a, b) = (self.emit(&src[0]), self.emit(&src[1]));
                if e.dtype() == DType::Bool {
                    format!("({} && {})", a, b)
                } else {
                    format!("({} * {})", a, b)
                }
            }
            ExprOp::Idiv => {
                let (a, b) = (self.emit(&src[0]), self.emit(&src[1]));
                if e.dtype() == DType::Int32 {
                    format!("idiv_floor({}, {})", a, b)
                } else {
                    format!("({} / {})", a, b)
                }
            }
            ExprOp::Mod => {
                let (a, b) = (self.emit(&src[0]), self.emit(&src[1]));
                if e.dtype() == DType::Int32 {
                    format!("imod_floor({}, {})", a, b)
                } else {
                    format!("({} % {})", a, b)
                }
            }
            ExprOp::Cmplt => {
                let (a, b) = (self.emit(&src[0]), self.emit(&src[1]));
                if src[0].dtype() == DType::Bool {
                    format!("(!{} && {})", a, b)
                } else {
                    format!("({} < {})", a, b)
                }
            }
            ExprOp::Cmpne => {
                let (a, b) = (self.emit(&src[0]), self.emit(&src[1]));
                format!("({} != {})", a, b)
            }
            ExprOp::Sin => format!("sin({})", self.emit(&src[0])),
            ExprOp::Cos => format!("cos({})", self.emit(&src[0])),
            ExprOp::Recip => format!("(1.0 / {})", self.emit(&src[0])),
            ExprOp::Where => {
                let c = self.emit(&src[0]);
                let a = self.emit(&src[1]);
                let b = self.emit(&src[2]);
                format!("select({}, {}, {})", b, a, c)
            }
        }
    }
}

/// Convert a register value into its storage representation.
fn to_store(dtype: DType, value: &str) -> String {
    if dtype == DType::Bool {
        format!("select(0u, 1u, {})", value)
    } else {
        value.to_string()
    }
}

/// Render a kernel into a complete WGSL compute shader.
pub fn render_kernel(kernel: &Kernel) -> String {
    let dtypes = input_dtypes(kernel);
    let nargs = kernel.nargs();
    let mut s = String::new();

    for gid in 0..nargs {
        let ty = store_ty(dtypes.get(&gid).copied().unwrap_or(DType::Float32));
        let _ = writeln!(
            s,
            "@group(0) @binding({})\nvar<storage, read> in{}: array<{}>;\n",
            gid, gid, ty
        );
    }
    let _ = writeln!(
        s,
        "@group(0) @binding({})\nvar<storage, read_write> out0: array<{}>;\n",
        nargs,
        store_ty(kernel.dtype)
    );

    s.push_str(
        "fn idiv_floor(a: i32, b: i32) -> i32 {\n\
         \x20   let q = a / b;\n\
         \x20   let r = a % b;\n\
         \x20   if (r != 0 && ((r < 0) != (b < 0))) {\n\
         \x20       return q - 1;\n\
         \x20   }\n\
         \x20   return q;\n\
         }\n\n\
         fn imod_floor(a: i32, b: i32) -> i32 {\n\
         \x20   return a - idiv_floor(a, b) * b;\n\
         }\n\n",
    );

    let _ = writeln!(s, "@compute @workgroup_size(256)");
    let _ = writeln!(
        s,
        "fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {{"
    );
    let _ = writeln!(s, "    let gidx = i32(global_id.x);");
    let _ = writeln!(s, "    if (gidx >= {}) {{", kernel.size);
    let _ = writeln!(s, "        return;");
    let _ = writeln!(s, "    }}");

    match &kernel.reduce {
        None => {
            let mut body = String::new();
            let result = {
                let mut em = Emitter::new(&mut body, "    ", "v");
                em.emit(&kernel.expr)
            };
            s.push_str(&body);
            let _ = writeln!(
                s,
                "    out0[gidx] = {};",
                to_store(kernel.dtype, &result)
            );
        }
        Some(r) => {
            let acc_ty = reg_ty(kernel.dtype);
            let _ = writeln!(
                s,
                "    var acc: {} = {};",
                acc_ty,
                literal(r.identity)
            );
            let _ = writeln!(
                s,
                "    for (var ridx: i32 = 0; ridx < {}; ridx = ridx + 1) {{",
                r.axis_size
            );
            let mut body = String::new();
            let val = {
                let mut em = Emitter::new(&mut body, "        ", "v");
                em.emit(&kernel.expr)
            };
            s.push_str(&body);
            let _ = writeln!(s, "        let val: {} = {};", acc_ty, val);
            let mut combine = String::new();
            let combined = {
                let mut em = Emitter::new(&mut combine, "        ", "c");
                em.emit(&r.combine)
            };
            s.push_str(&combine);
            let _ = writeln!(s, "        acc = {};", combined);
            let _ = writeln!(s, "    }}");
            let result = match &r.epilogue {
                Some(e) => {
                    let mut tail = String::new();
                    let out = {
                        let mut em = Emitter::new(&mut tail, "    ", "e");
                        em.emit(e)
                    };
                    s.push_str(&tail);
                    out
                }
                None => "acc".to_string(),
            };
            let _ = writeln!(
                s,
                "    out0[gidx] = {};",
                to_store(kernel.dtype, &result)
            );
        }
    }
    let _ = writeln!(s, "}}");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Reduce;

    #[test]
    fn test_pointwise_shader_shape() {
        let gidx = ScalarExpr::gidx(8);
        let expr = ScalarExpr::global(0, gidx, DType::Float32).mul(&ScalarExpr::f32(2.0));
        let k = Kernel::new(DType::Float32, 8, expr, None);
        let src = render_kernel(&k);
        assert!(src.contains("@binding(0)\nvar<storage, read> in0: array<f32>;"));
        assert!(src.contains("@binding(1)\nvar<storage, read_write> out0: array<f32>;"));
        assert!(src.contains("if (gidx >= 8)"));
        assert!(src.contains("out0[gidx]"));
    }

    #[test]
    fn test_reduce_shader_has_loop() {
        let idx = ScalarExpr::gidx(2)
            .mul(&ScalarExpr::i32(3))
            .add(&ScalarExpr::ridx(3));
        let expr = ScalarExpr::global(0, idx, DType::Float32);
        let k = Kernel::new(
            DType::Float32,
            2,
            expr,
            Some(Reduce::sum(3, DType::Float32)),
        );
        let src = render_kernel(&k);
        assert!(src.contains("for (var ridx: i32 = 0; ridx < 3;"));
        assert!(src.contains("var acc: f32 = 0.0;"));
        assert!(src.contains("acc = "));
    }

    #[test]
    fn test_infinite_identity_bitcast() {
        let expr = ScalarExpr::global(0, ScalarExpr::gidx(4), DType::Float32);
        let k = Kernel::new(
            DType::Float32,
            1,
            expr,
            Some(Reduce::max(4, DType::Float32)),
        );
        let src = render_kernel(&k);
        assert!(src.contains("bitcast<f32>(0xff800000u)"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let gidx = ScalarExpr::gidx(16);
        let load = ScalarExpr::global(0, gidx, DType::Float32);
        let expr = load.sin().add(&load.cos());
        let k = Kernel::new(DType::Float32, 16, expr, None);
        assert_eq!(render_kernel(&k), render_kernel(&k));
    }
}
