//! Kernel descriptors: a pointwise scalar expression plus an optional
//! reduction, dispatched over a linear output index.

use crate::expr::{Literal, ScalarExpr};
use crate::DType;
use std::fmt::Write;

/// Reduction descriptor attached to a kernel.
///
/// The kernel folds `expr` over `ridx in [0, axis_size)` with `combine`
/// (an expression over the `acc` and `val` specials), starting from
/// `identity`, then applies `epilogue` (over `acc` and `gidx`) before the
/// store.
#[derive(Debug, Clone)]
pub struct Reduce {
    /// Exclusive bound of the reduction index `ridx`.
    pub axis_size: usize,
    /// Initial accumulator value.
    pub identity: Literal,
    /// Combine expression over `acc` and `val`.
    pub combine: ScalarExpr,
    /// Optional epilogue over `acc` (and `gidx`), applied before store.
    pub epilogue: Option<ScalarExpr>,
}

impl Reduce {
    /// A sum reduction over `axis_size` elements.
    pub fn sum(axis_size: usize, dtype: DType) -> Reduce {
        Reduce {
            axis_size,
            identity: Literal::zero(dtype),
            combine: ScalarExpr::acc(dtype).add(&ScalarExpr::val(dtype)),
            epilogue: None,
        }
    }

    /// A max reduction over `axis_size` elements.
    pub fn max(axis_size: usize, dtype: DType) -> Reduce {
        let acc = ScalarExpr::acc(dtype);
        let val = ScalarExpr::val(dtype);
        Reduce {
            axis_size,
            identity: min_identity(dtype),
            combine: ScalarExpr::select(&acc.cmplt(&val), &val, &acc),
            epilogue: None,
        }
    }

    /// A min reduction over `axis_size` elements.
    pub fn min(axis_size: usize, dtype: DType) -> Reduce {
        let acc = ScalarExpr::acc(dtype);
        let val = ScalarExpr::val(dtype);
        Reduce {
            axis_size,
            identity: max_identity(dtype),
            combine: ScalarExpr::select(&val.cmplt(&acc), &val, &acc),
            epilogue: None,
        }
    }
}

fn min_identity(dtype: DType) -> Literal {
    match dtype {
        DType::Float32 | DType::Float16 => Literal::F32(f32::NEG_INFINITY),
        DType::Int32 => Literal::I32(i32::MIN),
        DType::Uint32 => Literal::U32(0),
        DType::Bool => Literal::Bool(false),
    }
}

fn max_identity(dtype: DType) -> Literal {
    match dtype {
        DType::Float32 | DType::Float16 => Literal::F32(f32::INFINITY),
        DType::Int32 => Literal::I32(i32::MAX),
        DType::Uint32 => Literal::U32(u32::MAX),
        DType::Bool => Literal::Bool(true),
    }
}

/// A fused kernel: output dtype and size, the scalar expression evaluated
/// at each output index, and an optional reduction.
#[derive(Debug, Clone)]
pub struct Kernel {
    /// Output element dtype.
    pub dtype: DType,
    /// Number of output elements.
    pub size: usize,
    /// Pointwise body over `gidx` (and `ridx` under a reduction).
    pub expr: ScalarExpr,
    /// Optional reduction descriptor.
    pub reduce: Option<Reduce>,
}

impl Kernel {
    /// Build a kernel, simplifying the body.
    pub fn new(dtype: DType, size: usize, expr: ScalarExpr, reduce: Option<Reduce>) -> Kernel {
        let reduce = reduce.map(|r| Reduce {
            combine: r.combine.simplify(),
            epilogue: r.epilogue.map(|e| e.simplify()),
            ..r
        });
        Kernel {
            dtype,
            size,
            expr: expr.simplify(),
            reduce,
        }
    }

    /// Number of bound input buffers: highest referenced gid plus one.
    pub fn nargs(&self) -> usize {
        let mut max = self.expr.max_gid();
        if let Some(r) = &self.reduce {
            max = max.max(r.combine.max_gid());
            if let Some(e) = &r.epilogue {
                max = max.max(e.max_gid());
            }
        }
        max.map_or(0, |g| g + 1)
    }

    /// A stable textual key identifying the compiled form of this kernel.
    ///
    /// Backends cache prepared executables by this key; two kernels with
    /// equal keys compile to identical programs.
    pub fn source_key(&self) -> String {
        let mut key = String::new();
        let _ = write!(key, "{}|{}|{}", self.dtype, self.size, self.expr);
        if let Some(r) = &self.reduce {
            let _ = write!(key, "|r{}:{}:{}", r.axis_size, r.identity, r.combine);
            if let Some(e) = &r.epilogue {
                let _ = write!(key, ":{}", e);
            }
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nargs_from_max_gid() {
        let idx = ScalarExpr::gidx(8);
        let expr = ScalarExpr::global(0, idx.clone(), DType::Float32)
            .add(&ScalarExpr::global(2, idx, DType::Float32));
        let k = Kernel::new(DType::Float32, 8, expr, None);
        assert_eq!(k.nargs(), 3);
    }

    #[test]
    fn test_nargs_zero_without_loads() {
        let k = Kernel::new(DType::Float32, 4, ScalarExpr::f32(1.0), None);
        assert_eq!(k.nargs(), 0);
    }

    #[test]
    fn test_source_key_stable() {
        let idx = ScalarExpr::gidx(8);
        let expr = ScalarExpr::global(0, idx, DType::Float32);
        let a = Kernel::new(DType::Float32, 8, expr.clone(), None);
        let b = Kernel::new(DType::Float32, 8, expr, None);
        assert_eq!(a.source_key(), b.source_key());
    }

    #[test]
    fn test_reduce_descriptors() {
        let r = Reduce::sum(16, DType::Float32);
        assert_eq!(r.identity, Literal::F32(0.0));
        let r = Reduce::max(16, DType::Float32);
        assert_eq!(r.identity, Literal::F32(f32::NEG_INFINITY));
        let r = Reduce::min(16, DType::Int32);
        assert_eq!(r.identity, Literal::I32(i32::MAX));
    }
}
