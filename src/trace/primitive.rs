//! Primitive operations recognized by every transform, and their
//! abstract (shape/dtype) evaluation.

use crate::trace::jit::Jaxpr;
use crate::{DType, Error, Result, Shape};
use std::sync::Arc;

/// Comparison operator carried by [`Primitive::Compare`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

/// The primitive set. Pointwise primitives are strict: operands must
/// already share shape and dtype (the public ops layer broadcasts and
/// checks before binding).
#[derive(Debug, Clone)]
pub enum Primitive {
    /// Elementwise addition (boolean OR)
    Add,
    /// Elementwise multiplication (boolean AND)
    Mul,
    /// Integer floor division
    Idiv,
    /// Complement of floor division
    Mod,
    /// Negation
    Neg,
    /// Multiplicative inverse (float)
    Reciprocal,
    /// Sine (float)
    Sin,
    /// Cosine (float)
    Cos,
    /// Elementwise minimum
    Min,
    /// Elementwise maximum
    Max,
    /// Elementwise comparison, boolean result
    Compare(CompareOp),
    /// Sum over the given (sorted) axes
    ReduceSum {
        /// Axes to reduce, sorted ascending
        axes: Vec<usize>,
    },
    /// Maximum over the given (sorted) axes. No differentiation rule.
    ReduceMax {
        /// Axes to reduce, sorted ascending
        axes: Vec<usize>,
    },
    /// Minimum over the given (sorted) axes. No differentiation rule.
    ReduceMin {
        /// Axes to reduce, sorted ascending
        axes: Vec<usize>,
    },
    /// Ternary select
    Where,
    /// Dimension permutation
    Transpose {
        /// Output dimension order
        perm: Vec<usize>,
    },
    /// Broadcast into a larger shape; `dims[i]` is the output dimension
    /// that input dimension `i` maps to.
    Broadcast {
        /// Output shape
        shape: Vec<usize>,
        /// Mapping of input dims to output dims, strictly increasing
        dims: Vec<usize>,
    },
    /// Reshape to a new shape of equal size
    Reshape {
        /// Output shape
        shape: Vec<usize>,
    },
    /// Reverse the given axes
    Flip {
        /// Axes to reverse
        axes: Vec<usize>,
    },
    /// Restrict each dimension to `[begin, end)`
    Shrink {
        /// Per-dimension ranges
        ranges: Vec<(usize, usize)>,
    },
    /// Zero-pad each dimension by `(before, after)`
    Pad {
        /// Per-dimension padding
        padding: Vec<(usize, usize)>,
    },
    /// Call of a recorded straight-line program
    JitCall {
        /// The recorded program
        jaxpr: Arc<Jaxpr>,
        /// How many leading inputs are captured constants
        num_consts: usize,
    },
}

impl Primitive {
    /// A short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Add => "add",
            Primitive::Mul => "mul",
            Primitive::Idiv => "idiv",
            Primitive::Mod => "mod",
            Primitive::Neg => "neg",
            Primitive::Reciprocal => "reciprocal",
            Primitive::Sin => "sin",
            Primitive::Cos => "cos",
            Primitive::Min => "min",
            Primitive::Max => "max",
            Primitive::Compare(_) => "compare",
            Primitive::ReduceSum { .. } => "reduce_sum",
            Primitive::ReduceMax { .. } => "reduce_max",
            Primitive::ReduceMin { .. } => "reduce_min",
            Primitive::Where => "where",
            Primitive::Transpose { .. } => "transpose",
            Primitive::Broadcast { .. } => "broadcast",
            Primitive::Reshape { .. } => "reshape",
            Primitive::Flip { .. } => "flip",
            Primitive::Shrink { .. } => "shrink",
            Primitive::Pad { .. } => "pad",
            Primitive::JitCall { .. } => "jit_call",
        }
    }

    /// True for elementwise primitives (including comparisons and
    /// select), which fuse freely.
    pub fn is_pointwise(&self) -> bool {
        matches!(
            self,
            Primitive::Add
                | Primitive::Mul
                | Primitive::Idiv
                | Primitive::Mod
                | Primitive::Neg
                | Primitive::Reciprocal
                | Primitive::Sin
                | Primitive::Cos
                | Primitive::Min
                | Primitive::Max
                | Primitive::Compare(_)
                | Primitive::Where
        )
    }

    /// True for view primitives, which never materialize a buffer.
    pub fn is_view(&self) -> bool {
        matches!(
            self,
            Primitive::Transpose { .. }
                | Primitive::Broadcast { .. }
                | Primitive::Reshape { .. }
                | Primitive::Flip { .. }
                | Primitive::Shrink { .. }
                | Primitive::Pad { .. }
        )
    }
}

/// Shape and dtype of a traced value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbstractValue {
    /// The value's shape
    pub shape: Shape,
    /// The value's dtype
    pub dtype: DType,
}

impl AbstractValue {
    /// Build an abstract value.
    pub fn new(shape: Shape, dtype: DType) -> Self {
        AbstractValue { shape, dtype }
    }
}

fn same_operands(prim: &Primitive, avals: &[&AbstractValue]) -> Result<()> {
    for pair in avals.windows(2) {
        if pair[0].shape != pair[1].shape {
            return Err(Error::Shape(format!(
                "{}: operand shapes {} and {} differ",
                prim.name(),
                pair[0].shape,
                pair[1].shape
            )));
        }
        if pair[0].dtype != pair[1].dtype {
            return Err(Error::Dtype(format!(
                "{}: operand dtypes {} and {} differ",
                prim.name(),
                pair[0].dtype,
                pair[1].dtype
            )));
        }
    }
    Ok(())
}

fn arity(prim: &Primitive, avals: &[AbstractValue], n: usize) -> Result<()> {
    if avals.len() != n {
        return Err(Error::Shape(format!(
            "{} expects {} operands, got {}",
            prim.name(),
            n,
            avals.len()
        )));
    }
    Ok(())
}

/// Compute output abstract values for a primitive application.
pub fn abstract_eval(prim: &Primitive, avals: &[AbstractValue]) -> Result<Vec<AbstractValue>> {
    match prim {
        Primitive::Add | Primitive::Mul | Primitive::Min | Primitive::Max => {
            arity(prim, avals, 2)?;
            same_operands(prim, &[&avals[0], &avals[1]])?;
            Ok(vec![avals[0].clone()])
        }
        Primitive::Idiv | Primitive::Mod => {
            arity(prim, avals, 2)?;
            same_operands(prim, &[&avals[0], &avals[1]])?;
            if !avals[0].dtype.is_int() {
                return Err(Error::Dtype(format!(
                    "{} requires integer operands, got {}",
                    prim.name(),
                    avals[0].dtype
                )));
            }
            Ok(vec![avals[0].clone()])
        }
        Primitive::Neg => {
            arity(prim, avals, 1)?;
            if avals[0].dtype == DType::Bool {
                return Err(Error::Dtype("neg is not defined for bool".into()));
            }
            Ok(vec![avals[0].clone()])
        }
        Primitive::Reciprocal | Primitive::Sin | Primitive::Cos => {
            arity(prim, avals, 1)?;
            if !avals[0].dtype.is_float() {
                return Err(Error::Dtype(format!(
                    "{} requires a float operand, got {}",
                    prim.name(),
                    avals[0].dtype
                )));
            }
            Ok(vec![avals[0].clone()])
        }
        Primitive::Compare(_) => {
            arity(prim, avals, 2)?;
            same_operands(prim, &[&avals[0], &avals[1]])?;
            Ok(vec![AbstractValue::new(avals[0].shape.clone(), DType::Bool)])
        }
        Primitive::ReduceSum { axes }
        | Primitive::ReduceMax { axes }
        | Primitive::ReduceMin { axes } => {
            arity(prim, avals, 1)?;
            let shape = avals[0].shape.as_slice();
            for &a in axes {
                if a >= shape.len() {
                    return Err(Error::Shape(format!(
                        "reduction axis {} out of bounds for shape {}",
                        a, avals[0].shape
                    )));
                }
            }
            let kept: Vec<usize> = shape
                .iter()
                .enumerate()
                .filter(|(d, _)| !axes.contains(d))
                .map(|(_, &s)| s)
                .collect();
            Ok(vec![AbstractValue::new(Shape::new(kept), avals[0].dtype)])
        }
        Primitive::Where => {
            arity(prim, avals, 3)?;
            if avals[0].dtype != DType::Bool {
                return Err(Error::Dtype(format!(
                    "where condition must be bool, got {}",
                    avals[0].dtype
                )));
            }
            same_operands(prim, &[&avals[1], &avals[2]])?;
            if avals[0].shape != avals[1].shape {
                return Err(Error::Shape(format!(
                    "where condition shape {} does not match arms {}",
                    avals[0].shape, avals[1].shape
                )));
            }
            Ok(vec![avals[1].clone()])
        }
        Primitive::Transpose { perm } => {
            arity(prim, avals, 1)?;
            let shape = avals[0].shape.as_slice();
            if perm.len() != shape.len() {
                return Err(Error::Shape(format!(
                    "transpose permutation {:?} does not match rank {}",
                    perm,
                    shape.len()
                )));
            }
            let mut seen = vec![false; perm.len()];
            for &p in perm {
                if p >= perm.len() || seen[p] {
                    return Err(Error::Shape(format!("invalid permutation {:?}", perm)));
                }
                seen[p] = true;
            }
            let out: Vec<usize> = perm.iter().map(|&p| shape[p]).collect();
            Ok(vec![AbstractValue::new(Shape::new(out), avals[0].dtype)])
        }
        Primitive::Broadcast { shape, dims } => {
            arity(prim, avals, 1)?;
            let in_shape = avals[0].shape.as_slice();
            if dims.len() != in_shape.len() {
                return Err(Error::Shape(format!(
                    "broadcast dims {:?} do not match input rank {}",
                    dims,
                    in_shape.len()
                )));
            }
            for w in dims.windows(2) {
                if w[0] >= w[1] {
                    return Err(Error::Shape(format!(
                        "broadcast dims {:?} must be strictly increasing",
                        dims
                    )));
                }
            }
            for (i, &d) in dims.iter().enumerate() {
                if d >= shape.len() {
                    return Err(Error::Shape(format!(
                        "broadcast dim {} out of bounds for target {:?}",
                        d, shape
                    )));
                }
                if in_shape[i] != shape[d] && in_shape[i] != 1 {
                    return Err(Error::Shape(format!(
                        "cannot broadcast dimension of size {} to {}",
                        in_shape[i], shape[d]
                    )));
                }
            }
            Ok(vec![AbstractValue::new(
                Shape::new(shape.clone()),
                avals[0].dtype,
            )])
        }
        Primitive::Reshape { shape } => {
            arity(prim, avals, 1)?;
            if avals[0].shape.size() != shape.iter().product::<usize>() {
                return Err(Error::Shape(format!(
                    "cannot reshape {} into {:?}",
                    avals[0].shape, shape
                )));
            }
            Ok(vec![AbstractValue::new(
                Shape::new(shape.clone()),
                avals[0].dtype,
            )])
        }
        Primitive::Flip { axes } => {
            arity(prim, avals, 1)?;
            for &a in axes {
                if a >= avals[0].shape.ndim() {
                    return Err(Error::Shape(format!(
                        "flip axis {} out of bounds for shape {}",
                        a, avals[0].shape
                    )));
                }
            }
            Ok(vec![avals[0].clone()])
        }
        Primitive::Shrink { ranges } => {
            arity(prim, avals, 1)?;
            let shape = avals[0].shape.as_slice();
            if ranges.len() != shape.len() {
                return Err(Error::Shape("shrink ranges do not match rank".into()));
            }
            let mut out = Vec::with_capacity(ranges.len());
            for (d, &(b, e)) in ranges.iter().enumerate() {
                if b > e || e > shape[d] {
                    return Err(Error::Shape(format!(
                        "invalid slice [{}, {}) for dimension {} of size {}",
                        b, e, d, shape[d]
                    )));
                }
                out.push(e - b);
            }
            Ok(vec![AbstractValue::new(Shape::new(out), avals[0].dtype)])
        }
        Primitive::Pad { padding } => {
            arity(prim, avals, 1)?;
            let shape = avals[0].shape.as_slice();
            if padding.len() != shape.len() {
                return Err(Error::Shape("padding does not match rank".into()));
            }
            let out: Vec<usize> = shape
                .iter()
                .zip(padding)
                .map(|(&s, &(b, a))| b + s + a)
                .collect();
            Ok(vec![AbstractValue::new(Shape::new(out), avals[0].dtype)])
        }
        Primitive::JitCall { jaxpr, .. } => {
            if avals.len() != jaxpr.invars.len() {
                return Err(Error::Shape(format!(
                    "jit call expects {} inputs, got {}",
                    jaxpr.invars.len(),
                    avals.len()
                )));
            }
            for (got, want) in avals.iter().zip(&jaxpr.invars) {
                if got != want {
                    return Err(Error::Shape(format!(
                        "jit call input {}:{} does not match traced {}:{}",
                        got.shape, got.dtype, want.shape, want.dtype
                    )));
                }
            }
            Ok(jaxpr.out_avals())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aval(shape: &[usize], dtype: DType) -> AbstractValue {
        AbstractValue::new(Shape::new(shape.to_vec()), dtype)
    }

    #[test]
    fn test_pointwise_shapes() {
        let a = aval(&[2, 3], DType::Float32);
        let out = abstract_eval(&Primitive::Add, &[a.clone(), a.clone()]).unwrap();
        assert_eq!(out[0], a);

        let b = aval(&[3, 2], DType::Float32);
        assert!(matches!(
            abstract_eval(&Primitive::Add, &[a.clone(), b]),
            Err(Error::Shape(_))
        ));

        let c = aval(&[2, 3], DType::Int32);
        assert!(matches!(
            abstract_eval(&Primitive::Add, &[a, c]),
            Err(Error::Dtype(_))
        ));
    }

    #[test]
    fn test_compare_produces_bool() {
        let a = aval(&[4], DType::Float32);
        let out = abstract_eval(&Primitive::Compare(CompareOp::Lt), &[a.clone(), a]).unwrap();
        assert_eq!(out[0].dtype, DType::Bool);
    }

    #[test]
    fn test_reduce_drops_axes() {
        let a = aval(&[2, 3, 4], DType::Float32);
        let out = abstract_eval(&Primitive::ReduceSum { axes: vec![0, 2] }, &[a]).unwrap();
        assert_eq!(out[0].shape.as_slice(), &[3]);
    }

    #[test]
    fn test_broadcast_validation() {
        let a = aval(&[1, 3], DType::Float32);
        let ok = abstract_eval(
            &Primitive::Broadcast {
                shape: vec![4, 3],
                dims: vec![0, 1],
            },
            &[a.clone()],
        )
        .unwrap();
        assert_eq!(ok[0].shape.as_slice(), &[4, 3]);

        assert!(abstract_eval(
            &Primitive::Broadcast {
                shape: vec![4, 2],
                dims: vec![0, 1],
            },
            &[a],
        )
        .is_err());
    }

    #[test]
    fn test_sin_requires_float() {
        let a = aval(&[2], DType::Int32);
        assert!(matches!(
            abstract_eval(&Primitive::Sin, &[a]),
            Err(Error::Dtype(_))
        ));
    }

    #[test]
    fn test_pad_and_shrink() {
        let a = aval(&[3, 4], DType::Float32);
        let out = abstract_eval(
            &Primitive::Pad {
                padding: vec![(1, 1), (0, 2)],
            },
            &[a.clone()],
        )
        .unwrap();
        assert_eq!(out[0].shape.as_slice(), &[5, 6]);

        let out = abstract_eval(
            &Primitive::Shrink {
                ranges: vec![(0, 2), (1, 4)],
            },
            &[a],
        )
        .unwrap();
        assert_eq!(out[0].shape.as_slice(), &[2, 3]);
    }
}
