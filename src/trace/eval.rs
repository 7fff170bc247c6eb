//! The concrete evaluator: primitive rules at the bottom of the
//! interpreter stack.
//!
//! Each rule constructs lazy-array expressions; nothing executes here.
//! Pointwise primitives extend the fused expression, view primitives
//! rewrite the shape tracker, and reductions open a kernel.

use crate::array::Array;
use crate::expr::ScalarExpr;
use crate::lazy::{LazyArray, ReduceKind};
use crate::trace::primitive::{abstract_eval, AbstractValue, CompareOp, Primitive};
use crate::{DType, Result};

/// Boolean negation in the scalar IR.
fn not_expr(e: &ScalarExpr) -> ScalarExpr {
    e.cmpne(&ScalarExpr::constant(crate::expr::Literal::Bool(true)))
}

pub(crate) fn process_eval(prim: &Primitive, inputs: &[Array]) -> Result<Vec<Array>> {
    let avals: Vec<AbstractValue> = inputs.iter().map(|a| a.aval().clone()).collect();
    abstract_eval(prim, &avals)?;

    let xs: Vec<LazyArray> = inputs
        .iter()
        .map(|a| a.concrete().cloned())
        .collect::<Result<_>>()?;
    let refs: Vec<&LazyArray> = xs.iter().collect();
    let dtype = avals[0].dtype;

    let out = match prim {
        Primitive::Add => LazyArray::pointwise(&refs, dtype, |e| e[0].add(&e[1]))?,
        Primitive::Mul => LazyArray::pointwise(&refs, dtype, |e| e[0].mul(&e[1]))?,
        Primitive::Idiv => LazyArray::pointwise(&refs, dtype, |e| e[0].idiv(&e[1]))?,
        Primitive::Mod => LazyArray::pointwise(&refs, dtype, |e| e[0].modulo(&e[1]))?,
        Primitive::Neg => {
            LazyArray::pointwise(&refs, dtype, |e| ScalarExpr::zero(dtype).sub(&e[0]))?
        }
        Primitive::Reciprocal => LazyArray::pointwise(&refs, dtype, |e| e[0].recip())?,
        Primitive::Sin => LazyArray::pointwise(&refs, dtype, |e| e[0].sin())?,
        Primitive::Cos => LazyArray::pointwise(&refs, dtype, |e| e[0].cos())?,
        Primitive::Min => LazyArray::pointwise(&refs, dtype, |e| {
            ScalarExpr::select(&e[1].cmplt(&e[0]), &e[1], &e[0])
        })?,
        Primitive::Max => LazyArray::pointwise(&refs, dtype, |e| {
            ScalarExpr::select(&e[0].cmplt(&e[1]), &e[1], &e[0])
        })?,
        Primitive::Compare(op) => {
            let op = *op;
            LazyArray::pointwise(&refs, DType::Bool, move |e| match op {
                CompareOp::Lt => e[0].cmplt(&e[1]),
                CompareOp::Gt => e[1].cmplt(&e[0]),
                CompareOp::Le => not_expr(&e[1].cmplt(&e[0])),
                CompareOp::Ge => not_expr(&e[0].cmplt(&e[1])),
                CompareOp::Ne => e[0].cmpne(&e[1]),
                CompareOp::Eq => not_expr(&e[0].cmpne(&e[1])),
            })?
        }
        Primitive::Where => {
            let arm_dtype = avals[1].dtype;
            LazyArray::pointwise(&refs, arm_dtype, |e| {
                ScalarExpr::select(&e[0], &e[1], &e[2])
            })?
        }
        Primitive::ReduceSum { axes } => xs[0].reduce(axes, ReduceKind::Sum)?,
        Primitive::ReduceMax { axes } => xs[0].reduce(axes, ReduceKind::Max)?,
        Primitive::ReduceMin { axes } => xs[0].reduce(axes, ReduceKind::Min)?,
        Primitive::Transpose { perm } => xs[0].view_op(|st| st.permute(perm))?,
        Primitive::Broadcast { shape, dims } => {
            let in_shape = avals[0].shape.as_slice().to_vec();
            let mut mid = vec![1; shape.len()];
            for (i, &d) in dims.iter().enumerate() {
                mid[d] = in_shape[i];
            }
            xs[0].view_op(|st| st.reshape(&mid)?.expand(shape))?
        }
        Primitive::Reshape { shape } => xs[0].view_op(|st| st.reshape(shape))?,
        Primitive::Flip { axes } => xs[0].view_op(|st| st.flip(axes))?,
        Primitive::Shrink { ranges } => xs[0].view_op(|st| st.shrink(ranges))?,
        Primitive::Pad { padding } => xs[0].view_op(|st| st.pad(padding))?,
        Primitive::JitCall { jaxpr, .. } => {
            return crate::trace::fusion::lower_jaxpr(jaxpr, inputs);
        }
    };
    Ok(vec![Array::from_lazy(out)?])
}
