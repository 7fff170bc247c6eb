//! Automatic vectorization (vmap).
//!
//! A batch tracer wraps a value whose shape hides one batch dimension.
//! Each primitive has a batching rule: pointwise ops move every batch
//! axis to position 0 (broadcasting unbatched operands), reductions and
//! view ops rewrite their parameters so the batch dimension threads
//! through unchanged.

use crate::array::Array;
use crate::trace::interpreter::{bind, bind1, BatchedValue, TraceGuard, TraceKind, TracerValue};
use crate::trace::jit::interpret_jaxpr;
use crate::trace::primitive::Primitive;
use crate::{Error, Result};
use std::sync::Arc;

fn batched(level: usize, value: Array, bdim: Option<usize>) -> Array {
    match bdim {
        // A tracer with no batch dimension carries no transform-level
        // information; lower it to its inner value.
        None => value,
        Some(_) => Array::from_value(TracerValue::Batched(Arc::new(BatchedValue {
            level,
            value,
            bdim,
        }))),
    }
}

/// Move one axis of `v` to a new position.
fn moveaxis(v: &Array, from: usize, to: usize) -> Result<Array> {
    if from == to {
        return Ok(v.clone());
    }
    let ndim = v.ndim();
    let mut perm: Vec<usize> = (0..ndim).filter(|&d| d != from).collect();
    perm.insert(to, from);
    bind1(Primitive::Transpose { perm }, std::slice::from_ref(v))
}

/// Broadcast an unbatched value to carry a leading batch axis.
fn lead_batch(v: &Array, bsize: usize) -> Result<Array> {
    let mut shape = vec![bsize];
    shape.extend(v.shape().as_slice());
    let dims: Vec<usize> = (1..shape.len()).collect();
    bind1(Primitive::Broadcast { shape, dims }, std::slice::from_ref(v))
}

pub(crate) fn process_batch(
    prim: &Primitive,
    inputs: &[Array],
    level: usize,
) -> Result<Vec<Array>> {
    let mut vals = Vec::with_capacity(inputs.len());
    let mut bdims: Vec<Option<usize>> = Vec::with_capacity(inputs.len());
    for a in inputs {
        match a.value() {
            TracerValue::Batched(b) if b.level == level => {
                vals.push(b.value.clone());
                bdims.push(b.bdim);
            }
            _ => {
                vals.push(a.clone());
                bdims.push(None);
            }
        }
    }

    // Every batched operand must agree on the batch-axis length.
    let mut bsize: Option<usize> = None;
    for (v, d) in vals.iter().zip(&bdims) {
        if let Some(d) = d {
            let s = v.shape().as_slice()[*d];
            match bsize {
                None => bsize = Some(s),
                Some(prev) if prev != s => {
                    return Err(Error::Shape(format!(
                        "vmap: mismatched batch sizes {} and {}",
                        prev, s
                    )))
                }
                _ => {}
            }
        }
    }
    let Some(bsize) = bsize else {
        // No operand is batched at this level; forward unchanged.
        return bind(prim.clone(), &vals);
    };

    if prim.is_pointwise() {
        let mut moved = Vec::with_capacity(vals.len());
        for (v, d) in vals.iter().zip(&bdims) {
            moved.push(match d {
                Some(d) => moveaxis(v, *d, 0)?,
                None => lead_batch(v, bsize)?,
            });
        }
        let outs = bind(prim.clone(), &moved)?;
        return Ok(outs
            .into_iter()
            .map(|o| batched(level, o, Some(0)))
            .collect());
    }

    if let Primitive::JitCall { jaxpr, .. } = prim {
        // Inline the recorded program under the batch trace.
        return interpret_jaxpr(jaxpr, inputs);
    }

    let (v, d) = (&vals[0], bdims[0].expect("single-operand rule with a batched operand"));
    let out = match prim {
        Primitive::ReduceSum { axes }
        | Primitive::ReduceMax { axes }
        | Primitive::ReduceMin { axes } => {
            let shifted: Vec<usize> = axes.iter().map(|&a| if a >= d { a + 1 } else { a }).collect();
            let out_bdim = d - axes.iter().filter(|&&a| a < d).count();
            let prim = match prim {
                Primitive::ReduceSum { .. } => Primitive::ReduceSum { axes: shifted },
                Primitive::ReduceMax { .. } => Primitive::ReduceMax { axes: shifted },
                _ => Primitive::ReduceMin { axes: shifted },
            };
            batched(level, bind1(prim, std::slice::from_ref(v))?, Some(out_bdim))
        }
        Primitive::Transpose { perm } => {
            let v = moveaxis(v, d, 0)?;
            let mut shifted = vec![0];
            shifted.extend(perm.iter().map(|&p| p + 1));
            batched(
                level,
                bind1(Primitive::Transpose { perm: shifted }, &[v])?,
                Some(0),
            )
        }
        Primitive::Reshape { shape } => {
            let v = moveaxis(v, d, 0)?;
            let mut shifted = vec![bsize];
            shifted.extend(shape);
            batched(
                level,
                bind1(Primitive::Reshape { shape: shifted }, &[v])?,
                Some(0),
            )
        }
        Primitive::Broadcast { shape, dims } => {
            let v = moveaxis(v, d, 0)?;
            let mut out_shape = vec![bsize];
            out_shape.extend(shape);
            let mut out_dims = vec![0];
            out_dims.extend(dims.iter().map(|&p| p + 1));
            batched(
                level,
                bind1(
                    Primitive::Broadcast {
                        shape: out_shape,
                        dims: out_dims,
                    },
                    &[v],
                )?,
                Some(0),
            )
        }
        Primitive::Flip { axes } => {
            let shifted: Vec<usize> = axes.iter().map(|&a| if a >= d { a + 1 } else { a }).collect();
            batched(
                level,
                bind1(Primitive::Flip { axes: shifted }, std::slice::from_ref(v))?,
                Some(d),
            )
        }
        Primitive::Shrink { ranges } => {
            let mut shifted = ranges.clone();
            shifted.insert(d, (0, bsize));
            batched(
                level,
                bind1(Primitive::Shrink { ranges: shifted }, std::slice::from_ref(v))?,
                Some(d),
            )
        }
        Primitive::Pad { padding } => {
            let mut shifted = padding.clone();
            shifted.insert(d, (0, 0));
            batched(
                level,
                bind1(Primitive::Pad { padding: shifted }, std::slice::from_ref(v))?,
                Some(d),
            )
        }
        _ => unreachable!("pointwise and call primitives handled above"),
    };
    Ok(vec![out])
}

/// Flat vmap core: map `f` over the axes named in `in_axes` (one entry
/// per argument, `None` for unbatched), stacking outputs on axis 0.
pub(crate) fn vmap_flat<F>(
    f: &F,
    args: &[Array],
    in_axes: &[Option<usize>],
) -> Result<Vec<Array>>
where
    F: Fn(&[Array]) -> Result<Vec<Array>>,
{
    if args.len() != in_axes.len() {
        return Err(Error::TreeMismatch(format!(
            "{} arguments vs {} in_axes entries",
            args.len(),
            in_axes.len()
        )));
    }
    let mut bsize: Option<usize> = None;
    for (a, ax) in args.iter().zip(in_axes) {
        if let Some(ax) = ax {
            if *ax >= a.ndim() {
                return Err(Error::Shape(format!(
                    "vmap axis {} out of bounds for shape {}",
                    ax,
                    a.shape()
                )));
            }
            let s = a.shape().as_slice()[*ax];
            match bsize {
                None => bsize = Some(s),
                Some(prev) if prev != s => {
                    return Err(Error::Shape(format!(
                        "vmap: mismatched batch sizes {} and {}",
                        prev, s
                    )))
                }
                _ => {}
            }
        }
    }
    let bsize = bsize.ok_or_else(|| {
        Error::Shape("vmap requires at least one batched argument".into())
    })?;

    let (raw, level) = {
        let guard = TraceGuard::push(TraceKind::Batch, false);
        let level = guard.level();
        let wrapped: Vec<Array> = args
            .iter()
            .zip(in_axes)
            .map(|(a, ax)| match ax {
                Some(ax) => batched(level, a.clone(), Some(*ax)),
                None => a.clone(),
            })
            .collect();
        (f(&wrapped)?, level)
    };

    raw.into_iter()
        .map(|out| match out.value().clone() {
            TracerValue::Batched(b) if b.level == level => {
                moveaxis(&b.value, b.bdim.expect("batched tracer has an axis"), 0)
            }
            _ => lead_batch(&out, bsize),
        })
        .collect()
}

/// Vectorize a one-argument function over a batch axis.
///
/// # Examples
///
/// ```
/// use lazyjax::{vmap, Array, Shape};
///
/// let sum_rows = vmap(|x: &Array| x.sum_all(), 0);
/// let x = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0], Shape::new(vec![2, 2])).unwrap();
/// assert_eq!(sum_rows(&x).unwrap().data().unwrap(), vec![3.0, 7.0]);
/// ```
pub fn vmap<F>(f: F, in_axis: usize) -> impl Fn(&Array) -> Result<Array>
where
    F: Fn(&Array) -> Result<Array>,
{
    move |x: &Array| {
        let mut outs = vmap_flat(
            &|xs: &[Array]| Ok(vec![f(&xs[0])?]),
            std::slice::from_ref(x),
            &[Some(in_axis)],
        )?;
        Ok(outs.remove(0))
    }
}

/// Vectorize a two-argument function; both arguments batch on the same
/// axis.
pub fn vmap2<F>(f: F, in_axis: usize) -> impl Fn(&Array, &Array) -> Result<Array>
where
    F: Fn(&Array, &Array) -> Result<Array>,
{
    move |x: &Array, y: &Array| {
        let mut outs = vmap_flat(
            &|xs: &[Array]| Ok(vec![f(&xs[0], &xs[1])?]),
            &[x.clone(), y.clone()],
            &[Some(in_axis), Some(in_axis)],
        )?;
        Ok(outs.remove(0))
    }
}
