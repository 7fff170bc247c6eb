//! The user-facing array type.
//!
//! An [`Array`] wraps either a concrete lazy array or a tracer belonging
//! to an active transformation, so user functions written against
//! `Array` work unchanged under `jvp`, `vmap`, and `jit`. Shape and
//! dtype are known for every variant; data access requires a concrete
//! value.

use crate::device::{default_device, Device};
use crate::expr::Literal;
use crate::lazy::LazyArray;
use crate::trace::{AbstractValue, JitVariable, TracerValue};
use crate::{DType, Error, Result, Shape};
use std::sync::Arc;

/// An n-dimensional array, possibly lazy, possibly traced.
#[derive(Debug, Clone)]
pub struct Array {
    value: TracerValue,
    aval: AbstractValue,
}

impl Array {
    /// Wrap a tracer value, computing its abstract value.
    pub(crate) fn from_value(value: TracerValue) -> Array {
        let aval = match &value {
            TracerValue::Concrete(l) => AbstractValue::new(
                l.shape().expect("fresh array is live"),
                l.dtype().expect("fresh array is live"),
            ),
            TracerValue::Jvp(p) => p.primal.aval.clone(),
            TracerValue::Batched(b) => {
                let mut dims = b.value.shape().as_slice().to_vec();
                if let Some(d) = b.bdim {
                    dims.remove(d);
                }
                AbstractValue::new(Shape::new(dims), b.value.dtype())
            }
            TracerValue::Jit(v) => v.aval.clone(),
        };
        Array { value, aval }
    }

    /// Wrap a concrete lazy array.
    pub(crate) fn from_lazy(lazy: LazyArray) -> Result<Array> {
        let aval = AbstractValue::new(lazy.shape()?, lazy.dtype()?);
        Ok(Array {
            value: TracerValue::Concrete(lazy),
            aval,
        })
    }

    /// Wrap a recorded-program variable.
    pub(crate) fn from_jit_var(level: usize, var: usize, aval: AbstractValue) -> Array {
        Array {
            value: TracerValue::Jit(Arc::new(JitVariable {
                level,
                var,
                aval: aval.clone(),
            })),
            aval,
        }
    }

    /// The tracer value inside.
    pub(crate) fn value(&self) -> &TracerValue {
        &self.value
    }

    /// The concrete lazy array, or an error under an active trace.
    pub(crate) fn concrete(&self) -> Result<&LazyArray> {
        match &self.value {
            TracerValue::Concrete(l) => Ok(l),
            _ => Err(Error::Unsupported(
                "cannot read the value of a traced array; return it from the \
                 transformed function instead"
                    .into(),
            )),
        }
    }

    /// Shape and dtype as one value.
    pub fn aval(&self) -> &AbstractValue {
        &self.aval
    }

    /// The array's shape.
    pub fn shape(&self) -> &Shape {
        &self.aval.shape
    }

    /// The array's dtype.
    pub fn dtype(&self) -> DType {
        self.aval.dtype
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.aval.shape.ndim()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.aval.shape.size()
    }

    /// True for zero-dimensional arrays.
    pub fn is_scalar(&self) -> bool {
        self.aval.shape.is_scalar()
    }

    /// The device holding the array's data.
    pub fn device(&self) -> Result<Device> {
        self.concrete()?.device()
    }

    /// Materialize and read back as `f32` values (converting from the
    /// array's dtype).
    pub fn data(&self) -> Result<Vec<f32>> {
        let words = self.concrete()?.read_words()?;
        Ok(match self.dtype() {
            DType::Float32 | DType::Float16 => {
                words.into_iter().map(f32::from_bits).collect()
            }
            DType::Int32 => words.into_iter().map(|w| w as i32 as f32).collect(),
            DType::Uint32 => words.into_iter().map(|w| w as f32).collect(),
            DType::Bool => words
                .into_iter()
                .map(|w| if w != 0 { 1.0 } else { 0.0 })
                .collect(),
        })
    }

    /// Materialize and read back raw `u32` words.
    pub fn data_u32(&self) -> Result<Vec<u32>> {
        self.concrete()?.read_words()
    }

    /// Materialize and read back as `i32` values.
    pub fn data_i32(&self) -> Result<Vec<i32>> {
        Ok(self
            .concrete()?
            .read_words()?
            .into_iter()
            .map(|w| w as i32)
            .collect())
    }

    /// Materialize and read back as booleans.
    pub fn data_bool(&self) -> Result<Vec<bool>> {
        Ok(self
            .concrete()?
            .read_words()?
            .into_iter()
            .map(|w| w != 0)
            .collect())
    }

    /// The single element of a size-1 array, as `f32`.
    pub fn item(&self) -> Result<f32> {
        let data = self.data()?;
        if data.len() != 1 {
            return Err(Error::Shape(format!(
                "item() requires exactly one element, got {}",
                data.len()
            )));
        }
        Ok(data[0])
    }

    /// Release the array's buffers. A second dispose, or any later data
    /// access, is a reference error.
    pub fn dispose(&self) -> Result<()> {
        self.concrete()?.dispose()
    }
}

fn device_of(value: &TracerValue) -> Device {
    match value {
        TracerValue::Concrete(l) => l.device().unwrap_or_else(|_| default_device()),
        TracerValue::Jvp(p) => device_of(p.primal.value()),
        TracerValue::Batched(b) => device_of(b.value.value()),
        TracerValue::Jit(_) => default_device(),
    }
}

/// A concrete zero array with the shape and dtype of `x`, on its
/// device. The structural zero used for missing tangents.
pub(crate) fn zeros_like(x: &Array) -> Array {
    Array::from_lazy(LazyArray::full(
        device_of(x.value()),
        x.dtype(),
        x.shape().as_slice().to_vec(),
        Literal::zero(x.dtype()),
    ))
    .expect("fresh array is live")
}
