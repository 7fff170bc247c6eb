//! Array creation.

use crate::array::Array;
use crate::device::{default_device, Device};
use crate::expr::Literal;
use crate::lazy::LazyArray;
use crate::{DType, Error, Result, Shape};

fn literal_for(value: f32, dtype: DType) -> Literal {
    match dtype {
        DType::Float32 | DType::Float16 => Literal::F32(value),
        DType::Int32 => Literal::I32(value as i32),
        DType::Uint32 => Literal::U32(value as u32),
        DType::Bool => Literal::Bool(value != 0.0),
    }
}

impl Array {
    /// Create an array from f32 data on the default device.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lazyjax::{Array, Shape};
    /// let a = Array::from_vec(vec![1.0, 2.0, 3.0], Shape::new(vec![3])).unwrap();
    /// assert_eq!(a.data().unwrap(), vec![1.0, 2.0, 3.0]);
    /// ```
    pub fn from_vec(data: Vec<f32>, shape: Shape) -> Result<Array> {
        Self::from_vec_on(data, shape, default_device())
    }

    /// Create an array from f32 data on a specific device.
    pub fn from_vec_on(data: Vec<f32>, shape: Shape, device: Device) -> Result<Array> {
        if data.len() != shape.size() {
            return Err(Error::Shape(format!(
                "{} elements do not fill shape {}",
                data.len(),
                shape
            )));
        }
        let words: Vec<u32> = data.iter().map(|v| v.to_bits()).collect();
        Array::from_lazy(LazyArray::from_words(
            device,
            DType::Float32,
            shape.as_slice().to_vec(),
            &words,
        )?)
    }

    /// Create an Int32 array from data.
    pub fn from_vec_i32(data: Vec<i32>, shape: Shape) -> Result<Array> {
        if data.len() != shape.size() {
            return Err(Error::Shape(format!(
                "{} elements do not fill shape {}",
                data.len(),
                shape
            )));
        }
        let words: Vec<u32> = data.iter().map(|&v| v as u32).collect();
        Array::from_lazy(LazyArray::from_words(
            default_device(),
            DType::Int32,
            shape.as_slice().to_vec(),
            &words,
        )?)
    }

    /// Create a Uint32 array from data.
    pub fn from_vec_u32(data: Vec<u32>, shape: Shape) -> Result<Array> {
        if data.len() != shape.size() {
            return Err(Error::Shape(format!(
                "{} elements do not fill shape {}",
                data.len(),
                shape
            )));
        }
        Array::from_lazy(LazyArray::from_words(
            default_device(),
            DType::Uint32,
            shape.as_slice().to_vec(),
            &data,
        )?)
    }

    /// Create a Bool array from data.
    pub fn from_vec_bool(data: Vec<bool>, shape: Shape) -> Result<Array> {
        if data.len() != shape.size() {
            return Err(Error::Shape(format!(
                "{} elements do not fill shape {}",
                data.len(),
                shape
            )));
        }
        let words: Vec<u32> = data.iter().map(|&b| b as u32).collect();
        Array::from_lazy(LazyArray::from_words(
            default_device(),
            DType::Bool,
            shape.as_slice().to_vec(),
            &words,
        )?)
    }

    /// A zero-dimensional array holding one value.
    pub fn scalar(value: f32) -> Array {
        Array::full(value, Shape::scalar(), DType::Float32)
    }

    /// An array of zeros. Represented as a constant expression; no
    /// buffer is allocated until data is demanded.
    pub fn zeros(shape: Shape, dtype: DType) -> Array {
        Array::full(0.0, shape, dtype)
    }

    /// An array of zeros on a specific device.
    pub fn zeros_on(shape: Shape, dtype: DType, device: Device) -> Array {
        Array::full_on(0.0, shape, dtype, device)
    }

    /// An array of ones.
    pub fn ones(shape: Shape, dtype: DType) -> Array {
        Array::full(1.0, shape, dtype)
    }

    /// An array of ones on a specific device.
    pub fn ones_on(shape: Shape, dtype: DType, device: Device) -> Array {
        Array::full_on(1.0, shape, dtype, device)
    }

    /// An array filled with one value.
    pub fn full(value: f32, shape: Shape, dtype: DType) -> Array {
        Self::full_on(value, shape, dtype, default_device())
    }

    /// An array filled with one value on a specific device.
    pub fn full_on(value: f32, shape: Shape, dtype: DType, device: Device) -> Array {
        Array::from_lazy(LazyArray::full(
            device,
            dtype,
            shape.as_slice().to_vec(),
            literal_for(value, dtype),
        ))
        .expect("fresh array is live")
    }

    /// `[0, 1, ..., n)` as Int32, represented as the index expression.
    pub fn iota(n: usize) -> Array {
        Array::from_lazy(LazyArray::iota(default_device(), n)).expect("fresh array is live")
    }

    /// The identity matrix of order `n`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lazyjax::{Array, DType};
    /// let i = Array::eye(2, DType::Float32).unwrap();
    /// assert_eq!(i.data().unwrap(), vec![1.0, 0.0, 0.0, 1.0]);
    /// ```
    pub fn eye(n: usize, dtype: DType) -> Result<Array> {
        let rows = Array::iota(n).reshape(&[n, 1])?.broadcast_to(&[n, n])?;
        let cols = Array::iota(n).reshape(&[1, n])?.broadcast_to(&[n, n])?;
        let on_diag = rows.eq(&cols)?;
        on_diag.where_(
            &Array::full(1.0, Shape::new(vec![n, n]), dtype),
            &Array::full(0.0, Shape::new(vec![n, n]), dtype),
        )
    }

    /// Evenly spaced float values in `[start, stop)`.
    pub fn arange(start: f32, stop: f32, step: f32) -> Result<Array> {
        if step == 0.0 {
            return Err(Error::Shape("arange step must be nonzero".into()));
        }
        let n = (((stop - start) / step).ceil()).max(0.0) as usize;
        let data: Vec<f32> = (0..n).map(|i| start + i as f32 * step).collect();
        let shape = Shape::new(vec![n]);
        Array::from_vec(data, shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_ones_full() {
        let z = Array::zeros(Shape::new(vec![3, 3]), DType::Float32);
        assert!(z.data().unwrap().iter().all(|&v| v == 0.0));
        let o = Array::ones(Shape::new(vec![2]), DType::Float32);
        assert_eq!(o.data().unwrap(), vec![1.0, 1.0]);
        let f = Array::full(2.5, Shape::new(vec![2]), DType::Float32);
        assert_eq!(f.data().unwrap(), vec![2.5, 2.5]);
    }

    #[test]
    fn test_from_vec_size_check() {
        assert!(matches!(
            Array::from_vec(vec![1.0, 2.0], Shape::new(vec![3])),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_int_and_bool_arrays() {
        let i = Array::from_vec_i32(vec![-1, 0, 7], Shape::new(vec![3])).unwrap();
        assert_eq!(i.data_i32().unwrap(), vec![-1, 0, 7]);
        assert_eq!(i.dtype(), DType::Int32);

        let b = Array::from_vec_bool(vec![true, false], Shape::new(vec![2])).unwrap();
        assert_eq!(b.data_bool().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_iota() {
        let i = Array::iota(5);
        assert_eq!(i.data_i32().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_eye() {
        let e = Array::eye(3, DType::Float32).unwrap();
        assert_eq!(
            e.data().unwrap(),
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_arange() {
        let a = Array::arange(0.0, 5.0, 1.0).unwrap();
        assert_eq!(a.data().unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let b = Array::arange(1.0, 2.0, 0.25).unwrap();
        assert_eq!(b.data().unwrap(), vec![1.0, 1.25, 1.5, 1.75]);
    }
}
