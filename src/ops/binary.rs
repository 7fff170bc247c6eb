//! Elementwise binary operations with broadcasting.

use crate::array::Array;
use crate::trace::{bind1, Primitive};
use crate::{Error, Result, Shape};

/// Broadcast two arrays to a common shape.
pub(crate) fn broadcast_pair(a: &Array, b: &Array) -> Result<(Array, Array)> {
    if a.shape() == b.shape() {
        return Ok((a.clone(), b.clone()));
    }
    let target = a.shape().broadcast_with(b.shape()).ok_or_else(|| {
        Error::Shape(format!(
            "cannot broadcast {} with {}",
            a.shape(),
            b.shape()
        ))
    })?;
    Ok((
        a.broadcast_to(target.as_slice())?,
        b.broadcast_to(target.as_slice())?,
    ))
}

fn binary(prim: Primitive, a: &Array, b: &Array) -> Result<Array> {
    if a.dtype() != b.dtype() {
        return Err(Error::Dtype(format!(
            "{}: no implicit promotion between {} and {}",
            prim.name(),
            a.dtype(),
            b.dtype()
        )));
    }
    let (a, b) = broadcast_pair(a, b)?;
    bind1(prim, &[a, b])
}

impl Array {
    /// Elementwise addition (boolean OR for bool arrays).
    ///
    /// # Examples
    ///
    /// ```
    /// # use lazyjax::{Array, Shape};
    /// let a = Array::from_vec(vec![1.0, 2.0], Shape::new(vec![2])).unwrap();
    /// let b = Array::from_vec(vec![3.0, 4.0], Shape::new(vec![2])).unwrap();
    /// assert_eq!(a.add(&b).unwrap().data().unwrap(), vec![4.0, 6.0]);
    /// ```
    pub fn add(&self, other: &Array) -> Result<Array> {
        binary(Primitive::Add, self, other)
    }

    /// Elementwise subtraction.
    pub fn sub(&self, other: &Array) -> Result<Array> {
        binary(Primitive::Add, self, &other.neg()?)
    }

    /// Elementwise multiplication (boolean AND for bool arrays).
    pub fn mul(&self, other: &Array) -> Result<Array> {
        binary(Primitive::Mul, self, other)
    }

    /// Elementwise float division.
    pub fn div(&self, other: &Array) -> Result<Array> {
        if !self.dtype().is_float() {
            return Err(Error::Dtype(format!(
                "div requires float operands, got {}; use idiv for integers",
                self.dtype()
            )));
        }
        binary(Primitive::Mul, self, &other.reciprocal()?)
    }

    /// Elementwise integer floor division.
    pub fn idiv(&self, other: &Array) -> Result<Array> {
        binary(Primitive::Idiv, self, other)
    }

    /// Elementwise complement of floor division.
    pub fn rem(&self, other: &Array) -> Result<Array> {
        binary(Primitive::Mod, self, other)
    }

    /// Elementwise minimum.
    pub fn minimum(&self, other: &Array) -> Result<Array> {
        binary(Primitive::Min, self, other)
    }

    /// Elementwise maximum.
    pub fn maximum(&self, other: &Array) -> Result<Array> {
        binary(Primitive::Max, self, other)
    }

    /// A scalar constant matching this array's dtype and device,
    /// broadcastable against it.
    pub fn scalar_like(&self, value: f32) -> Array {
        let device = self
            .device()
            .unwrap_or_else(|_| crate::device::default_device());
        Array::full_on(value, Shape::scalar(), self.dtype(), device)
    }

    /// Add a scalar.
    pub fn add_scalar(&self, value: f32) -> Result<Array> {
        self.add(&self.scalar_like(value))
    }

    /// Multiply by a scalar.
    pub fn mul_scalar(&self, value: f32) -> Result<Array> {
        self.mul(&self.scalar_like(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(data: Vec<f32>, shape: Vec<usize>) -> Array {
        Array::from_vec(data, Shape::new(shape)).unwrap()
    }

    #[test]
    fn test_add_sub_mul_div() {
        let a = arr(vec![1.0, 2.0, 3.0], vec![3]);
        let b = arr(vec![4.0, 10.0, 2.0], vec![3]);
        assert_eq!(a.add(&b).unwrap().data().unwrap(), vec![5.0, 12.0, 5.0]);
        assert_eq!(b.sub(&a).unwrap().data().unwrap(), vec![3.0, 8.0, -1.0]);
        assert_eq!(a.mul(&b).unwrap().data().unwrap(), vec![4.0, 20.0, 6.0]);
        assert_eq!(b.div(&a).unwrap().data().unwrap(), vec![4.0, 5.0, 2.0 / 3.0]);
    }

    #[test]
    fn test_broadcasting() {
        let a = arr(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        let row = arr(vec![10.0, 20.0, 30.0], vec![3]);
        assert_eq!(
            a.add(&row).unwrap().data().unwrap(),
            vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]
        );
        let col = arr(vec![100.0, 200.0], vec![2]).reshape(&[2, 1]).unwrap();
        assert_eq!(
            a.add(&col).unwrap().data().unwrap(),
            vec![101.0, 102.0, 103.0, 204.0, 205.0, 206.0]
        );
    }

    #[test]
    fn test_incompatible_broadcast_is_shape_error() {
        let a = arr(vec![1.0, 2.0], vec![2]);
        let b = arr(vec![1.0, 2.0, 3.0], vec![3]);
        assert!(matches!(a.add(&b), Err(Error::Shape(_))));
    }

    #[test]
    fn test_mixed_dtypes_is_dtype_error() {
        let a = arr(vec![1.0], vec![1]);
        let b = Array::from_vec_i32(vec![1], Shape::new(vec![1])).unwrap();
        assert!(matches!(a.add(&b), Err(Error::Dtype(_))));
    }

    #[test]
    fn test_integer_floor_division() {
        let a = Array::from_vec_i32(vec![7, -7, 7, -7], Shape::new(vec![4])).unwrap();
        let b = Array::from_vec_i32(vec![2, 2, -2, -2], Shape::new(vec![4])).unwrap();
        assert_eq!(a.idiv(&b).unwrap().data_i32().unwrap(), vec![3, -4, -4, 3]);
        assert_eq!(a.rem(&b).unwrap().data_i32().unwrap(), vec![1, 1, -1, -1]);
    }

    #[test]
    fn test_minimum_maximum() {
        let a = arr(vec![1.0, 5.0, 3.0], vec![3]);
        let b = arr(vec![2.0, 4.0, 3.0], vec![3]);
        assert_eq!(a.minimum(&b).unwrap().data().unwrap(), vec![1.0, 4.0, 3.0]);
        assert_eq!(a.maximum(&b).unwrap().data().unwrap(), vec![2.0, 5.0, 3.0]);
    }

    #[test]
    fn test_scalar_helpers() {
        let a = arr(vec![1.0, 2.0], vec![2]);
        assert_eq!(a.add_scalar(10.0).unwrap().data().unwrap(), vec![11.0, 12.0]);
        assert_eq!(a.mul_scalar(3.0).unwrap().data().unwrap(), vec![3.0, 6.0]);
    }

    #[test]
    fn test_bool_add_is_or() {
        let a = Array::from_vec_bool(vec![true, false, false], Shape::new(vec![3])).unwrap();
        let b = Array::from_vec_bool(vec![false, false, true], Shape::new(vec![3])).unwrap();
        assert_eq!(
            a.add(&b).unwrap().data_bool().unwrap(),
            vec![true, false, true]
        );
        assert_eq!(
            a.mul(&b).unwrap().data_bool().unwrap(),
            vec![false, false, false]
        );
    }
}
