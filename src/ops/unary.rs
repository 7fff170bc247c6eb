//! Elementwise unary operations.

use crate::array::Array;
use crate::trace::{bind1, Primitive};
use crate::Result;

impl Array {
    /// Elementwise negation.
    pub fn neg(&self) -> Result<Array> {
        bind1(Primitive::Neg, std::slice::from_ref(self))
    }

    /// Elementwise multiplicative inverse.
    pub fn reciprocal(&self) -> Result<Array> {
        bind1(Primitive::Reciprocal, std::slice::from_ref(self))
    }

    /// Elementwise sine.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lazyjax::{Array, Shape};
    /// let x = Array::from_vec(vec![3.0], Shape::new(vec![1])).unwrap();
    /// assert!((x.sin().unwrap().data().unwrap()[0] - 0.14112).abs() < 1e-5);
    /// ```
    pub fn sin(&self) -> Result<Array> {
        bind1(Primitive::Sin, std::slice::from_ref(self))
    }

    /// Elementwise cosine.
    pub fn cos(&self) -> Result<Array> {
        bind1(Primitive::Cos, std::slice::from_ref(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Shape};

    #[test]
    fn test_neg() {
        let a = Array::from_vec(vec![1.0, -2.0, 0.0], Shape::new(vec![3])).unwrap();
        assert_eq!(a.neg().unwrap().data().unwrap(), vec![-1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_reciprocal() {
        let a = Array::from_vec(vec![2.0, 4.0, 0.5], Shape::new(vec![3])).unwrap();
        assert_eq!(
            a.reciprocal().unwrap().data().unwrap(),
            vec![0.5, 0.25, 2.0]
        );
    }

    #[test]
    fn test_sin_cos() {
        let x = Array::from_vec(vec![0.0, 1.0], Shape::new(vec![2])).unwrap();
        let s = x.sin().unwrap().data().unwrap();
        let c = x.cos().unwrap().data().unwrap();
        assert!((s[0] - 0.0).abs() < 1e-6 && (s[1] - 1.0f32.sin()).abs() < 1e-6);
        assert!((c[0] - 1.0).abs() < 1e-6 && (c[1] - 1.0f32.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_sin_on_int_is_dtype_error() {
        let a = Array::from_vec_i32(vec![1], Shape::new(vec![1])).unwrap();
        assert!(matches!(a.sin(), Err(Error::Dtype(_))));
    }
}
