//! Elementwise comparisons and selection.

use crate::array::Array;
use crate::ops::binary::broadcast_pair;
use crate::trace::{bind1, CompareOp, Primitive};
use crate::{Error, Result};

fn compare(op: CompareOp, a: &Array, b: &Array) -> Result<Array> {
    if a.dtype() != b.dtype() {
        return Err(Error::Dtype(format!(
            "compare: no implicit promotion between {} and {}",
            a.dtype(),
            b.dtype()
        )));
    }
    let (a, b) = broadcast_pair(a, b)?;
    bind1(Primitive::Compare(op), &[a, b])
}

impl Array {
    /// Elementwise `<`.
    pub fn lt(&self, other: &Array) -> Result<Array> {
        compare(CompareOp::Lt, self, other)
    }

    /// Elementwise `<=`.
    pub fn le(&self, other: &Array) -> Result<Array> {
        compare(CompareOp::Le, self, other)
    }

    /// Elementwise `>`.
    pub fn gt(&self, other: &Array) -> Result<Array> {
        compare(CompareOp::Gt, self, other)
    }

    /// Elementwise `>=`.
    pub fn ge(&self, other: &Array) -> Result<Array> {
        compare(CompareOp::Ge, self, other)
    }

    /// Elementwise `==`.
    pub fn eq(&self, other: &Array) -> Result<Array> {
        compare(CompareOp::Eq, self, other)
    }

    /// Elementwise `!=`.
    pub fn ne(&self, other: &Array) -> Result<Array> {
        compare(CompareOp::Ne, self, other)
    }

    /// Select elementwise from `on_true`/`on_false` by this boolean
    /// array.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lazyjax::{Array, Shape};
    /// let x = Array::from_vec(vec![1.0, 5.0], Shape::new(vec![2])).unwrap();
    /// let y = Array::from_vec(vec![4.0, 2.0], Shape::new(vec![2])).unwrap();
    /// let picked = x.lt(&y).unwrap().where_(&x, &y).unwrap();
    /// assert_eq!(picked.data().unwrap(), vec![1.0, 2.0]);
    /// ```
    pub fn where_(&self, on_true: &Array, on_false: &Array) -> Result<Array> {
        if on_true.dtype() != on_false.dtype() {
            return Err(Error::Dtype(format!(
                "where: arms disagree, {} vs {}",
                on_true.dtype(),
                on_false.dtype()
            )));
        }
        let target = self
            .shape()
            .broadcast_with(on_true.shape())
            .and_then(|s| s.broadcast_with(on_false.shape()))
            .ok_or_else(|| {
                Error::Shape(format!(
                    "where: cannot broadcast {}, {} and {}",
                    self.shape(),
                    on_true.shape(),
                    on_false.shape()
                ))
            })?;
        bind1(
            Primitive::Where,
            &[
                self.broadcast_to(target.as_slice())?,
                on_true.broadcast_to(target.as_slice())?,
                on_false.broadcast_to(target.as_slice())?,
            ],
        )
    }
}
