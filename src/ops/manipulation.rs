//! Shape manipulation: reshape, transpose, broadcast, slice, pad, flip,
//! concat, stack.
//!
//! All of these are view operations: they rewrite shape trackers (or
//! lower to `pad`+`add` for concatenation) and never copy data by
//! themselves.

use crate::array::Array;
use crate::trace::{bind1, Primitive};
use crate::{Error, Result};

impl Array {
    /// Reshape to a new shape of the same total size.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lazyjax::{Array, Shape};
    /// let a = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![2, 3])).unwrap();
    /// let b = a.reshape(&[3, 2]).unwrap();
    /// assert_eq!(b.shape().as_slice(), &[3, 2]);
    /// assert_eq!(b.data().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    /// ```
    pub fn reshape(&self, shape: &[usize]) -> Result<Array> {
        bind1(
            Primitive::Reshape {
                shape: shape.to_vec(),
            },
            std::slice::from_ref(self),
        )
    }

    /// Reverse all dimensions (matrix transpose for 2-D arrays).
    pub fn transpose(&self) -> Result<Array> {
        let perm: Vec<usize> = (0..self.ndim()).rev().collect();
        self.permute(&perm)
    }

    /// Permute dimensions into the given order.
    pub fn permute(&self, perm: &[usize]) -> Result<Array> {
        bind1(
            Primitive::Transpose {
                perm: perm.to_vec(),
            },
            std::slice::from_ref(self),
        )
    }

    /// Move one axis to a new position.
    pub fn moveaxis(&self, from: isize, to: isize) -> Result<Array> {
        let from = self.shape().normalize_axis(from)?;
        let to = self.shape().normalize_axis(to)?;
        if from == to {
            return Ok(self.clone());
        }
        let mut perm: Vec<usize> = (0..self.ndim()).filter(|&d| d != from).collect();
        perm.insert(to, from);
        self.permute(&perm)
    }

    /// Broadcast to a target shape (NumPy right-aligned rules).
    pub fn broadcast_to(&self, target: &[usize]) -> Result<Array> {
        if self.shape().as_slice() == target {
            return Ok(self.clone());
        }
        if target.len() < self.ndim() {
            return Err(Error::Shape(format!(
                "cannot broadcast {} down to rank {}",
                self.shape(),
                target.len()
            )));
        }
        let offset = target.len() - self.ndim();
        let dims: Vec<usize> = (offset..target.len()).collect();
        bind1(
            Primitive::Broadcast {
                shape: target.to_vec(),
                dims,
            },
            std::slice::from_ref(self),
        )
    }

    /// Restrict each dimension to `[begin, end)`.
    pub fn slice(&self, ranges: &[(usize, usize)]) -> Result<Array> {
        bind1(
            Primitive::Shrink {
                ranges: ranges.to_vec(),
            },
            std::slice::from_ref(self),
        )
    }

    /// Zero-pad each dimension by `(before, after)`.
    pub fn pad(&self, padding: &[(usize, usize)]) -> Result<Array> {
        bind1(
            Primitive::Pad {
                padding: padding.to_vec(),
            },
            std::slice::from_ref(self),
        )
    }

    /// Reverse the listed axes.
    pub fn flip(&self, axes: &[isize]) -> Result<Array> {
        let axes = self.shape().normalize_axes(axes)?;
        bind1(Primitive::Flip { axes }, std::slice::from_ref(self))
    }

    /// Remove a size-1 dimension.
    pub fn squeeze(&self, axis: isize) -> Result<Array> {
        let axis = self.shape().normalize_axis(axis)?;
        if self.shape().as_slice()[axis] != 1 {
            return Err(Error::Shape(format!(
                "cannot squeeze dimension {} of size {}",
                axis,
                self.shape().as_slice()[axis]
            )));
        }
        let mut shape = self.shape().as_slice().to_vec();
        shape.remove(axis);
        self.reshape(&shape)
    }

    /// Insert a size-1 dimension at `axis`.
    pub fn expand_dims(&self, axis: isize) -> Result<Array> {
        let ndim = self.ndim() as isize;
        let ax = if axis < 0 { axis + ndim + 1 } else { axis };
        if ax < 0 || ax > ndim {
            return Err(Error::Shape(format!(
                "expand_dims axis {} out of bounds for rank {}",
                axis, ndim
            )));
        }
        let mut shape = self.shape().as_slice().to_vec();
        shape.insert(ax as usize, 1);
        self.reshape(&shape)
    }

    /// Concatenate arrays along an existing axis.
    ///
    /// Lowered to zero-padding each piece out to the full length and
    /// summing, so it fuses like any other pointwise chain.
    pub fn concat(arrays: &[&Array], axis: isize) -> Result<Array> {
        let [first, rest @ ..] = arrays else {
            return Err(Error::Shape("concat requires at least one array".into()));
        };
        let axis = first.shape().normalize_axis(axis)?;
        let total: usize = arrays
            .iter()
            .map(|a| a.shape().as_slice()[axis])
            .sum();
        for a in rest {
            let mut want = first.shape().as_slice().to_vec();
            let mut got = a.shape().as_slice().to_vec();
            want.remove(axis);
            got.remove(axis);
            if want != got || a.ndim() != first.ndim() {
                return Err(Error::Shape(format!(
                    "concat: {} does not match {} outside axis {}",
                    a.shape(),
                    first.shape(),
                    axis
                )));
            }
            if a.dtype() != first.dtype() {
                return Err(Error::Dtype(format!(
                    "concat: mixed dtypes {} and {}",
                    first.dtype(),
                    a.dtype()
                )));
            }
        }

        let mut offset = 0;
        let mut acc: Option<Array> = None;
        for a in arrays {
            let len = a.shape().as_slice()[axis];
            let mut padding = vec![(0, 0); a.ndim()];
            padding[axis] = (offset, total - offset - len);
            let padded = a.pad(&padding)?;
            acc = Some(match acc {
                None => padded,
                Some(acc) => acc.add(&padded)?,
            });
            offset += len;
        }
        Ok(acc.expect("at least one array"))
    }

    /// Stack arrays along a new axis.
    pub fn stack(arrays: &[&Array], axis: isize) -> Result<Array> {
        let expanded: Vec<Array> = arrays
            .iter()
            .map(|a| a.expand_dims(axis))
            .collect::<Result<_>>()?;
        let refs: Vec<&Array> = expanded.iter().collect();
        Array::concat(&refs, axis)
    }
}
