//! Linear algebra: dot products, matrix multiplication, convolution.
//!
//! Contractions lower to broadcast-multiply plus a sum reduction, so
//! they ride the same fusion machinery as everything else instead of
//! needing dedicated kernels.

use crate::array::Array;
use crate::{Error, Result};

/// Padding mode for [`Array::conv1d`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConvPadding {
    /// No padding; the output shrinks by the kernel size.
    Valid,
    /// Zero-pad so the output covers every input position.
    Same,
}

impl Array {
    /// Matrix multiplication of 2-D arrays.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lazyjax::{Array, Shape};
    /// let a = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0], Shape::new(vec![2, 2])).unwrap();
    /// let b = Array::from_vec(vec![5.0, 6.0, 7.0, 8.0], Shape::new(vec![2, 2])).unwrap();
    /// assert_eq!(a.matmul(&b).unwrap().data().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
    /// ```
    pub fn matmul(&self, other: &Array) -> Result<Array> {
        let (a_shape, b_shape) = (self.shape().as_slice(), other.shape().as_slice());
        let ([m, k], [k2, n]) = (a_shape, b_shape) else {
            return Err(Error::Shape(format!(
                "matmul requires 2-D operands, got {} and {}",
                self.shape(),
                other.shape()
            )));
        };
        let (m, k, k2, n) = (*m, *k, *k2, *n);
        if k != k2 {
            return Err(Error::Shape(format!(
                "matmul contraction mismatch: {} vs {}",
                self.shape(),
                other.shape()
            )));
        }
        // [m,k,1] * [1,k,n] -> [m,k,n], summed over k.
        let lhs = self.reshape(&[m, k, 1])?.broadcast_to(&[m, k, n])?;
        let rhs = other.reshape(&[1, k, n])?.broadcast_to(&[m, k, n])?;
        lhs.mul(&rhs)?.sum_axis(1, false)
    }

    /// Dot product following NumPy's rank rules: inner product for two
    /// vectors, matrix multiplication for matrices, matrix-vector
    /// products for the mixed cases.
    pub fn dot(&self, other: &Array) -> Result<Array> {
        match (self.ndim(), other.ndim()) {
            (1, 1) => {
                if self.shape() != other.shape() {
                    return Err(Error::Shape(format!(
                        "dot: vector lengths {} and {} differ",
                        self.shape(),
                        other.shape()
                    )));
                }
                self.mul(other)?.sum_all()
            }
            (2, 2) => self.matmul(other),
            (2, 1) => {
                let k = other.size();
                let out = self.matmul(&other.reshape(&[k, 1])?)?;
                let m = out.shape().as_slice()[0];
                out.reshape(&[m])
            }
            (1, 2) => {
                let k = self.size();
                let out = self.reshape(&[1, k])?.matmul(other)?;
                let n = out.shape().as_slice()[1];
                out.reshape(&[n])
            }
            _ => Err(Error::Shape(format!(
                "dot is defined for 1-D and 2-D arrays, got ranks {} and {}",
                self.ndim(),
                other.ndim()
            ))),
        }
    }

    /// 1-D cross-correlation with the given kernel.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lazyjax::{Array, ConvPadding, Shape};
    /// let x = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0], Shape::new(vec![5])).unwrap();
    /// let w = Array::from_vec(vec![2.0, 0.5, -1.0], Shape::new(vec![3])).unwrap();
    /// let y = x.conv1d(&w, 1, ConvPadding::Same).unwrap();
    /// assert_eq!(y.data().unwrap(), vec![-1.5, 0.0, 1.5, 3.0, 10.5]);
    /// ```
    pub fn conv1d(&self, kernel: &Array, stride: usize, padding: ConvPadding) -> Result<Array> {
        if self.ndim() != 1 || kernel.ndim() != 1 {
            return Err(Error::Shape(format!(
                "conv1d operates on 1-D arrays, got {} and {}",
                self.shape(),
                kernel.shape()
            )));
        }
        if stride == 0 {
            return Err(Error::Shape("conv1d stride must be positive".into()));
        }
        let n = self.size();
        let k = kernel.size();
        if k == 0 || k > n + 1 {
            return Err(Error::Shape(format!(
                "kernel of {} taps does not fit {} samples",
                k, n
            )));
        }

        let (before, after) = match padding {
            ConvPadding::Valid => (0, 0),
            ConvPadding::Same => {
                let out = n.div_ceil(stride);
                let total = ((out - 1) * stride + k).saturating_sub(n);
                (total / 2, total - total / 2)
            }
        };
        let padded = self.pad(&[(before, after)])?;
        let p = n + before + after;
        if k > p {
            return Err(Error::Shape(format!(
                "kernel of {} taps does not fit {} padded samples",
                k, p
            )));
        }
        let windows = p + 1 - k;

        // Sum of shifted slices scaled by the matching tap.
        let mut acc: Option<Array> = None;
        for j in 0..k {
            let tap = kernel.slice(&[(j, j + 1)])?;
            let term = padded.slice(&[(j, j + windows)])?.mul(&tap)?;
            acc = Some(match acc {
                None => term,
                Some(acc) => acc.add(&term)?,
            });
        }
        let acc = acc.expect("kernel has at least one tap");

        if stride == 1 {
            return Ok(acc);
        }
        // Keep every stride-th window by rounding out to a rectangle.
        let out = (windows - 1) / stride + 1;
        acc.pad(&[(0, out * stride - windows)])?
            .reshape(&[out, stride])?
            .slice(&[(0, out), (0, 1)])?
            .reshape(&[out])
    }
}
