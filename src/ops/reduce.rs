//! Reductions over axis sets.

use crate::array::Array;
use crate::trace::{bind1, Primitive};
use crate::Result;

#[derive(Copy, Clone)]
enum Kind {
    Sum,
    Max,
    Min,
}

fn reduce(x: &Array, axes: &[isize], keepdims: bool, kind: Kind) -> Result<Array> {
    let axes = x.shape().normalize_axes(axes)?;
    let prim = match kind {
        Kind::Sum => Primitive::ReduceSum { axes: axes.clone() },
        Kind::Max => Primitive::ReduceMax { axes: axes.clone() },
        Kind::Min => Primitive::ReduceMin { axes: axes.clone() },
    };
    let out = bind1(prim, std::slice::from_ref(x))?;
    if !keepdims {
        return Ok(out);
    }
    let mut shape = x.shape().as_slice().to_vec();
    for &a in &axes {
        shape[a] = 1;
    }
    out.reshape(&shape)
}

fn all_axes(x: &Array) -> Vec<isize> {
    (0..x.ndim() as isize).collect()
}

impl Array {
    /// Sum over the given axes.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lazyjax::{Array, Shape};
    /// let a = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![2, 3])).unwrap();
    /// assert_eq!(a.sum_axes(&[1], false).unwrap().data().unwrap(), vec![6.0, 15.0]);
    /// assert_eq!(a.sum_axes(&[0], true).unwrap().shape().as_slice(), &[1, 3]);
    /// ```
    pub fn sum_axes(&self, axes: &[isize], keepdims: bool) -> Result<Array> {
        reduce(self, axes, keepdims, Kind::Sum)
    }

    /// Sum over one axis.
    pub fn sum_axis(&self, axis: isize, keepdims: bool) -> Result<Array> {
        self.sum_axes(&[axis], keepdims)
    }

    /// Sum of all elements, as a scalar array.
    pub fn sum_all(&self) -> Result<Array> {
        self.sum_axes(&all_axes(self), false)
    }

    /// Maximum over the given axes.
    pub fn max_axes(&self, axes: &[isize], keepdims: bool) -> Result<Array> {
        reduce(self, axes, keepdims, Kind::Max)
    }

    /// Maximum of all elements, as a scalar array.
    pub fn max_all(&self) -> Result<Array> {
        self.max_axes(&all_axes(self), false)
    }

    /// Minimum over the given axes.
    pub fn min_axes(&self, axes: &[isize], keepdims: bool) -> Result<Array> {
        reduce(self, axes, keepdims, Kind::Min)
    }

    /// Minimum of all elements, as a scalar array.
    pub fn min_all(&self) -> Result<Array> {
        self.min_axes(&all_axes(self), false)
    }

    /// Mean over the given axes. Two passes: a sum kernel whose
    /// epilogue applies the scale.
    pub fn mean_axes(&self, axes: &[isize], keepdims: bool) -> Result<Array> {
        if !self.dtype().is_float() {
            return Err(crate::Error::Dtype(format!(
                "mean requires a float array, got {}",
                self.dtype()
            )));
        }
        let normalized = self.shape().normalize_axes(axes)?;
        let count: usize = normalized
            .iter()
            .map(|&a| self.shape().as_slice()[a])
            .product();
        self.sum_axes(axes, keepdims)?
            .mul_scalar(1.0 / count.max(1) as f32)
    }

    /// Mean of all elements, as a scalar array.
    pub fn mean_all(&self) -> Result<Array> {
        self.mean_axes(&all_axes(self), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn arr(data: Vec<f32>, shape: Vec<usize>) -> Array {
        Array::from_vec(data, Shape::new(shape)).unwrap()
    }

    #[test]
    fn test_sum_axes() {
        let a = arr(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        assert_eq!(a.sum_axis(0, false).unwrap().data().unwrap(), vec![5.0, 7.0, 9.0]);
        assert_eq!(a.sum_axis(1, false).unwrap().data().unwrap(), vec![6.0, 15.0]);
        assert_eq!(a.sum_all().unwrap().item().unwrap(), 21.0);
        assert_eq!(a.sum_axes(&[-1], false).unwrap().data().unwrap(), vec![6.0, 15.0]);
    }

    #[test]
    fn test_keepdims() {
        let a = arr(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let s = a.sum_axis(1, true).unwrap();
        assert_eq!(s.shape().as_slice(), &[2, 1]);
        assert_eq!(s.data().unwrap(), vec![3.0, 7.0]);
    }

    #[test]
    fn test_max_min() {
        let a = arr(vec![3.0, -1.0, 7.0, 2.0, 0.0, 5.0], vec![2, 3]);
        assert_eq!(a.max_axes(&[1], false).unwrap().data().unwrap(), vec![7.0, 5.0]);
        assert_eq!(a.min_axes(&[1], false).unwrap().data().unwrap(), vec![-1.0, 0.0]);
        assert_eq!(a.max_all().unwrap().item().unwrap(), 7.0);
        assert_eq!(a.min_all().unwrap().item().unwrap(), -1.0);
    }

    #[test]
    fn test_multi_axis_sum() {
        let a = arr((0..24).map(|v| v as f32).collect(), vec![2, 3, 4]);
        let s = a.sum_axes(&[0, 2], false).unwrap();
        assert_eq!(s.shape().as_slice(), &[3]);
        // Rows of the middle axis: sums over 8 elements each.
        let expect: Vec<f32> = (0..3)
            .map(|j| {
                (0..2)
                    .flat_map(|i| (0..4).map(move |k| (i * 12 + j * 4 + k) as f32))
                    .sum()
            })
            .collect();
        assert_eq!(s.data().unwrap(), expect);
    }

    #[test]
    fn test_mean() {
        let a = arr(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        assert_eq!(a.mean_all().unwrap().item().unwrap(), 2.5);
        assert_eq!(a.mean_axes(&[0], false).unwrap().data().unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_sum_of_broadcast() {
        // Reduce over an expanded (stride-0) dimension.
        let a = arr(vec![1.0, 2.0], vec![2]);
        let b = a.reshape(&[1, 2]).unwrap().broadcast_to(&[3, 2]).unwrap();
        assert_eq!(b.sum_axis(0, false).unwrap().data().unwrap(), vec![3.0, 6.0]);
    }
}
