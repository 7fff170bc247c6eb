//! Lazy multidimensional views and the shape tracker.
//!
//! A [`View`] describes how an n-dimensional index space maps onto a
//! linear buffer: shape, signed strides (zero means broadcast), a base
//! offset, and an optional per-dimension validity mask. A
//! [`ShapeTracker`] stacks views so that reshape/transpose/slice/pad/flip
//! rewrite index arithmetic instead of copying data; when data is finally
//! demanded, the stack folds into a single scalar index expression.

use crate::expr::ScalarExpr;
use crate::{Error, Result};

/// A single strided view: `{shape, strides, offset, mask}`.
///
/// Canonical form maintained by every constructor:
/// size-1 dimensions carry stride 0; a mask that pins a dimension to one
/// index zeroes that stride and absorbs the index into the offset; an
/// empty mask range collapses the whole view to the empty view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    shape: Vec<usize>,
    strides: Vec<i64>,
    offset: i64,
    mask: Option<Vec<(usize, usize)>>,
}

impl View {
    /// A fresh contiguous row-major view of `shape`.
    pub fn new(shape: Vec<usize>) -> Self {
        let strides = contiguous_strides(&shape);
        View::create(shape, strides, 0, None)
    }

    /// Build a view, normalizing to canonical form.
    pub fn create(
        shape: Vec<usize>,
        mut strides: Vec<i64>,
        mut offset: i64,
        mask: Option<Vec<(usize, usize)>>,
    ) -> Self {
        debug_assert_eq!(shape.len(), strides.len());

        // An empty mask range invalidates every read.
        if let Some(m) = &mask {
            debug_assert_eq!(m.len(), shape.len());
            if m.iter().any(|&(b, e)| b >= e) {
                return View {
                    strides: vec![0; shape.len()],
                    offset: 0,
                    mask: Some(shape.iter().map(|_| (0, 0)).collect()),
                    shape,
                };
            }
        }

        let mut mask = mask;
        for d in 0..shape.len() {
            if shape[d] <= 1 {
                strides[d] = 0;
                continue;
            }
            // A mask pinning dim d to a single index: zero the stride and
            // absorb the index into the offset.
            if let Some(m) = &mask {
                let (b, e) = m[d];
                if e - b == 1 && strides[d] != 0 {
                    offset += b as i64 * strides[d];
                    strides[d] = 0;
                }
            }
        }

        // Drop a mask that covers everything.
        if let Some(m) = &mask {
            if m.iter()
                .zip(&shape)
                .all(|(&(b, e), &s)| b == 0 && e == s)
            {
                mask = None;
            }
        }

        View {
            shape,
            strides,
            offset,
            mask,
        }
    }

    /// The view's shape.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The view's strides (zero means broadcast).
    #[inline]
    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    /// The linear index of the first element.
    #[inline]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Per-dimension `[begin, end)` validity ranges, if masked.
    #[inline]
    pub fn mask(&self) -> Option<&[(usize, usize)]> {
        self.mask.as_deref()
    }

    /// Number of elements addressed by the view.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// True for a dense row-major view with zero offset and no mask.
    pub fn is_contiguous(&self) -> bool {
        self.offset == 0
            && self.mask.is_none()
            && self.strides == contiguous_strides(&self.shape)
    }

    /// Permute dimensions.
    pub fn permute(&self, order: &[usize]) -> View {
        debug_assert_eq!(order.len(), self.shape.len());
        View::create(
            order.iter().map(|&d| self.shape[d]).collect(),
            order.iter().map(|&d| self.strides[d]).collect(),
            self.offset,
            self.mask
                .as_ref()
                .map(|m| order.iter().map(|&d| m[d]).collect()),
        )
    }

    /// Broadcast size-1 dimensions up to `new_shape`.
    pub fn expand(&self, new_shape: &[usize]) -> Result<View> {
        debug_assert_eq!(new_shape.len(), self.shape.len());
        let mut mask = self.mask.clone();
        for d in 0..self.shape.len() {
            if self.shape[d] == new_shape[d] {
                continue;
            }
            if self.shape[d] != 1 {
                return Err(Error::Shape(format!(
                    "cannot expand dimension {} of size {} to {}",
                    d, self.shape[d], new_shape[d]
                )));
            }
            if let Some(m) = &mut mask {
                // A full size-1 mask widens with the dim; a pinned one
                // cannot be broadcast meaningfully.
                m[d] = if m[d] == (0, 1) {
                    (0, new_shape[d])
                } else {
                    (0, 0)
                };
            }
        }
        Ok(View::create(
            new_shape.to_vec(),
            self.strides.clone(),
            self.offset,
            mask,
        ))
    }

    /// Restrict each dimension to `[begin, end)`.
    pub fn shrink(&self, ranges: &[(usize, usize)]) -> View {
        debug_assert_eq!(ranges.len(), self.shape.len());
        let mut offset = self.offset;
        let mut shape = Vec::with_capacity(ranges.len());
        let mut mask = self.mask.clone();
        for (d, &(b, e)) in ranges.iter().enumerate() {
            debug_assert!(b <= e && e <= self.shape[d]);
            offset += b as i64 * self.strides[d];
            shape.push(e - b);
            if let Some(m) = &mut mask {
                let (mb, me) = m[d];
                m[d] = (
                    mb.saturating_sub(b),
                    me.saturating_sub(b).min(e - b),
                );
            }
        }
        View::create(shape, self.strides.clone(), offset, mask)
    }

    /// Grow each dimension by `(before, after)` zero-padding, installing a
    /// mask that excludes the new region.
    pub fn pad(&self, padding: &[(usize, usize)]) -> View {
        debug_assert_eq!(padding.len(), self.shape.len());
        if padding.iter().all(|&(b, a)| b == 0 && a == 0) {
            return self.clone();
        }
        let mut offset = self.offset;
        let mut shape = Vec::with_capacity(padding.len());
        let mut mask = Vec::with_capacity(padding.len());
        for (d, &(before, after)) in padding.iter().enumerate() {
            offset -= before as i64 * self.strides[d];
            shape.push(before + self.shape[d] + after);
            let (mb, me) = self
                .mask
                .as_ref()
                .map_or((0, self.shape[d]), |m| m[d]);
            mask.push((mb + before, me + before));
        }
        View::create(shape, self.strides.clone(), offset, Some(mask))
    }

    /// Reverse the listed axes.
    pub fn flip(&self, axes: &[usize]) -> View {
        let mut strides = self.strides.clone();
        let mut offset = self.offset;
        let mut mask = self.mask.clone();
        for &d in axes {
            offset += (self.shape[d] as i64 - 1) * strides[d];
            strides[d] = -strides[d];
            if let Some(m) = &mut mask {
                let (b, e) = m[d];
                m[d] = (self.shape[d] - e, self.shape[d] - b);
            }
        }
        View::create(self.shape.clone(), strides, offset, mask)
    }

    /// Try to re-express this view with `new_shape` by fusing or splitting
    /// dimensions with compatible strides. Returns `None` when the reshape
    /// needs a fresh view on top.
    pub fn reshape(&self, new_shape: &[usize]) -> Option<View> {
        debug_assert_eq!(
            self.shape.iter().product::<usize>(),
            new_shape.iter().product::<usize>()
        );
        if self.shape == new_shape {
            return Some(self.clone());
        }
        if new_shape.iter().product::<usize>() == 0 {
            return Some(View::new(new_shape.to_vec()));
        }

        // Masked views only pass through trivially (size-1 insertions or
        // removals); anything else gets a new view.
        if self.mask.is_some() {
            return self.reshape_masked_passthrough(new_shape);
        }

        // Classic no-copy reshape: group old dims and new dims into runs
        // with equal element counts, requiring dense strides inside each
        // old run.
        let olds: Vec<(usize, i64)> = self
            .shape
            .iter()
            .zip(&self.strides)
            .filter(|&(&s, _)| s != 1)
            .map(|(&s, &st)| (s, st))
            .collect();

        let mut new_strides: Vec<i64> = vec![0; new_shape.len()];
        let mut oi = 0; // index into olds
        let mut ni = 0; // index into new_shape
        while ni < new_shape.len() {
            if new_shape[ni] == 1 {
                ni += 1;
                continue;
            }
            if oi >= olds.len() {
                return None;
            }
            // Accumulate a group with equal products on both sides.
            let mut op = olds[oi].0;
            let mut np = new_shape[ni];
            let o_start = oi;
            let n_start = ni;
            while op != np {
                if op < np {
                    oi += 1;
                    if oi >= olds.len() {
                        return None;
                    }
                    op *= olds[oi].0;
                } else {
                    ni += 1;
                    np *= new_shape[ni];
                }
            }
            // Old dims in the group must be dense among themselves.
            for k in o_start..oi {
                if olds[k].1 != olds[k + 1].1 * olds[k + 1].0 as i64 {
                    return None;
                }
            }
            // Assign new strides within the group, right to left.
            let mut stride = olds[oi].1;
            for k in (n_start..=ni).rev() {
                if new_shape[k] != 1 {
                    new_strides[k] = stride;
                    stride *= new_shape[k] as i64;
                }
            }
            oi += 1;
            ni += 1;
        }
        if oi != olds.len() {
            return None;
        }
        Some(View::create(
            new_shape.to_vec(),
            new_strides,
            self.offset,
            None,
        ))
    }

    /// Masked reshape limited to inserting/removing size-1 dims.
    fn reshape_masked_passthrough(&self, new_shape: &[usize]) -> Option<View> {
        let old_core: Vec<usize> = self.shape.iter().copied().filter(|&s| s != 1).collect();
        let new_core: Vec<usize> = new_shape.iter().copied().filter(|&s| s != 1).collect();
        if old_core != new_core {
            return None;
        }
        let mask = self.mask.as_ref().unwrap();
        // Check that every dropped size-1 dim was fully valid.
        for (d, &s) in self.shape.iter().enumerate() {
            if s == 1 && mask[d] != (0, 1) {
                return None;
            }
        }
        let mut strides = Vec::with_capacity(new_shape.len());
        let mut new_mask = Vec::with_capacity(new_shape.len());
        let mut src = self
            .shape
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s != 1)
            .map(|(d, _)| d);
        for &s in new_shape {
            if s == 1 {
                strides.push(0);
                new_mask.push((0, 1));
            } else {
                let d = src.next()?;
                strides.push(self.strides[d]);
                new_mask.push(mask[d]);
            }
        }
        Some(View::create(
            new_shape.to_vec(),
            strides,
            self.offset,
            Some(new_mask),
        ))
    }

    /// Fold a linear index expression over this view's space into an
    /// index into the parent space, with an optional validity condition.
    pub fn index_expr(&self, idx: &ScalarExpr) -> (ScalarExpr, Option<ScalarExpr>) {
        let mut out = ScalarExpr::i32(self.offset as i32);
        let mut valid: Option<ScalarExpr> = None;
        let mut step = 1i64;
        for d in (0..self.shape.len()).rev() {
            let dim = self.shape[d] as i64;
            if dim == 1 {
                // Canonical stride 0; a size-1 dim contributes nothing,
                // its mask (if pinned empty) was normalized already.
                if let Some(m) = &self.mask {
                    if m[d] == (0, 0) {
                        valid = and_opt(valid, ScalarExpr::constant(crate::expr::Literal::Bool(false)));
                    }
                }
                continue;
            }
            let mut coord = idx.clone();
            if step > 1 {
                coord = coord.idiv(&ScalarExpr::i32(step as i32));
            }
            if d > 0 {
                coord = coord.modulo(&ScalarExpr::i32(dim as i32));
            }
            step *= dim;
            if self.strides[d] != 0 {
                out = out.add(&coord.mul(&ScalarExpr::i32(self.strides[d] as i32)));
            }
            if let Some(m) = &self.mask {
                let (b, e) = m[d];
                if b > 0 {
                    // b <= coord  <=>  (b - 1) < coord
                    let ge = ScalarExpr::i32(b as i32 - 1).cmplt(&coord);
                    valid = and_opt(valid, ge);
                }
                if e < self.shape[d] {
                    let lt = coord.cmplt(&ScalarExpr::i32(e as i32));
                    valid = and_opt(valid, lt);
                }
                if (b, e) == (0, 0) {
                    valid = and_opt(
                        valid,
                        ScalarExpr::constant(crate::expr::Literal::Bool(false)),
                    );
                }
            }
        }
        (out, valid)
    }

    /// Reference indexer: the buffer index for a flat coordinate, or
    /// `None` when the coordinate is masked out. Used by tests and the
    /// host-side gather path.
    pub fn index_of(&self, flat: usize) -> Option<i64> {
        let mut rem = flat;
        let mut out = self.offset;
        for d in (0..self.shape.len()).rev() {
            let coord = rem % self.shape[d];
            rem /= self.shape[d];
            if let Some(m) = &self.mask {
                let (b, e) = m[d];
                if coord < b || coord >= e {
                    return None;
                }
            }
            out += coord as i64 * self.strides[d];
        }
        Some(out)
    }
}

/// Row-major strides with size-1 dims zeroed (canonical form).
fn contiguous_strides(shape: &[usize]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1] as i64;
    }
    for (i, s) in shape.iter().enumerate() {
        if *s <= 1 {
            strides[i] = 0;
        }
    }
    strides
}

fn and_opt(acc: Option<ScalarExpr>, cond: ScalarExpr) -> Option<ScalarExpr> {
    Some(match acc {
        Some(a) => a.mul(&cond),
        None => cond,
    })
}

/// An ordered stack of views over a backing buffer.
///
/// `views[0]` is closest to the buffer; the last view carries the
/// user-visible shape. Operations apply to the top view and append a new
/// one only when a reshape cannot be fused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeTracker {
    views: Vec<View>,
}

impl ShapeTracker {
    /// A contiguous tracker over `shape`.
    pub fn from_shape(shape: Vec<usize>) -> Self {
        ShapeTracker {
            views: vec![View::new(shape)],
        }
    }

    /// The user-visible shape.
    pub fn shape(&self) -> &[usize] {
        self.top().shape()
    }

    /// Number of user-visible elements.
    pub fn size(&self) -> usize {
        self.top().size()
    }

    /// Number of user-visible dimensions.
    pub fn ndim(&self) -> usize {
        self.top().shape().len()
    }

    /// The stacked views, buffer-side first.
    pub fn views(&self) -> &[View] {
        &self.views
    }

    fn top(&self) -> &View {
        self.views.last().expect("tracker has at least one view")
    }

    fn replace_top(&self, view: View) -> ShapeTracker {
        let mut views = self.views.clone();
        *views.last_mut().unwrap() = view;
        ShapeTracker { views }
    }

    /// True when the tracker is a single dense row-major view.
    pub fn is_contiguous(&self) -> bool {
        self.views.len() == 1 && self.views[0].is_contiguous()
    }

    /// Reshape; appends a view when the stride rewrite cannot represent it.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<ShapeTracker> {
        let old_size: usize = self.shape().iter().product();
        let new_size: usize = new_shape.iter().product();
        if old_size != new_size {
            return Err(Error::Shape(format!(
                "cannot reshape {} elements into shape {:?}",
                old_size, new_shape
            )));
        }
        match self.top().reshape(new_shape) {
            Some(view) => Ok(self.replace_top(view)),
            None => {
                let mut views = self.views.clone();
                views.push(View::new(new_shape.to_vec()));
                Ok(ShapeTracker { views })
            }
        }
    }

    /// Permute dimensions.
    pub fn permute(&self, order: &[usize]) -> Result<ShapeTracker> {
        let ndim = self.ndim();
        let mut seen = vec![false; ndim];
        if order.len() != ndim {
            return Err(Error::Shape(format!(
                "permutation {:?} does not match rank {}",
                order, ndim
            )));
        }
        for &d in order {
            if d >= ndim || seen[d] {
                return Err(Error::Shape(format!("invalid permutation {:?}", order)));
            }
            seen[d] = true;
        }
        Ok(self.replace_top(self.top().permute(order)))
    }

    /// Broadcast size-1 dimensions up to `new_shape`.
    pub fn expand(&self, new_shape: &[usize]) -> Result<ShapeTracker> {
        if new_shape.len() != self.ndim() {
            return Err(Error::Shape(format!(
                "expand target {:?} does not match rank {}",
                new_shape,
                self.ndim()
            )));
        }
        Ok(self.replace_top(self.top().expand(new_shape)?))
    }

    /// Restrict each dimension to `[begin, end)`.
    pub fn shrink(&self, ranges: &[(usize, usize)]) -> Result<ShapeTracker> {
        if ranges.len() != self.ndim() {
            return Err(Error::Shape("shrink ranges do not match rank".into()));
        }
        for (d, &(b, e)) in ranges.iter().enumerate() {
            if b > e || e > self.shape()[d] {
                return Err(Error::Shape(format!(
                    "invalid slice [{}, {}) for dimension {} of size {}",
                    b, e, d, self.shape()[d]
                )));
            }
        }
        Ok(self.replace_top(self.top().shrink(ranges)))
    }

    /// Zero-pad each dimension by `(before, after)`.
    pub fn pad(&self, padding: &[(usize, usize)]) -> Result<ShapeTracker> {
        if padding.len() != self.ndim() {
            return Err(Error::Shape("padding does not match rank".into()));
        }
        Ok(self.replace_top(self.top().pad(padding)))
    }

    /// Reverse the listed axes.
    pub fn flip(&self, axes: &[usize]) -> Result<ShapeTracker> {
        for &d in axes {
            if d >= self.ndim() {
                return Err(Error::Shape(format!(
                    "flip axis {} out of bounds for rank {}",
                    d,
                    self.ndim()
                )));
            }
        }
        Ok(self.replace_top(self.top().flip(axes)))
    }

    /// Fold a linear output index into a buffer index, composing the view
    /// stack right-to-left. Returns the index expression and an optional
    /// validity condition (reads outside a mask yield the dtype's zero).
    pub fn index_expr(&self, idx: &ScalarExpr) -> (ScalarExpr, Option<ScalarExpr>) {
        let mut cur = idx.clone();
        let mut valid: Option<ScalarExpr> = None;
        for view in self.views.iter().rev() {
            let (next, v) = view.index_expr(&cur);
            cur = next;
            if let Some(v) = v {
                valid = and_opt(valid, v);
            }
        }
        (cur.simplify(), valid.map(|v| v.simplify()))
    }

    /// Reference indexer through the whole stack (tests and host gather).
    pub fn index_of(&self, flat: usize) -> Option<i64> {
        let mut cur = flat as i64;
        for view in self.views.iter().rev() {
            if cur < 0 {
                return None;
            }
            cur = view.index_of(cur as usize)?;
        }
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{EvalContext, Literal};

    fn fold(st: &ShapeTracker, i: i32) -> (i64, bool) {
        let gidx = ScalarExpr::gidx(st.size());
        let (idx, valid) = st.index_expr(&gidx);
        let mut ctx = EvalContext::empty();
        ctx.bind("gidx", Literal::I32(i));
        let v = valid.map_or(true, |e| match e.evaluate(&ctx).unwrap() {
            Literal::Bool(b) => b,
            _ => unreachable!(),
        });
        (idx.evaluate(&ctx).unwrap().as_i64(), v)
    }

    #[test]
    fn test_contiguous_view() {
        let v = View::new(vec![2, 3, 4]);
        assert_eq!(v.strides(), &[12, 4, 1]);
        assert!(v.is_contiguous());
        assert_eq!(v.index_of(13), Some(13));
    }

    #[test]
    fn test_size_one_dims_have_stride_zero() {
        let v = View::new(vec![2, 1, 4]);
        assert_eq!(v.strides(), &[4, 0, 1]);
        assert!(v.is_contiguous());
    }

    #[test]
    fn test_permute() {
        let st = ShapeTracker::from_shape(vec![2, 3]).permute(&[1, 0]).unwrap();
        assert_eq!(st.shape(), &[3, 2]);
        // Element (i, j) of the transpose reads (j, i) of the base.
        for i in 0..3 {
            for j in 0..2 {
                let flat = i * 2 + j;
                let (idx, valid) = fold(&st, flat as i32);
                assert!(valid);
                assert_eq!(idx, (j * 3 + i) as i64);
            }
        }
        assert!(!st.is_contiguous());
    }

    #[test]
    fn test_reshape_fuses_contiguous() {
        let st = ShapeTracker::from_shape(vec![2, 3, 4]);
        let st = st.reshape(&[6, 4]).unwrap();
        assert_eq!(st.views().len(), 1);
        assert!(st.is_contiguous());
        let st = st.reshape(&[24]).unwrap();
        assert!(st.is_contiguous());
    }

    #[test]
    fn test_reshape_after_permute_appends_view() {
        let st = ShapeTracker::from_shape(vec![2, 3])
            .permute(&[1, 0])
            .unwrap()
            .reshape(&[6])
            .unwrap();
        assert_eq!(st.views().len(), 2);
        // Element k of the flattened transpose is T[k/2][k%2] = A[k%2][k/2].
        let expect = [0i64, 3, 1, 4, 2, 5];
        for (k, &e) in expect.iter().enumerate() {
            assert_eq!(fold(&st, k as i32), (e, true));
        }
    }

    #[test]
    fn test_expand_broadcast() {
        let st = ShapeTracker::from_shape(vec![1, 3]).expand(&[4, 3]).unwrap();
        assert_eq!(st.shape(), &[4, 3]);
        for i in 0..12 {
            let (idx, valid) = fold(&st, i);
            assert!(valid);
            assert_eq!(idx, (i % 3) as i64);
        }
    }

    #[test]
    fn test_shrink() {
        let st = ShapeTracker::from_shape(vec![4, 4])
            .shrink(&[(1, 3), (2, 4)])
            .unwrap();
        assert_eq!(st.shape(), &[2, 2]);
        let expect = [6i64, 7, 10, 11];
        for (k, &e) in expect.iter().enumerate() {
            assert_eq!(fold(&st, k as i32), (e, true));
        }
    }

    #[test]
    fn test_pad_masks_border() {
        let st = ShapeTracker::from_shape(vec![3]).pad(&[(1, 1)]).unwrap();
        assert_eq!(st.shape(), &[5]);
        assert_eq!(fold(&st, 0).1, false);
        assert_eq!(fold(&st, 1), (0, true));
        assert_eq!(fold(&st, 3), (2, true));
        assert_eq!(fold(&st, 4).1, false);
        assert_eq!(st.index_of(0), None);
        assert_eq!(st.index_of(2), Some(1));
    }

    #[test]
    fn test_flip() {
        let st = ShapeTracker::from_shape(vec![4]).flip(&[0]).unwrap();
        for i in 0..4 {
            assert_eq!(fold(&st, i), ((3 - i) as i64, true));
        }
    }

    #[test]
    fn test_mask_pins_single_index() {
        // Shrinking to one column then padding pins the dim; the stride
        // must be zeroed with the offset absorbing the index.
        let v = View::new(vec![4, 4]).shrink(&[(0, 4), (2, 3)]);
        assert_eq!(v.shape(), &[4, 1]);
        assert_eq!(v.strides()[1], 0);
        assert_eq!(v.offset(), 2);
    }

    #[test]
    fn test_empty_mask_collapses() {
        let v = View::new(vec![3]).shrink(&[(1, 1)]);
        assert_eq!(v.size(), 0);
        let st = ShapeTracker::from_shape(vec![4]).pad(&[(2, 0)]).unwrap();
        let st = st.shrink(&[(0, 2)]).unwrap();
        // Entirely inside the padding: every read is invalid.
        for i in 0..2 {
            assert_eq!(fold(&st, i).1, false);
            assert_eq!(st.index_of(i as usize), None);
        }
    }

    #[test]
    fn test_contiguity_iff_reshape_identity() {
        // A tracker is contiguous iff reshape(shape) on a fresh row-major
        // view returns the same view.
        let cases = [
            ShapeTracker::from_shape(vec![2, 3]),
            ShapeTracker::from_shape(vec![2, 3]).permute(&[1, 0]).unwrap(),
            ShapeTracker::from_shape(vec![6]).reshape(&[2, 3]).unwrap(),
            ShapeTracker::from_shape(vec![4]).pad(&[(1, 0)]).unwrap().shrink(&[(0, 4)]).unwrap(),
        ];
        for st in &cases {
            let fresh = View::new(st.shape().to_vec());
            let same = st.views().len() == 1
                && st.views()[0] == fresh;
            assert_eq!(st.is_contiguous(), same, "tracker {:?}", st);
        }
    }

    #[test]
    fn test_multi_view_masked_composition() {
        // pad -> reshape (forced new view) -> fold still yields zeros
        // outside the mask.
        let st = ShapeTracker::from_shape(vec![2, 2])
            .permute(&[1, 0])
            .unwrap()
            .pad(&[(1, 0), (0, 0)])
            .unwrap();
        assert_eq!(st.shape(), &[3, 2]);
        let st = st.reshape(&[6]).unwrap();
        assert_eq!(st.views().len(), 2);
        // First two elements are padding.
        assert!(!fold(&st, 0).1);
        assert!(!fold(&st, 1).1);
        // Remaining map to the transpose of the base 2x2.
        assert_eq!(fold(&st, 2), (0, true));
        assert_eq!(fold(&st, 3), (2, true));
        assert_eq!(fold(&st, 4), (1, true));
        assert_eq!(fold(&st, 5), (3, true));
    }

    #[test]
    fn test_reference_indexer_matches_expr() {
        let st = ShapeTracker::from_shape(vec![3, 4])
            .shrink(&[(0, 3), (1, 4)])
            .unwrap()
            .flip(&[0])
            .unwrap()
            .pad(&[(0, 1), (1, 0)])
            .unwrap();
        for i in 0..st.size() {
            let by_expr = fold(&st, i as i32);
            let by_ref = st.index_of(i);
            match by_ref {
                Some(idx) => {
                    assert!(by_expr.1, "expr says invalid, reference says {}", idx);
                    assert_eq!(by_expr.0, idx);
                }
                None => assert!(!by_expr.1),
            }
        }
    }
}
