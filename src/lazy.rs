//! Lazy arrays: the concrete evaluation layer.
//!
//! A lazy array is a scalar expression (or a reduction in progress, or a
//! realized buffer slot) plus a shape tracker over it. Pointwise
//! operations compose expressions without executing anything; view
//! operations rewrite the shape tracker; reductions open a kernel whose
//! epilogue can still absorb a trailing pointwise chain. Work is queued
//! as pending kernels and only runs when data is demanded.

use crate::backend::ExeId;
use crate::buffer::Buffer;
use crate::expr::{Literal, ScalarExpr};
use crate::kernel::{Kernel, Reduce};
use crate::view::ShapeTracker;
use crate::{DType, Device, Error, Result, Shape};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// A kernel queued to materialize a slot, with its dependencies.
#[derive(Debug)]
pub(crate) struct PendingKernel {
    kernel: Kernel,
    inputs: Vec<Arc<Buffer>>,
    output: Arc<Buffer>,
    deps: Vec<Arc<PendingKernel>>,
    exe: OnceLock<ExeId>,
    done: AtomicBool,
}

/// Where an array's values come from.
#[derive(Debug, Clone)]
enum LazySource {
    /// A realized (or pending) buffer; the tracker indexes into it.
    Slot(Arc<Buffer>),
    /// A pointwise expression over `gidx` in a virtual space the tracker
    /// indexes into; buffer reads go through the gid table.
    Expr(ScalarExpr),
    /// A reduction that has not been materialized yet; the tracker must
    /// stay contiguous over its output space.
    Reduce { body: ScalarExpr, reduce: Reduce },
}

#[derive(Debug, Clone)]
struct LazyState {
    source: LazySource,
    st: ShapeTracker,
    dtype: DType,
    device: Device,
    inputs: Vec<Arc<Buffer>>,
    pending: Vec<Arc<PendingKernel>>,
}

/// A lazy array over a backend.
///
/// Cheap to clone; clones share state, so realizing or disposing one
/// handle is visible through the others.
#[derive(Debug, Clone)]
pub struct LazyArray {
    inner: Arc<Mutex<Option<LazyState>>>,
}

/// Reduction kinds understood by the evaluation layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReduceKind {
    /// Sum of elements
    Sum,
    /// Maximum element
    Max,
    /// Minimum element
    Min,
}

impl LazyArray {
    fn from_state(state: LazyState) -> LazyArray {
        LazyArray {
            inner: Arc::new(Mutex::new(Some(state))),
        }
    }

    /// Wrap storage words as a contiguous array.
    pub fn from_words(
        device: Device,
        dtype: DType,
        shape: Vec<usize>,
        words: &[u32],
    ) -> Result<LazyArray> {
        let size: usize = shape.iter().product();
        if words.len() != size {
            return Err(Error::Shape(format!(
                "{} words do not fill shape {:?}",
                words.len(),
                shape
            )));
        }
        let buf = Buffer::alloc(device, dtype, size, Some(words))?;
        Ok(Self::from_state(LazyState {
            source: LazySource::Slot(buf),
            st: ShapeTracker::from_shape(shape),
            dtype,
            device,
            inputs: Vec::new(),
            pending: Vec::new(),
        }))
    }

    /// A constant-filled array, represented as a pure expression.
    pub fn full(device: Device, dtype: DType, shape: Vec<usize>, value: Literal) -> LazyArray {
        Self::from_state(LazyState {
            source: LazySource::Expr(ScalarExpr::const_of(value, dtype)),
            st: ShapeTracker::from_shape(shape),
            dtype,
            device,
            inputs: Vec::new(),
            pending: Vec::new(),
        })
    }

    /// `[0, 1, 2, ...)` as Int32, represented as the index expression.
    pub fn iota(device: Device, n: usize) -> LazyArray {
        Self::from_state(LazyState {
            source: LazySource::Expr(ScalarExpr::gidx(n)),
            st: ShapeTracker::from_shape(vec![n]),
            dtype: DType::Int32,
            device,
            inputs: Vec::new(),
            pending: Vec::new(),
        })
    }

    /// Stable identity of the shared state (used for interning captured
    /// constants during tracing).
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn with_state<R>(&self, f: impl FnOnce(&LazyState) -> Result<R>) -> Result<R> {
        let guard = self.inner.lock().unwrap();
        match guard.as_ref() {
            Some(state) => f(state),
            None => Err(Error::Reference("array was disposed".into())),
        }
    }

    /// The array's shape.
    pub fn shape(&self) -> Result<Shape> {
        self.with_state(|s| Ok(Shape::new(s.st.shape().to_vec())))
    }

    /// The array's dtype.
    pub fn dtype(&self) -> Result<DType> {
        self.with_state(|s| Ok(s.dtype))
    }

    /// The array's device.
    pub fn device(&self) -> Result<Device> {
        self.with_state(|s| Ok(s.device))
    }

    /// Number of elements.
    pub fn size(&self) -> Result<usize> {
        self.with_state(|s| Ok(s.st.size()))
    }

    /// Drop the array's resources. Further use (including a second
    /// dispose) is a reference error.
    pub fn dispose(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        match guard.take() {
            Some(_) => Ok(()),
            None => Err(Error::Reference("array already disposed".into())),
        }
    }

    /// The value of this array at an arbitrary linear-index expression,
    /// with the gid table and pending kernels the caller must merge in.
    ///
    /// Reductions freeze first; pointwise chains substitute directly.
    fn value_at(
        state: &LazyState,
        index: &ScalarExpr,
    ) -> (ScalarExpr, Vec<Arc<Buffer>>, Vec<Arc<PendingKernel>>) {
        let (idx, valid) = state.st.index_expr(index);
        let (raw, inputs) = match &state.source {
            LazySource::Slot(buf) => (
                ScalarExpr::global(0, idx, state.dtype),
                vec![buf.clone()],
            ),
            LazySource::Expr(e) => (e.subst_special("gidx", &idx), state.inputs.clone()),
            LazySource::Reduce { .. } => unreachable!("reductions are frozen before composition"),
        };
        let value = match valid {
            Some(v) => ScalarExpr::select(&v, &raw, &ScalarExpr::zero(state.dtype)),
            None => raw,
        };
        (value, inputs, state.pending.clone())
    }

    /// This array's state with any in-progress reduction frozen into a
    /// pending kernel and slot. The freeze is written back, so later
    /// consumers share the slot instead of re-running the reduction.
    fn composable_state(&self) -> Result<LazyState> {
        let mut guard = self.inner.lock().unwrap();
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::Reference("array was disposed".into()))?;
        if matches!(state.source, LazySource::Reduce { .. }) {
            *state = freeze(state)?;
        }
        Ok(state.clone())
    }

    /// Apply a pointwise n-ary operation across arrays of one shape.
    ///
    /// All operands must share shape, and device. The result dtype is
    /// given by the caller. When the first operand is an unmaterialized
    /// reduction of the same dtype, the operation extends its epilogue
    /// instead of cutting a kernel boundary.
    pub fn pointwise(
        operands: &[&LazyArray],
        out_dtype: DType,
        build: impl FnOnce(&[ScalarExpr]) -> ScalarExpr,
    ) -> Result<LazyArray> {
        assert!(!operands.is_empty());
        let device = operands[0].device()?;
        let shape = operands[0].shape()?;
        for o in operands.iter().skip(1) {
            if o.device()? != device {
                return Err(Error::Backend(
                    "operands live on different devices".into(),
                ));
            }
            if o.shape()? != shape {
                return Err(Error::Shape(format!(
                    "pointwise operands disagree: {} vs {}",
                    shape,
                    o.shape()?
                )));
            }
        }
        let size = shape.size();

        // Reduction epilogue fusion: a pointwise op whose first operand
        // is an open reduction (with matching dtype) rides along in the
        // epilogue.
        let first_is_open_reduce = operands[0].with_state(|s| {
            Ok(matches!(s.source, LazySource::Reduce { .. }) && s.dtype == out_dtype)
        })?;
        if first_is_open_reduce {
            return Self::extend_epilogue(operands, out_dtype, build);
        }

        let gidx = ScalarExpr::gidx(size);
        let mut exprs = Vec::with_capacity(operands.len());
        let mut inputs: Vec<Arc<Buffer>> = Vec::new();
        let mut pending: Vec<Arc<PendingKernel>> = Vec::new();
        for o in operands {
            let state = o.composable_state()?;
            let (e, ins, pend) = Self::value_at(&state, &gidx);
            let remapped = merge_inputs(&mut inputs, &ins);
            exprs.push(e.remap_gids(&remapped));
            merge_pending(&mut pending, pend);
        }
        let expr = build(&exprs).simplify();
        Ok(Self::from_state(LazyState {
            source: LazySource::Expr(expr),
            st: ShapeTracker::from_shape(shape.as_slice().to_vec()),
            dtype: out_dtype,
            device,
            inputs,
            pending,
        }))
    }

    /// Extend the epilogue of an open reduction (first operand) with a
    /// pointwise operation over the remaining operands.
    fn extend_epilogue(
        operands: &[&LazyArray],
        out_dtype: DType,
        build: impl FnOnce(&[ScalarExpr]) -> ScalarExpr,
    ) -> Result<LazyArray> {
        let state = operands[0].with_state(|s| Ok(s.clone()))?;
        let (body, reduce) = match &state.source {
            LazySource::Reduce { body, reduce } => (body.clone(), reduce.clone()),
            _ => unreachable!(),
        };
        let size = state.st.size();
        let gidx = ScalarExpr::gidx(size);
        let mut inputs = state.inputs.clone();
        let mut pending = state.pending.clone();

        let mut exprs = Vec::with_capacity(operands.len());
        exprs.push(
            reduce
                .epilogue
                .clone()
                .unwrap_or_else(|| ScalarExpr::acc(state.dtype)),
        );
        for o in operands.iter().skip(1) {
            let ostate = o.composable_state()?;
            let (e, ins, pend) = Self::value_at(&ostate, &gidx);
            let remapped = merge_inputs(&mut inputs, &ins);
            exprs.push(e.remap_gids(&remapped));
            merge_pending(&mut pending, pend);
        }
        let epilogue = build(&exprs).simplify();
        Ok(Self::from_state(LazyState {
            source: LazySource::Reduce {
                body,
                reduce: Reduce {
                    epilogue: Some(epilogue),
                    ..reduce
                },
            },
            st: state.st.clone(),
            dtype: out_dtype,
            device: state.device,
            inputs,
            pending,
        }))
    }

    /// Apply a view operation through the shape tracker.
    ///
    /// An open reduction survives only tracker rewrites that keep its
    /// output space contiguous (e.g. a pure reshape); anything else
    /// freezes it first.
    pub fn view_op(
        &self,
        f: impl Fn(&ShapeTracker) -> Result<ShapeTracker>,
    ) -> Result<LazyArray> {
        let state = self.with_state(|s| Ok(s.clone()))?;
        if matches!(state.source, LazySource::Reduce { .. }) {
            let st = f(&state.st)?;
            if st.is_contiguous() {
                return Ok(Self::from_state(LazyState { st, ..state }));
            }
            let frozen = freeze(&state)?;
            let st = f(&frozen.st)?;
            return Ok(Self::from_state(LazyState { st, ..frozen }));
        }
        let st = f(&state.st)?;
        Ok(Self::from_state(LazyState { st, ..state }))
    }

    /// Reduce over trailing semantics: `axes` are sorted axis indices of
    /// this array; the output drops them.
    pub fn reduce(&self, axes: &[usize], kind: ReduceKind) -> Result<LazyArray> {
        let state = self.composable_state()?;
        let ndim = state.st.ndim();
        for &a in axes {
            if a >= ndim {
                return Err(Error::Shape(format!(
                    "reduction axis {} out of bounds for rank {}",
                    a, ndim
                )));
            }
        }

        // Move reduced axes innermost: [kept..., reduced...].
        let kept: Vec<usize> = (0..ndim).filter(|d| !axes.contains(d)).collect();
        let perm: Vec<usize> = kept.iter().chain(axes.iter()).copied().collect();
        let permuted = state.st.permute(&perm)?;
        let shape = permuted.shape().to_vec();
        let out_shape: Vec<usize> = shape[..kept.len()].to_vec();
        let out_size: usize = out_shape.iter().product();
        let red_size: usize = shape[kept.len()..].iter().product();

        // Linear index into the permuted space: gidx * red_size + ridx.
        let combined = ScalarExpr::gidx(out_size)
            .mul(&ScalarExpr::i32(red_size as i32))
            .add(&ScalarExpr::ridx(red_size));
        let probe = LazyState {
            st: permuted,
            ..state.clone()
        };
        let (body, inputs, pending) = Self::value_at(&probe, &combined);

        let reduce = match kind {
            ReduceKind::Sum => Reduce::sum(red_size, state.dtype),
            ReduceKind::Max => Reduce::max(red_size, state.dtype),
            ReduceKind::Min => Reduce::min(red_size, state.dtype),
        };
        Ok(Self::from_state(LazyState {
            source: LazySource::Reduce {
                body: body.simplify(),
                reduce,
            },
            st: ShapeTracker::from_shape(out_shape),
            dtype: state.dtype,
            device: state.device,
            inputs,
            pending,
        }))
    }

    /// Realize the array into a contiguous buffer, dispatching every
    /// pending kernel in topological order.
    pub fn realize(&self) -> Result<Arc<Buffer>> {
        let mut guard = self.inner.lock().unwrap();
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::Reference("array was disposed".into()))?;

        let needs_copy = match &state.source {
            LazySource::Slot(_) => !state.st.is_contiguous(),
            _ => true,
        };
        if needs_copy {
            *state = freeze(state)?;
        }

        // Prepare everything first, then dispatch in dependency order.
        let order = topo_order(&state.pending);
        for pk in &order {
            let backend = pk.output.backend();
            let exe = backend.prepare(&pk.kernel)?;
            let _ = pk.exe.set(exe);
        }
        for pk in &order {
            if pk.done.swap(true, Ordering::SeqCst) {
                continue;
            }
            let backend = pk.output.backend();
            let inputs: Vec<_> = pk.inputs.iter().map(|b| b.slot()).collect();
            let exe = *pk.exe.get().expect("prepared above");
            backend.dispatch(exe, &inputs, &[pk.output.slot()])?;
        }
        state.pending.clear();

        match &state.source {
            LazySource::Slot(buf) => Ok(buf.clone()),
            _ => unreachable!("frozen above"),
        }
    }

    /// Realize and read back as storage words.
    pub fn read_words(&self) -> Result<Vec<u32>> {
        let buf = self.realize()?;
        buf.read_words()
    }
}

/// Freeze a state into a pending kernel writing a fresh contiguous slot.
fn freeze(state: &LazyState) -> Result<LazyState> {
    let shape = state.st.shape().to_vec();
    let size: usize = shape.iter().product();

    let (expr, reduce, inputs, deps) = match &state.source {
        LazySource::Reduce { body, reduce } => {
            debug_assert!(state.st.is_contiguous());
            (
                body.clone(),
                Some(reduce.clone()),
                state.inputs.clone(),
                state.pending.clone(),
            )
        }
        _ => {
            let gidx = ScalarExpr::gidx(size);
            let (e, inputs, pending) = LazyArray::value_at(state, &gidx);
            (e, None, inputs, pending)
        }
    };

    let output = Buffer::alloc(state.device, state.dtype, size, None)?;
    let kernel = Kernel::new(state.dtype, size, expr, reduce);
    let pk = Arc::new(PendingKernel {
        kernel,
        inputs,
        output: output.clone(),
        deps,
        exe: OnceLock::new(),
        done: AtomicBool::new(false),
    });
    Ok(LazyState {
        source: LazySource::Slot(output),
        st: ShapeTracker::from_shape(shape),
        dtype: state.dtype,
        device: state.device,
        inputs: Vec::new(),
        pending: vec![pk],
    })
}

/// Merge `extra` buffers into `table`, reusing entries for identical
/// slots; returns the gid remapping for expressions over `extra`.
fn merge_inputs(
    table: &mut Vec<Arc<Buffer>>,
    extra: &[Arc<Buffer>],
) -> FxHashMap<usize, usize> {
    let mut remap = FxHashMap::default();
    for (old_gid, buf) in extra.iter().enumerate() {
        let gid = match table.iter().position(|b| Arc::ptr_eq(b, buf)) {
            Some(i) => i,
            None => {
                table.push(buf.clone());
                table.len() - 1
            }
        };
        remap.insert(old_gid, gid);
    }
    remap
}

/// Append kernels not already present (by identity).
fn merge_pending(list: &mut Vec<Arc<PendingKernel>>, extra: Vec<Arc<PendingKernel>>) {
    for pk in extra {
        if !list.iter().any(|p| Arc::ptr_eq(p, &pk)) {
            list.push(pk);
        }
    }
}

/// Dependency-first ordering of a pending-kernel DAG.
fn topo_order(roots: &[Arc<PendingKernel>]) -> Vec<Arc<PendingKernel>> {
    fn visit(
        pk: &Arc<PendingKernel>,
        seen: &mut FxHashMap<usize, ()>,
        out: &mut Vec<Arc<PendingKernel>>,
    ) {
        let key = Arc::as_ptr(pk) as usize;
        if seen.insert(key, ()).is_some() {
            return;
        }
        for dep in &pk.deps {
            visit(dep, seen, out);
        }
        out.push(pk.clone());
    }
    let mut seen = FxHashMap::default();
    let mut out = Vec::new();
    for pk in roots {
        visit(pk, &mut seen, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(device: Device, shape: Vec<usize>, data: &[f32]) -> LazyArray {
        let words: Vec<u32> = data.iter().map(|v| v.to_bits()).collect();
        LazyArray::from_words(device, DType::Float32, shape, &words).unwrap()
    }

    fn read_f32(a: &LazyArray) -> Vec<f32> {
        a.read_words()
            .unwrap()
            .into_iter()
            .map(f32::from_bits)
            .collect()
    }

    #[test]
    fn test_roundtrip() {
        let a = floats(Device::Cpu, vec![2, 2], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(read_f32(&a), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_pointwise_fusion_single_kernel() {
        let a = floats(Device::Cpu, vec![4], &[1.0, 2.0, 3.0, 4.0]);
        let b = floats(Device::Cpu, vec![4], &[10.0, 20.0, 30.0, 40.0]);
        let sum = LazyArray::pointwise(&[&a, &b], DType::Float32, |xs| xs[0].add(&xs[1])).unwrap();
        let doubled =
            LazyArray::pointwise(&[&sum], DType::Float32, |xs| xs[0].mul(&ScalarExpr::f32(2.0)))
                .unwrap();
        assert_eq!(read_f32(&doubled), vec![22.0, 44.0, 66.0, 88.0]);
    }

    #[test]
    fn test_shared_operand_dedups_gid() {
        let a = floats(Device::Cpu, vec![3], &[1.0, 2.0, 3.0]);
        let sq = LazyArray::pointwise(&[&a, &a], DType::Float32, |xs| xs[0].mul(&xs[1])).unwrap();
        sq.with_state(|s| {
            assert_eq!(s.inputs.len(), 1);
            Ok(())
        })
        .unwrap();
        assert_eq!(read_f32(&sq), vec![1.0, 4.0, 9.0]);
    }

    #[test]
    fn test_view_then_pointwise() {
        let a = floats(Device::Cpu, vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = a.view_op(|st| st.permute(&[1, 0])).unwrap();
        assert_eq!(read_f32(&t), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_reduce_sum_rows() {
        let a = floats(Device::Cpu, vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let s = a.reduce(&[1], ReduceKind::Sum).unwrap();
        assert_eq!(s.shape().unwrap().as_slice(), &[2]);
        assert_eq!(read_f32(&s), vec![6.0, 15.0]);
    }

    #[test]
    fn test_reduce_epilogue_fusion() {
        let a = floats(Device::Cpu, vec![2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let s = a.reduce(&[1], ReduceKind::Sum).unwrap();
        // Scaling the sums rides in the epilogue: still one open reduce.
        let halved =
            LazyArray::pointwise(&[&s], DType::Float32, |xs| xs[0].mul(&ScalarExpr::f32(0.5)))
                .unwrap();
        halved
            .with_state(|st| {
                assert!(matches!(st.source, LazySource::Reduce { .. }));
                Ok(())
            })
            .unwrap();
        assert_eq!(read_f32(&halved), vec![1.5, 3.5]);
    }

    #[test]
    fn test_reduce_max_min() {
        let a = floats(Device::Cpu, vec![4], &[3.0, -1.0, 7.0, 2.0]);
        let mx = a.reduce(&[0], ReduceKind::Max).unwrap();
        let mn = a.reduce(&[0], ReduceKind::Min).unwrap();
        assert_eq!(read_f32(&mx), vec![7.0]);
        assert_eq!(read_f32(&mn), vec![-1.0]);
    }

    #[test]
    fn test_dispose_semantics() {
        let a = floats(Device::Cpu, vec![2], &[1.0, 2.0]);
        a.dispose().unwrap();
        assert!(matches!(a.dispose(), Err(Error::Reference(_))));
        assert!(matches!(a.read_words(), Err(Error::Reference(_))));
    }

    #[test]
    fn test_realize_caches() {
        let a = floats(Device::Cpu, vec![3], &[1.0, 2.0, 3.0]);
        let b = LazyArray::pointwise(&[&a], DType::Float32, |xs| {
            xs[0].add(&ScalarExpr::f32(1.0))
        })
        .unwrap();
        assert_eq!(read_f32(&b), vec![2.0, 3.0, 4.0]);
        // Second read hits the realized slot.
        assert_eq!(read_f32(&b), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_iota_and_full() {
        let i = LazyArray::iota(Device::Cpu, 4);
        assert_eq!(
            i.read_words().unwrap(),
            vec![0u32, 1, 2, 3]
        );
        let f = LazyArray::full(Device::Cpu, DType::Float32, vec![2], Literal::F32(7.0));
        assert_eq!(read_f32(&f), vec![7.0, 7.0]);
    }
}
