//! The interpreter stack and the primitive dispatch protocol.
//!
//! A process-wide (per-thread) stack of main traces decides who handles
//! each primitive call: the bottom level is the concrete evaluator, and
//! every transformation pushes a level for the dynamic extent of its
//! call through an RAII guard, so a panic or early return still pops the
//! frame.

use crate::array::Array;
use crate::lazy::LazyArray;
use crate::trace::jit::JaxprBuilder;
use crate::trace::primitive::{AbstractValue, Primitive};
use crate::{Error, Result};
use std::cell::{Cell, RefCell};
use std::sync::{Arc, Mutex};

/// What processes primitives at one stack level.
#[derive(Clone)]
pub(crate) enum TraceKind {
    /// Concrete evaluation over lazy arrays (always level 0)
    Eval,
    /// Forward-mode differentiation
    Jvp,
    /// Vectorization
    Batch,
    /// Straight-line program recording
    Jit(Arc<Mutex<JaxprBuilder>>),
}

struct MainTrace {
    kind: TraceKind,
}

thread_local! {
    static TRACE_STACK: RefCell<Vec<MainTrace>> = RefCell::new(vec![MainTrace {
        kind: TraceKind::Eval,
    }]);
    /// Level of the innermost program-recording trace, if any. New
    /// values are raised to it even when no operand is a tracer.
    static DYNAMIC_LEVEL: Cell<Option<usize>> = const { Cell::new(None) };
}

/// RAII frame for a pushed trace level.
pub(crate) struct TraceGuard {
    level: usize,
    prev_dynamic: Option<usize>,
}

impl TraceGuard {
    /// Push a trace level; `dynamic` marks a recording trace that
    /// captures operations on otherwise-concrete values.
    pub fn push(kind: TraceKind, dynamic: bool) -> TraceGuard {
        let level = TRACE_STACK.with(|s| {
            let mut s = s.borrow_mut();
            s.push(MainTrace { kind });
            s.len() - 1
        });
        let prev_dynamic = DYNAMIC_LEVEL.with(|d| d.get());
        if dynamic {
            DYNAMIC_LEVEL.with(|d| d.set(Some(level)));
        }
        TraceGuard {
            level,
            prev_dynamic,
        }
    }

    /// The stack position of this frame.
    pub fn level(&self) -> usize {
        self.level
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        TRACE_STACK.with(|s| {
            s.borrow_mut().pop();
        });
        DYNAMIC_LEVEL.with(|d| d.set(self.prev_dynamic));
    }
}

fn kind_at(level: usize) -> Result<TraceKind> {
    TRACE_STACK.with(|s| {
        s.borrow()
            .get(level)
            .map(|t| t.kind.clone())
            .ok_or_else(|| {
                Error::Unsupported(format!(
                    "tracer escaped its transformation (level {} is gone)",
                    level
                ))
            })
    })
}

/// A primal/tangent pair under forward-mode differentiation.
#[derive(Debug)]
pub(crate) struct JvpPair {
    pub level: usize,
    pub primal: Array,
    pub tangent: Array,
}

/// A value carrying a hidden batch dimension.
#[derive(Debug)]
pub(crate) struct BatchedValue {
    pub level: usize,
    pub value: Array,
    /// Position of the batch axis in `value`, or `None` when unbatched.
    pub bdim: Option<usize>,
}

/// A variable inside a program being recorded.
#[derive(Debug)]
pub(crate) struct JitVariable {
    pub level: usize,
    pub var: usize,
    pub aval: AbstractValue,
}

/// The value inside an [`Array`]: either a concrete lazy array or a
/// tracer belonging to some stack level.
#[derive(Debug, Clone)]
pub(crate) enum TracerValue {
    /// A concrete lazy array (level 0)
    Concrete(LazyArray),
    /// A JVP pair
    Jvp(Arc<JvpPair>),
    /// A batched value
    Batched(Arc<BatchedValue>),
    /// A recorded-program variable
    Jit(Arc<JitVariable>),
}

impl TracerValue {
    /// The stack level this value belongs to.
    pub fn level(&self) -> usize {
        match self {
            TracerValue::Concrete(_) => 0,
            TracerValue::Jvp(p) => p.level,
            TracerValue::Batched(b) => b.level,
            TracerValue::Jit(v) => v.level,
        }
    }
}

/// Apply a primitive to inputs, dispatching through the interpreter
/// stack: find the topmost owning trace (or the dynamic trace when
/// higher), let it lift lower operands and process, and return the
/// outputs at that level.
pub(crate) fn bind(prim: Primitive, inputs: &[Array]) -> Result<Vec<Array>> {
    let mut level = inputs
        .iter()
        .map(|a| a.value().level())
        .max()
        .unwrap_or(0);
    if let Some(dynamic) = DYNAMIC_LEVEL.with(|d| d.get()) {
        level = level.max(dynamic);
    }
    match kind_at(level)? {
        TraceKind::Eval => crate::trace::eval::process_eval(&prim, inputs),
        TraceKind::Jvp => crate::trace::jvp::process_jvp(&prim, inputs, level),
        TraceKind::Batch => crate::trace::vmap::process_batch(&prim, inputs, level),
        TraceKind::Jit(builder) => {
            crate::trace::jit::process_jit(&prim, inputs, level, &builder)
        }
    }
}

/// Bind expecting exactly one output.
pub(crate) fn bind1(prim: Primitive, inputs: &[Array]) -> Result<Array> {
    let mut outs = bind(prim, inputs)?;
    debug_assert_eq!(outs.len(), 1);
    Ok(outs.remove(0))
}
