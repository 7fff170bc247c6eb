//! Tracing infrastructure: the interpreter stack and the
//! transformations built on it (jvp, vmap, jit, fusion).

mod eval;
pub mod fusion;
mod interpreter;
pub mod jit;
pub mod jvp;
pub mod primitive;
pub mod vmap;

pub(crate) use interpreter::{
    bind, bind1, BatchedValue, JvpPair, JitVariable, TraceGuard, TraceKind, TracerValue,
};

pub use fusion::{fusion_plan, Cluster};
pub use jit::{jit, JitFunction, Jaxpr};
pub use jvp::{grad, grad_with_argnum, jacfwd, jvp, jvp_tree, value_and_grad};
pub use primitive::{AbstractValue, CompareOp, Primitive};
pub use vmap::{vmap, vmap2};
