//! # lazyjax: a lazy, tracing array library for the web
//!
//! Array operations do not execute eagerly: they are recorded as a small
//! scalar expression IR, composed through tracing transformations
//! (forward-mode differentiation, vectorization, and just-in-time
//! fusion), and materialized by compiling fused kernels to an execution
//! backend (a CPU reference interpreter or WebGPU).
//!
//! ## Key features
//!
//! - **NumPy-style API**: familiar array creation and manipulation
//! - **Automatic differentiation**: `grad`, `jvp`, `jacfwd`
//! - **Vectorization**: `vmap` for batching operations
//! - **JIT compilation**: fused kernel execution via a shape tracker
//!   that rewrites index arithmetic instead of copying data
//! - **Splittable randomness**: Threefry-based keys with reproducible
//!   bit patterns
//!
//! ## Quick start
//!
//! ```rust
//! use lazyjax::{grad, Array, DType, Shape};
//!
//! let x = Array::from_vec(vec![1.0, 2.0, 3.0, 4.0], Shape::new(vec![4])).unwrap();
//! let df = grad(|x: &Array| x.mul(x)?.sum_all());
//! assert_eq!(df(&x).unwrap().data().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod array;
pub mod backend;
mod buffer;
mod device;
mod dtype;
mod error;
pub mod expr;
pub mod kernel;
mod lazy;
pub mod ops;
pub mod random;
mod shape;
pub mod trace;
pub mod tree;
pub mod view;

// Public exports
pub use array::Array;
pub use device::{available_devices, default_device, set_default_device, Device};
pub use dtype::DType;
pub use error::{Error, Result};
pub use ops::einsum::{einsum, einsum_path, EinsumPath, PathKind};
pub use ops::linalg::ConvPadding;
pub use shape::Shape;
pub use trace::{
    grad, grad_with_argnum, jacfwd, jit, jvp, jvp_tree, value_and_grad, vmap, vmap2, JitFunction,
};
pub use tree::{Tree, TreeDef};
