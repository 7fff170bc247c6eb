//! High-level array operations, grouped by category.

pub mod binary;
pub mod comparison;
pub mod creation;
pub mod einsum;
pub mod linalg;
pub mod manipulation;
pub mod reduce;
pub mod unary;
