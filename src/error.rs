//! Error types shared across the library.

/// Errors produced by array operations, transforms, and backends.
///
/// Each variant corresponds to a distinct failure class with a stable
/// name; errors bubble to the call site with the interpreter stack
/// unwound on the way.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Broadcast incompatibility, bad reshape size, axis out of bounds,
    /// mismatched batch sizes under vmap.
    #[error("shape error: {0}")]
    Shape(String),

    /// Mixed dtypes without a defined promotion, or an invalid literal.
    #[error("dtype error: {0}")]
    Dtype(String),

    /// Two argument trees differ structurally.
    #[error("tree mismatch: {0}")]
    TreeMismatch(String),

    /// Use-after-dispose, double dispose, or an unknown buffer slot.
    #[error("reference error: {0}")]
    Reference(String),

    /// Kernel compile or dispatch failure; carries compiler diagnostics.
    #[error("backend error: {0}")]
    Backend(String),

    /// A primitive with no rule for the current transform.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Shape("cannot broadcast (2, 3) with (4,)".into());
        assert_eq!(
            err.to_string(),
            "shape error: cannot broadcast (2, 3) with (4,)"
        );
        let err = Error::Reference("slot 3 already freed".into());
        assert!(err.to_string().starts_with("reference error"));
    }
}
