//! Unified error types for the pricing engine.
//!
//! Recoverable conditions (time limits, infeasible subproblems) are *not*
//! errors; they travel as [`PricingStatus`](../solver-status) values through
//! the controller. The variants here abort the pricing call.

use thiserror::Error;

/// Error type shared by all engine crates.
#[derive(Error, Debug)]
pub enum PricingError {
    /// Allocation failure or a size limit overflow.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Unknown scoring choice, missing callback, malformed option value.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Solver contract violation: NaN dual, non-finite coefficient, or a
    /// status inconsistent with the returned columns.
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    /// Generic errors (for wrapping external errors).
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using PricingError.
pub type PricingResult<T> = Result<T, PricingError>;

impl From<anyhow::Error> for PricingError {
    fn from(err: anyhow::Error) -> Self {
        PricingError::Other(err.to_string())
    }
}

impl From<String> for PricingError {
    fn from(s: String) -> Self {
        PricingError::Other(s)
    }
}

impl From<&str> for PricingError {
    fn from(s: &str) -> Self {
        PricingError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PricingError::Unrecoverable("NaN dual for master cons 3".into());
        assert!(err.to_string().contains("unrecoverable"));
        assert!(err.to_string().contains("NaN dual"));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> PricingResult<()> {
            Err(PricingError::InvalidConfiguration("bad sorting".into()))
        }

        fn outer() -> PricingResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
