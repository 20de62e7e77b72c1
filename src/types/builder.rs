//! Builder error types and validation helpers.
//!
//! Builders in this crate are move-based: each setter takes `self` and
//! returns `Self`, and `build()` performs the cross-field validation that a
//! single setter cannot:
//!
//! ```ignore
//! let runtime = RuntimeBuilder::new()
//!     .pool_threads(1, 8)
//!     .scope_deadline(Some(Duration::from_secs(30)))
//!     .build()?;
//! ```
//!
//! Setters never panic; every invalid value surfaces as a [`BuildError`]
//! from `build()`.

use thiserror::Error;

/// Errors that can occur when building a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A field value failed validation.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// The field that failed validation.
        field: &'static str,
        /// Why the value is invalid.
        reason: String,
    },

    /// A range constraint was violated (min > max).
    #[error("invalid range for `{field}`: min {min} > max {max}")]
    InvalidRange {
        /// The field or field pair with the range issue.
        field: &'static str,
        /// The minimum value provided.
        min: u64,
        /// The maximum value provided.
        max: u64,
    },

    /// A resource needed by the built value could not be created.
    #[error("failed to start `{component}`: {reason}")]
    StartFailed {
        /// The component that failed to start.
        component: &'static str,
        /// The underlying failure.
        reason: String,
    },

    /// Any other configuration failure (env parsing, config files).
    #[error("{0}")]
    Custom(String),
}

impl BuildError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Creates an invalid-range error.
    #[must_use]
    pub fn invalid_range(field: &'static str, min: impl Into<u64>, max: impl Into<u64>) -> Self {
        Self::InvalidRange {
            field,
            min: min.into(),
            max: max.into(),
        }
    }

    /// Creates a custom error.
    #[must_use]
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// Result type for builder operations.
pub type BuildResult<T> = Result<T, BuildError>;
