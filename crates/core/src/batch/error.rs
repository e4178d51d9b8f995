//! Error types for the batch engine.

use thiserror::Error;

/// Errors that abort a stage before any child process is spawned.
///
/// Every variant describes a configuration problem: the whole stage's work
/// would be wasted, so these propagate immediately instead of being recorded
/// per item. Per-item failures are [`TaskOutcome`](super::TaskOutcome)
/// values, never errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    /// An item identifier was the empty string.
    #[error("Empty item identifier at position {index}")]
    EmptyItem { index: usize },

    /// A resolver could not derive variables from an item.
    #[error("Invalid item {item:?}: {reason}")]
    InvalidItem { item: String, reason: String },

    /// The template text could not be parsed.
    #[error("Malformed template {template:?}: {reason}")]
    MalformedTemplate { template: String, reason: String },

    /// The template references a key the resolver does not provide.
    #[error("Unresolved placeholder {{{placeholder}}} in template {template:?}")]
    UnresolvedPlaceholder {
        placeholder: String,
        template: String,
    },

    /// Concurrency limit was zero, negative or missing.
    #[error("Invalid concurrency limit {value}: must be a positive integer")]
    InvalidConcurrency { value: i64 },

    /// The template expanded to nothing executable.
    #[error("Template {template:?} expands to an empty command")]
    EmptyCommand { template: String },
}

impl BatchError {
    /// Creates a new invalid item error.
    pub fn invalid_item(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidItem {
            item: item.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new malformed template error.
    pub fn malformed(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTemplate {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new unresolved placeholder error.
    pub fn unresolved(placeholder: impl Into<String>, template: impl Into<String>) -> Self {
        Self::UnresolvedPlaceholder {
            placeholder: placeholder.into(),
            template: template.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_offender() {
        let err = BatchError::unresolved("pageNumber", "convert {pageNumber}");
        assert_eq!(
            err.to_string(),
            "Unresolved placeholder {pageNumber} in template \"convert {pageNumber}\""
        );

        let err = BatchError::InvalidConcurrency { value: -2 };
        assert!(err.to_string().contains("-2"));
    }
}
