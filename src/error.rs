//! Error types for stream operations
//!
//! Follows the same layering as the rest of the crate's fallible surfaces:
//! a top-level [`StreamError`] that mutating and query APIs return, a
//! [`StructuralError`] for graph-shape violations, and a
//! [`DataConsistencyError`] that is *reported* inside result structs
//! (never returned as `Err`) when a best-effort result is still produced.

use num_rational::Rational64;
use thiserror::Error;

use crate::models::ElementId;

/// Top-level error type for container operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// Graph-shape violation (cycle, duplicate site)
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Offset is negative, NaN or infinite
    #[error("invalid offset {0}: offsets must be finite and non-negative")]
    InvalidOffset(String),

    /// Duration is negative, NaN or infinite
    #[error("invalid duration {0}: lengths must be finite and non-negative")]
    InvalidDuration(String),

    /// Exact-match API could not find the element
    #[error("element {element} is not a direct member of container {container}")]
    NotFound {
        element: ElementId,
        container: ElementId,
    },

    /// Partitioner could not find a window for an element
    #[error("placement error: {0}")]
    Placement(String),

    /// Malformed window marker
    #[error("invalid window marker: {0}")]
    InvalidMeter(String),

    /// An export sink rejected a record or rendering failed
    #[error("export failed: {0}")]
    Export(String),

    /// One aggregated error for a batch operation
    #[error("batch rejected: {} of {total} items failed (first: {})", .failures.len(), first_failure(.failures))]
    Batch {
        total: usize,
        failures: Vec<(usize, StreamError)>,
    },
}

fn first_failure(failures: &[(usize, StreamError)]) -> String {
    failures
        .first()
        .map(|(index, err)| format!("#{}: {}", index, err))
        .unwrap_or_default()
}

/// Violations of the container graph's structural invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// Container would end up inside itself
    #[error("container {container} cannot contain itself (via {element})")]
    SelfContainment {
        container: ElementId,
        element: ElementId,
    },

    /// (element, container) pair already registered
    #[error("element {element} already has a site in container {container}; use set_offset to move it")]
    DuplicateSite {
        element: ElementId,
        container: ElementId,
    },
}

/// Conditions that are logged and reported alongside a best-effort result
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataConsistencyError {
    /// Tie run closed with nothing to merge into its first member
    #[error("tie run starting at offset {offset} on element {element} closed with a single member")]
    SingleMemberTie { element: ElementId, offset: Rational64 },

    /// A `stop` tie that no open run continues into
    #[error("tie stop on element {element} at offset {offset} has no open run")]
    OrphanTieStop { element: ElementId, offset: Rational64 },

    /// Externally supplied span disagrees with the computed one
    #[error("span mismatch: computed {computed}, supplied {supplied}")]
    SpanMismatch {
        computed: Rational64,
        supplied: Rational64,
    },
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_error_message_names_first_failure() {
        let err = StreamError::Batch {
            total: 3,
            failures: vec![(1, StreamError::InvalidOffset("-1".to_string()))],
        };
        let msg = err.to_string();
        assert!(msg.contains("1 of 3"));
        assert!(msg.contains("#1"));
    }

    #[test]
    fn test_structural_error_converts() {
        let err: StreamError = StructuralError::SelfContainment {
            container: ElementId::from_raw(1),
            element: ElementId::from_raw(1),
        }
        .into();
        assert!(matches!(err, StreamError::Structural(_)));
    }
}
