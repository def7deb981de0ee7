// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for grid task-list operations.
//!
//! Replaces abort-on-error with a proper enum so callers can pattern-match on
//! failure modes (precondition violation, allocation failure, missing backend,
//! validation mismatch) rather than losing the process. The fail-fast policy
//! is preserved: none of these is recoverable at this layer, and a host that
//! receives one should stop rather than continue with possibly corrupted
//! grid state.

use std::fmt;

use crate::backend::BackendKind;

/// Errors arising from task-list construction, collocation, or integration.
#[derive(Debug)]
pub enum GridError {
    /// Upstream logic error: inconsistent box bounds, a wrapped cube position
    /// outside the local grid, invalid angular momenta, mismatched argument
    /// lengths. The message carries a parameter dump for diagnosis.
    Precondition(String),

    /// A working-buffer allocation failed.
    Allocation {
        /// What was being allocated.
        what: &'static str,
        /// Requested element count.
        elements: usize,
    },

    /// The selected backend is not built into this crate.
    BackendUnavailable {
        /// The backend kind that was requested.
        kind: BackendKind,
    },

    /// A grid point produced by the primary backend disagrees with the
    /// reference backend beyond the documented tolerance.
    ValidationMismatch {
        /// Grid level of the failing point.
        level: usize,
        /// Storage-order index (slowest axis first) of the failing point.
        index: [usize; 3],
        /// Value produced by the primary backend.
        value: f64,
        /// Value produced by the reference backend.
        reference: f64,
        /// Absolute difference.
        diff: f64,
        /// `diff / max(1, |reference|)`.
        rel_diff: f64,
    },
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition(msg) => write!(f, "precondition violated: {msg}"),
            Self::Allocation { what, elements } => {
                write!(f, "allocation of {what} failed ({elements} elements)")
            }
            Self::BackendUnavailable { kind } => {
                write!(
                    f,
                    "the {kind} grid backend is not built into this crate; \
                     select ref, cpu, or auto"
                )
            }
            Self::ValidationMismatch {
                level,
                index,
                value,
                reference,
                diff,
                rel_diff,
            } => {
                write!(
                    f,
                    "grid validation failure: level {level}, point ({}, {}, {}): \
                     value={value:e} reference={reference:e} diff={diff:e} rel_diff={rel_diff:e}",
                    index[0], index[1], index[2]
                )
            }
        }
    }
}

impl std::error::Error for GridError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_precondition() {
        let err = GridError::Precondition("lower corner [0] = -3 outside window".into());
        assert!(err.to_string().contains("precondition"));
        assert!(err.to_string().contains("lower corner"));
    }

    #[test]
    fn display_allocation() {
        let err = GridError::Allocation {
            what: "cube buffer",
            elements: 4096,
        };
        assert_eq!(
            err.to_string(),
            "allocation of cube buffer failed (4096 elements)"
        );
    }

    #[test]
    fn display_backend_unavailable() {
        let err = GridError::BackendUnavailable {
            kind: BackendKind::Gpu,
        };
        assert!(err.to_string().contains("gpu"));
        assert!(err.to_string().contains("not built"));
    }

    #[test]
    fn display_validation_mismatch_carries_diagnostics() {
        let err = GridError::ValidationMismatch {
            level: 2,
            index: [1, 5, 9],
            value: 1.5,
            reference: 1.0,
            diff: 0.5,
            rel_diff: 0.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("level 2"));
        assert!(msg.contains("(1, 5, 9)"));
        assert!(msg.contains("rel_diff"));
    }

    #[test]
    fn error_trait_works() {
        let err = GridError::Precondition("x".into());
        let dyn_err: &dyn std::error::Error = &err;
        assert!(dyn_err.to_string().contains("x"));
    }
}
