// SPDX-License-Identifier: AGPL-3.0-only

//! Engine configuration.
//!
//! A [`GridConfig`] is passed explicitly into task-list creation and stored
//! inside the returned handle — there is no process-wide state. Hosts can
//! build it in code or deserialize it from JSON.

use serde::Deserialize;

use crate::backend::BackendKind;
use crate::error::GridError;

/// Configuration consumed at task-list creation.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// Requested backend kind; `auto` picks the best available.
    pub backend: BackendKind,
    /// Run the reference backend alongside every collocation and compare
    /// grids element-wise.
    pub validate: bool,
    /// Prune tasks beyond `pair_cutoff` from the CPU execution set (the
    /// stored task list is never pruned).
    pub apply_cutoff: bool,
    /// Pair-distance cutoff used when `apply_cutoff` is set.
    pub pair_cutoff: f64,
    /// Accelerator device selection; consumed only by non-core backends.
    pub device_id: usize,
    /// Accelerator queue depth; consumed only by non-core backends.
    pub queue_length: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            validate: false,
            apply_cutoff: false,
            pair_cutoff: 0.0,
            device_id: 0,
            queue_length: 8,
        }
    }
}

impl GridConfig {
    /// Parse a configuration from JSON; absent fields take their defaults.
    ///
    /// # Errors
    ///
    /// `Precondition` on malformed JSON or unknown fields.
    pub fn from_json(s: &str) -> Result<Self, GridError> {
        serde_json::from_str(s)
            .map_err(|e| GridError::Precondition(format!("config parse error: {e}")))
    }

    /// Validate cross-field consistency.
    ///
    /// # Errors
    ///
    /// `Precondition` when cutoff pruning is enabled without a positive
    /// cutoff distance.
    pub fn check(&self) -> Result<(), GridError> {
        if self.apply_cutoff && !(self.pair_cutoff > 0.0) {
            return Err(GridError::Precondition(format!(
                "apply_cutoff set with non-positive pair_cutoff {}",
                self.pair_cutoff
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = GridConfig::default();
        assert_eq!(c.backend, BackendKind::Auto);
        assert!(!c.validate);
        assert!(!c.apply_cutoff);
        assert!(c.check().is_ok());
    }

    #[test]
    fn json_round_trip_with_partial_fields() {
        let c = GridConfig::from_json(r#"{"backend": "cpu", "validate": true}"#).expect("parse");
        assert_eq!(c.backend, BackendKind::Cpu);
        assert!(c.validate);
        assert_eq!(c.queue_length, 8, "absent fields take defaults");
    }

    #[test]
    fn json_rejects_unknown_fields() {
        let err = GridConfig::from_json(r#"{"backend": "cpu", "frobnicate": 1}"#);
        assert!(matches!(err, Err(GridError::Precondition(_))));
    }

    #[test]
    fn cutoff_without_distance_rejected() {
        let mut c = GridConfig::default();
        c.apply_cutoff = true;
        assert!(matches!(c.check(), Err(GridError::Precondition(_))));
        c.pair_cutoff = 9.0;
        assert!(c.check().is_ok());
    }

    #[test]
    fn json_parses_all_backends() {
        for (name, kind) in [
            ("ref", BackendKind::Ref),
            ("cpu", BackendKind::Cpu),
            ("gpu", BackendKind::Gpu),
            ("hybrid", BackendKind::Hybrid),
            ("auto", BackendKind::Auto),
        ] {
            let c = GridConfig::from_json(&format!("{{\"backend\": \"{name}\"}}")).expect("parse");
            assert_eq!(c.backend, kind);
        }
    }
}
