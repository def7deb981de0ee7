// SPDX-License-Identifier: AGPL-3.0-only

//! Element-wise grid comparison for backend cross-validation.
//!
//! The acceptance criterion is combined absolute/relative:
//! `|a - b| / max(1, |reference|) <= GRID_VALIDATE_REL`. Any excess is a
//! correctness bug in the primary backend and surfaces as a
//! `ValidationMismatch` carrying the full diagnostic (level, 3-D index,
//! both values, absolute and relative difference).

use crate::error::GridError;
use crate::tensor::GridArray;
use crate::tolerances::GRID_VALIDATE_REL;

/// Compare a primary backend's level grid against the reference result.
///
/// # Errors
///
/// `Precondition` when the grids disagree in shape; `ValidationMismatch`
/// at the first point exceeding the tolerance.
pub fn compare_grids(
    level: usize,
    primary: &GridArray,
    reference: &GridArray,
) -> Result<(), GridError> {
    if primary.size() != reference.size() {
        return Err(GridError::Precondition(format!(
            "validation grids disagree in shape: {:?} vs {:?}",
            primary.size(),
            reference.size()
        )));
    }
    let size = primary.size();
    for i in 0..size[0] {
        for j in 0..size[1] {
            let p_row = primary.row(i, j);
            let r_row = reference.row(i, j);
            for k in 0..size[2] {
                let value = p_row[k];
                let reference_value = r_row[k];
                let diff = (value - reference_value).abs();
                let rel_diff = diff / reference_value.abs().max(1.0);
                if rel_diff > GRID_VALIDATE_REL {
                    return Err(GridError::ValidationMismatch {
                        level,
                        index: [i, j, k],
                        value,
                        reference: reference_value,
                        diff,
                        rel_diff,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Largest combined-relative deviation between two grids, for diagnostics
/// and tests.
#[must_use]
pub fn max_rel_diff(a: &GridArray, b: &GridArray) -> f64 {
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y).abs() / y.abs().max(1.0))
        .fold(0.0, f64::max)
}
