// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized numeric thresholds with documented origin.
//!
//! Every tolerance used anywhere in the crate is defined here. No ad-hoc
//! magic numbers in kernels or tests.
//!
//! | Category | Basis | Example |
//! |----------|-------|---------|
//! | Backend contract | What any accelerated backend must meet | `GRID_VALIDATE_REL` |
//! | Machine precision | IEEE 754 f64 round-off accumulation | `ROTATION_IDENTITY_REL` |
//! | Numerical method | Discretization / finite differences | `FORCE_FD_REL` |

/// Element-wise backend validation: `|a - b| / max(1, |ref|)` must stay below
/// this. Any excess is a correctness bug in the primary backend, not a
/// warning.
pub const GRID_VALIDATE_REL: f64 = 1e-12;

/// A cell-vector pair counts as orthogonal when the magnitude of the cosine
/// of its angle is below this.
pub const ORTHO_COS_TOL: f64 = 1e-12;

/// Guard subtracted inside the orthogonal cube-bound `ceil` so that a radius
/// landing exactly on a grid plane does not gain a spurious extra layer.
pub const CUBE_BOUND_EPS: f64 = 1e-8;

/// Rotating a coefficient tensor with an identity cell matrix must reproduce
/// the input to accumulated f64 round-off.
pub const ROTATION_IDENTITY_REL: f64 = 1e-10;

/// Forward-then-inverse frame rotation with a non-degenerate cell matrix must
/// round-trip within this. Looser than the identity case: the inverse picks
/// up the conditioning of `dh`.
pub const ROTATION_ROUNDTRIP_REL: f64 = 1e-10;

/// Collocate/integrate adjointness `<V, collocate(pab)> == <integrate(V), pab>`:
/// both sides are the same bilinear sum evaluated in different orders, so they
/// agree to near round-off.
pub const ADJOINT_REL: f64 = 1e-11;

/// Collocated Gaussian mass against the analytic `(pi/zetp)^(3/2)` integral.
/// The lattice sum of a well-resolved, well-truncated Gaussian converges
/// far below this; the bound leaves margin for the cube truncation.
pub const GAUSS_MASS_REL: f64 = 1e-10;

/// Analytic force contributions against central finite differences of the
/// integrate energy. Limited by the FD step, not by the integrals.
pub const FORCE_FD_REL: f64 = 1e-6;

/// Number of tasks whose cubes the CPU backend evaluates in parallel before
/// folding them serially into the level grid. Bounds scratch memory at
/// roughly `PAR_BATCH * cmax^3` doubles while keeping all cores busy.
pub const PAR_BATCH: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::assertions_on_constants)] // constants sanity check
    fn tolerances_are_positive() {
        let tols = [
            GRID_VALIDATE_REL,
            ORTHO_COS_TOL,
            CUBE_BOUND_EPS,
            ROTATION_IDENTITY_REL,
            ROTATION_ROUNDTRIP_REL,
            ADJOINT_REL,
            GAUSS_MASS_REL,
            FORCE_FD_REL,
        ];
        for (i, &t) in tols.iter().enumerate() {
            assert!(t > 0.0, "tolerance index {i} must be positive, got {t}");
        }
    }

    #[test]
    #[allow(clippy::assertions_on_constants)] // constants sanity check
    fn tolerance_ordering() {
        // Validation is the strictest check; FD forces the loosest.
        assert!(GRID_VALIDATE_REL < ROTATION_IDENTITY_REL);
        assert!(ROTATION_IDENTITY_REL <= ROTATION_ROUNDTRIP_REL);
        assert!(GAUSS_MASS_REL < FORCE_FD_REL);
    }

    #[test]
    #[allow(clippy::assertions_on_constants)] // constants sanity check
    fn batch_size_sensible() {
        assert!(PAR_BATCH >= 8, "too-small batches waste thread wakeups");
        assert!(PAR_BATCH <= 1024, "too-large batches blow up cube scratch");
    }
}
