// SPDX-License-Identifier: AGPL-3.0-only

//! Cube geometry: which grid indices a localized function touches.
//!
//! All per-axis arrays here are in storage order (slowest axis first):
//! storage axis `a` corresponds to lattice direction `2 - a`, matching the
//! grid layout in [`crate::tensor`].

use crate::error::GridError;
use crate::tolerances::{CUBE_BOUND_EPS, ORTHO_COS_TOL};

/// Fortran-style modulo: always in `[0, m)` for positive `m`.
#[inline]
#[must_use]
pub const fn modulo(a: i32, m: i32) -> i32 {
    ((a % m) + m) % m
}

/// Invert a cell matrix (`dh[d]` = lattice vector `d` in Cartesian
/// components). The result satisfies the engine's convention
/// `frac_d = sum_c dh_inv[c][d] * r_c`.
#[must_use]
pub fn invert_cell(dh: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let det = dh[0][0] * (dh[1][1] * dh[2][2] - dh[1][2] * dh[2][1])
        - dh[0][1] * (dh[1][0] * dh[2][2] - dh[1][2] * dh[2][0])
        + dh[0][2] * (dh[1][0] * dh[2][1] - dh[1][1] * dh[2][0]);
    let mut inv = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            inv[i][j] = (dh[(j + 1) % 3][(i + 1) % 3] * dh[(j + 2) % 3][(i + 2) % 3]
                - dh[(j + 1) % 3][(i + 2) % 3] * dh[(j + 2) % 3][(i + 1) % 3])
                / det;
        }
    }
    inv
}

/// Discretized footprint of one localized function on the grid.
#[derive(Debug, Clone)]
pub struct CubeProperties {
    /// Radius after discretization (orthogonal path only; the general path
    /// keeps the requested radius).
    pub disr_radius: f64,
    /// Sub-cell offset of the center: Cartesian lengths on the orthogonal
    /// path, fractional coordinates on the general path.
    pub roffset: [f64; 3],
    /// Integer grid index of the center (floor of the fractional
    /// coordinate), storage order.
    pub cube_center: [i32; 3],
    /// Inclusive lower cube bound relative to the center.
    pub lb_cube: [i32; 3],
    /// Inclusive upper cube bound relative to the center.
    pub ub_cube: [i32; 3],
    /// `ub - lb + 1` per axis.
    pub cube_size: [i32; 3],
    /// Maximum cube edge, for sizing scratch buffers.
    pub cmax: i32,
}

/// Compute the index box a function of extent `radius` centered at `rp`
/// (Cartesian) touches.
///
/// The orthogonal path discretizes the radius up to the next multiple of
/// the finest axis spacing and uses a symmetric interval per axis. The
/// general (triclinic) path has no closed form: it projects the 27
/// axis-extremal points `{-radius, 0, radius}^3` through `dh_inv` and takes
/// component-wise bounds — a conservative over-approximation that covers
/// the sphere completely, possibly with extra points, never with fewer.
#[must_use]
pub fn compute_cube_properties(
    orthorhombic: bool,
    radius: f64,
    dh: &[[f64; 3]; 3],
    dh_inv: &[[f64; 3]; 3],
    rp: &[f64; 3],
) -> CubeProperties {
    let mut cube_center = [0i32; 3];
    let mut rp_frac = [0.0; 3];

    // center in lattice coordinates, stored slowest-axis-first
    for i in 0..3 {
        let mut frac = 0.0;
        for j in 0..3 {
            frac += dh_inv[j][i] * rp[j];
        }
        rp_frac[2 - i] = frac;
        cube_center[2 - i] = frac.floor() as i32;
    }

    let mut roffset = [0.0; 3];
    let mut lb_cube = [0i32; 3];
    let mut ub_cube = [0i32; 3];
    let disr_radius;

    if orthorhombic {
        let dx = [dh[2][2], dh[1][1], dh[0][0]];
        let dx_inv = [dh_inv[2][2], dh_inv[1][1], dh_inv[0][0]];

        // the radius gets discretized in units of the finest spacing
        let drmin = dh[0][0].min(dh[1][1]).min(dh[2][2]);
        disr_radius = drmin * (radius / drmin).ceil().max(1.0);

        for i in 0..3 {
            roffset[i] = rp[2 - i] - f64::from(cube_center[i]) * dx[i];
        }
        for i in 0..3 {
            lb_cube[i] = (-CUBE_BOUND_EPS - disr_radius * dx_inv[i]).ceil() as i32;
            // symmetric interval
            ub_cube[i] = 1 - lb_cube[i];
        }
    } else {
        lb_cube = [i32::MAX; 3];
        ub_cube = [i32::MIN; 3];

        // project the axis-extremal points of the bounding box; trivially
        // covers the sphere at the cost of possible extra points
        for i in -1..=1 {
            for j in -1..=1 {
                for k in -1..=1 {
                    let x = [
                        f64::from(i) * radius,
                        f64::from(j) * radius,
                        f64::from(k) * radius,
                    ];
                    for idir in 0..3 {
                        let resc =
                            dh_inv[0][idir] * x[0] + dh_inv[1][idir] * x[1] + dh_inv[2][idir] * x[2];
                        lb_cube[2 - idir] = lb_cube[2 - idir].min(resc.floor() as i32);
                        ub_cube[2 - idir] = ub_cube[2 - idir].max(resc.ceil() as i32);
                    }
                }
            }
        }
        for i in 0..3 {
            roffset[i] = rp_frac[i] - f64::from(cube_center[i]);
        }
        disr_radius = radius;
    }

    let mut cube_size = [0i32; 3];
    let mut cmax = 0;
    for i in 0..3 {
        // inclusive bounds, hence the +1
        cube_size[i] = ub_cube[i] - lb_cube[i] + 1;
        cmax = cmax.max(cube_size[i]);
    }

    CubeProperties {
        disr_radius,
        roffset,
        cube_center,
        lb_cube,
        ub_cube,
        cube_size,
        cmax,
    }
}

/// Wrap the cube's lower corner into the periodic global grid.
///
/// # Errors
///
/// `Precondition` when the wrapped position lies outside the local grid
/// extent — a task-list construction bug upstream, not recoverable here.
pub fn return_cube_position(
    grid_size: &[i32; 3],
    lb_grid: &[i32; 3],
    cube_center: &[i32; 3],
    lb_cube: &[i32; 3],
    period: &[i32; 3],
) -> Result<[i32; 3], GridError> {
    let mut position = [0i32; 3];
    for i in 0..3 {
        position[i] = modulo(lb_grid[i] + cube_center[i] + lb_cube[i], period[i]);
    }
    for i in 0..3 {
        if position[i] >= grid_size[i] {
            return Err(GridError::Precondition(format!(
                "the lower corner of the cube is outside the grid: \
                 position[{i}] = {} >= grid size {} \
                 (lb_grid {}, cube_center {}, lb_cube {}, period {})",
                position[i], grid_size[i], lb_grid[i], cube_center[i], lb_cube[i], period[i]
            )));
        }
    }
    Ok(position)
}

/// Per-pair orthogonality of the cell vectors: `[x-z, y-z, x-y]`, each true
/// when the normalized dot product stays below [`ORTHO_COS_TOL`].
#[must_use]
pub fn verify_orthogonality(dh: &[[f64; 3]; 3]) -> [bool; 3] {
    let norm = |v: &[f64; 3]| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    let dot = |a: &[f64; 3], b: &[f64; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    let n = [1.0 / norm(&dh[0]), 1.0 / norm(&dh[1]), 1.0 / norm(&dh[2])];
    [
        dot(&dh[0], &dh[2]).abs() * n[0] * n[2] < ORTHO_COS_TOL,
        dot(&dh[1], &dh[2]).abs() * n[1] * n[2] < ORTHO_COS_TOL,
        dot(&dh[0], &dh[1]).abs() * n[0] * n[1] < ORTHO_COS_TOL,
    ]
}
