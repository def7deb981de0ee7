// SPDX-License-Identifier: AGPL-3.0-only

//! Change of basis for pair-potential expansions.
//!
//! A product of two Gaussians centered at `ra` and `rb` is a single Gaussian
//! centered at `rp` times a polynomial. This module converts between the
//! three polynomial representations the engine needs:
//!
//!   - per-axis binomial tables ([`Alpha`]) expanding
//!     `(x-a)^la (x-b)^lb` over powers of `(x-p)`,
//!   - the contracted 3-D expansion centered at `rp` ([`prepare_coef`]),
//!     stored as a dense `(lp+1)^3` cube indexed `[lz][ly][lx]`,
//!   - packed triangular storage of the valid (index-sum <= lp) region,
//!   - the grid (lattice) frame reached by multinomial re-expansion under
//!     the cell matrix ([`rotate_to_lattice_frame`] /
//!     [`rotate_to_cartesian_frame`]).
//!
//! [`prepare_pab`] maps the host's pair-density block to the effective
//! Cartesian block of the requested quantity (density or kinetic-energy
//! density) before contraction.

use crate::basis::{coset, ncoset, FAC};
use crate::error::GridError;
use crate::tensor::{alloc_f64, GridArray};

/// Per-axis expansion coefficients of `(x-a)^la (x-b)^lb` over `(x-p)^ls`,
/// indexed `[axis][lb][la][ls]` with `ls <= la + lb`.
#[derive(Debug, Clone)]
pub struct Alpha {
    data: Vec<f64>,
    la_max: i32,
    lb_max: i32,
    ls_max: i32,
}

impl Alpha {
    /// Coefficient lookup.
    #[inline]
    #[must_use]
    pub fn at(&self, axis: usize, lb: i32, la: i32, ls: i32) -> f64 {
        self.data[self.offset(axis, lb, la, ls)]
    }

    #[inline]
    fn offset(&self, axis: usize, lb: i32, la: i32, ls: i32) -> usize {
        debug_assert!(axis < 3 && lb <= self.lb_max && la <= self.la_max && ls <= self.ls_max);
        ((axis * (self.lb_max as usize + 1) + lb as usize) * (self.la_max as usize + 1)
            + la as usize)
            * (self.ls_max as usize + 1)
            + ls as usize
    }
}

/// Build the per-axis binomial tables for a pair centered at `rp`.
///
/// Uses iteratively updated binomial coefficients (no factorial division).
/// The table is zero-initialized and only ever accumulated into: several
/// `(k, l)` splits contribute to the same `(x-p)` exponent.
///
/// # Errors
///
/// `Precondition` for negative maximum angular momenta; `Allocation` on
/// buffer reserve failure.
pub fn prepare_alpha(
    ra: &[f64; 3],
    rb: &[f64; 3],
    rp: &[f64; 3],
    la_max: i32,
    lb_max: i32,
) -> Result<Alpha, GridError> {
    if la_max < 0 || lb_max < 0 {
        return Err(GridError::Precondition(format!(
            "negative angular momenta: la_max {la_max}, lb_max {lb_max}"
        )));
    }
    let ls_max = la_max + lb_max;
    let len = 3 * (lb_max as usize + 1) * (la_max as usize + 1) * (ls_max as usize + 1);
    let mut alpha = Alpha {
        data: alloc_f64(len, "alpha table")?,
        la_max,
        lb_max,
        ls_max,
    };

    for axis in 0..3 {
        let drpa = rp[axis] - ra[axis];
        let drpb = rp[axis] - rb[axis];
        for lxa in 0..=la_max {
            for lxb in 0..=lb_max {
                let mut bin_k = 1.0;
                let mut a_pow = 1.0;
                for k in 0..=lxa {
                    let mut bin_l = 1.0;
                    let mut b_pow = 1.0;
                    for l in 0..=lxb {
                        let off = alpha.offset(axis, lxb, lxa, lxa - k + lxb - l);
                        alpha.data[off] += bin_k * bin_l * a_pow * b_pow;
                        bin_l *= f64::from(lxb - l) / f64::from(l + 1);
                        b_pow *= drpb;
                    }
                    bin_k *= f64::from(lxa - k) / f64::from(k + 1);
                    a_pow *= drpa;
                }
            }
        }
    }
    Ok(alpha)
}

/// Contract a Cartesian pair block against the alpha tables into the single
/// 3-D expansion centered at the grid point, scaled by `prefactor`.
///
/// The contraction runs axis by axis — x into an `O(lp)` scratch, then y
/// into an `O(lp^2)` scratch, then z into the output — to keep intermediate
/// storage small; the ordering is part of the contract even though the
/// result is order-independent.
///
/// `cab` is indexed `[jco][ico]` with row stride `cab_ld`.
///
/// # Errors
///
/// `Precondition` for inconsistent degree bounds, `Allocation` on scratch
/// reserve failure.
pub fn prepare_coef(
    lmin: [i32; 2],
    lmax: [i32; 2],
    lp: i32,
    prefactor: f64,
    alpha: &Alpha,
    cab: &[f64],
    cab_ld: usize,
) -> Result<GridArray, GridError> {
    if lmax[0] < 0 || lmax[1] < 0 || lp < lmax[0] + lmax[1] {
        return Err(GridError::Precondition(format!(
            "degree bounds inconsistent: lmax {lmax:?}, lp {lp}"
        )));
    }
    let n = (lp + 1) as usize;
    let mut coef = GridArray::cube(n)?;
    let mut coef_xyt = alloc_f64(n * n, "coef y scratch")?;
    let mut coef_xtt = alloc_f64(n, "coef x scratch")?;

    for lzb in 0..=lmax[1] {
        for lza in 0..=lmax[0] {
            coef_xyt.iter_mut().for_each(|v| *v = 0.0);
            for lyb in 0..=lmax[1] - lzb {
                for lya in 0..=lmax[0] - lza {
                    let lxpm = (lmax[1] - lzb - lyb) + (lmax[0] - lza - lya);
                    for v in coef_xtt.iter_mut().take(lxpm as usize + 1) {
                        *v = 0.0;
                    }
                    for lxb in (lmin[1] - lzb - lyb).max(0)..=lmax[1] - lzb - lyb {
                        for lxa in (lmin[0] - lza - lya).max(0)..=lmax[0] - lza - lya {
                            let ico = coset(lxa, lya, lza);
                            let jco = coset(lxb, lyb, lzb);
                            let p_ele = prefactor * cab[jco * cab_ld + ico];
                            for lxp in 0..=lxa + lxb {
                                coef_xtt[lxp as usize] += p_ele * alpha.at(0, lxb, lxa, lxp);
                            }
                        }
                    }
                    for lyp in 0..=lya + lyb {
                        let pe = alpha.at(1, lyb, lya, lyp);
                        let row = &mut coef_xyt[lyp as usize * n..];
                        for lxp in 0..=(lp - lza - lzb - lya - lyb) as usize {
                            row[lxp] += pe * coef_xtt[lxp];
                        }
                    }
                }
            }
            for lzp in 0..=lza + lzb {
                for lyp in 0..=lp - lza - lzb {
                    let pe = alpha.at(2, lzb, lza, lzp);
                    let src = &coef_xyt[lyp as usize * n..];
                    let dst = coef.row_mut(lzp as usize, lyp as usize);
                    for lxp in 0..=(lp - lza - lzb - lyp) as usize {
                        dst[lxp] += pe * src[lxp];
                    }
                }
            }
        }
    }
    Ok(coef)
}

/// Packed length of a triangular coefficient vector of degree `lp`.
#[must_use]
pub fn triangular_len(lp: i32) -> usize {
    ncoset(lp)
}

/// Pack the valid region of a coefficient cube into triangular storage,
/// outer-to-inner loop over `(z, y, x)`.
///
/// # Errors
///
/// `Precondition` when `out` is shorter than the packed length.
pub fn cube_to_triangular(coef: &GridArray, out: &mut [f64]) -> Result<(), GridError> {
    let lp = coef.size()[0] as i32 - 1;
    check_triangular_len(lp, out.len())?;
    let mut idx = 0;
    for lz in 0..=lp {
        for ly in 0..=lp - lz {
            for lx in 0..=lp - lz - ly {
                out[idx] = coef.at(lz as usize, ly as usize, lx as usize);
                idx += 1;
            }
        }
    }
    Ok(())
}

/// Pack with the permuted `(y, x, z)` axis reading, used where a following
/// frame rotation has reordered the cube's axes.
///
/// # Errors
///
/// `Precondition` when `out` is shorter than the packed length.
pub fn cube_to_triangular_permuted(coef: &GridArray, out: &mut [f64]) -> Result<(), GridError> {
    let lp = coef.size()[0] as i32 - 1;
    check_triangular_len(lp, out.len())?;
    let mut idx = 0;
    for lz in 0..=lp {
        for ly in 0..=lp - lz {
            for lx in 0..=lp - lz - ly {
                out[idx] = coef.at(ly as usize, lx as usize, lz as usize);
                idx += 1;
            }
        }
    }
    Ok(())
}

/// Exact inverse of [`cube_to_triangular`]; entries with index-sum > `lp`
/// are zero-filled.
///
/// # Errors
///
/// `Precondition` when `tri` is shorter than the packed length.
pub fn triangular_to_cube(tri: &[f64], coef: &mut GridArray) -> Result<(), GridError> {
    let lp = coef.size()[0] as i32 - 1;
    check_triangular_len(lp, tri.len())?;
    coef.zero();
    let mut idx = 0;
    for lz in 0..=lp {
        for ly in 0..=lp - lz {
            for lx in 0..=lp - lz - ly {
                coef.set(lz as usize, ly as usize, lx as usize, tri[idx]);
                idx += 1;
            }
        }
    }
    Ok(())
}

fn check_triangular_len(lp: i32, have: usize) -> Result<(), GridError> {
    let need = triangular_len(lp);
    if have < need {
        return Err(GridError::Precondition(format!(
            "triangular buffer too short: {have} < {need} for lp {lp}"
        )));
    }
    Ok(())
}

/// Re-expand a coefficient cube under the linear change of variables
/// `s_c = sum_d mat[d][c] * t_d` (source variable `c` in terms of target
/// variables `t`). Shared core of both rotation directions.
fn rotate_expansion(mat: &[[f64; 3]; 3], src: &GridArray) -> Result<GridArray, GridError> {
    let lp = src.size()[0] as i32 - 1;
    let n = (lp + 1) as usize;

    // pow[k][row][col] = mat[row][col]^k
    let mut pow = alloc_f64(n * 9, "rotation power table")?;
    for r in 0..3 {
        for c in 0..3 {
            pow[r * 3 + c] = 1.0;
            for k in 1..n {
                pow[k * 9 + r * 3 + c] = pow[(k - 1) * 9 + r * 3 + c] * mat[r][c];
            }
        }
    }
    let p = |k: i32, r: usize, c: usize| pow[k as usize * 9 + r * 3 + c];
    let multinom = |l: i32, k0: i32, k1: i32, k2: i32| {
        FAC[l as usize] / (FAC[k0 as usize] * FAC[k1 as usize] * FAC[k2 as usize])
    };

    let mut dst = GridArray::cube(n)?;
    for k2x in 0..=lp {
        for k1x in 0..=lp - k2x {
            for k0x in 0..=lp - k2x - k1x {
                let lx = k0x + k1x + k2x;
                let tx = p(k0x, 0, 0) * p(k1x, 1, 0) * p(k2x, 2, 0) * multinom(lx, k0x, k1x, k2x);
                let lpy = lp - lx;
                for k2y in 0..=lpy {
                    for k1y in 0..=lpy - k2y {
                        for k0y in 0..=lpy - k2y - k1y {
                            let ly = k0y + k1y + k2y;
                            let ty = tx
                                * p(k0y, 0, 1)
                                * p(k1y, 1, 1)
                                * p(k2y, 2, 1)
                                * multinom(ly, k0y, k1y, k2y);
                            let lpz = lp - lx - ly;
                            for k2z in 0..=lpz {
                                for k1z in 0..=lpz - k2z {
                                    for k0z in 0..=lpz - k2z - k1z {
                                        let lz = k0z + k1z + k2z;
                                        let tz = ty
                                            * p(k0z, 0, 2)
                                            * p(k1z, 1, 2)
                                            * p(k2z, 2, 2)
                                            * multinom(lz, k0z, k1z, k2z);
                                        let l0 = (k0x + k0y + k0z) as usize;
                                        let l1 = (k1x + k1y + k1z) as usize;
                                        let l2 = (k2x + k2y + k2z) as usize;
                                        let s =
                                            src.at(lz as usize, ly as usize, lx as usize);
                                        dst.add(l2, l1, l0, s * tz);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(dst)
}

/// Rotate a Cartesian-frame expansion (`[lz][ly][lx]`) into the grid's
/// lattice frame (`[l2][l1][l0]`, exponents of the lattice directions in
/// storage order). `dh[d]` is lattice vector `d` in Cartesian components.
///
/// # Errors
///
/// `Allocation` on scratch reserve failure.
pub fn rotate_to_lattice_frame(
    dh: &[[f64; 3]; 3],
    coef: &GridArray,
) -> Result<GridArray, GridError> {
    rotate_expansion(dh, coef)
}

/// Exact inverse of [`rotate_to_lattice_frame`]: expand a lattice-frame
/// tensor back over Cartesian exponents using the inverse cell matrix.
/// With an identity cell both directions reproduce their input exactly.
///
/// # Errors
///
/// `Allocation` on scratch reserve failure.
pub fn rotate_to_cartesian_frame(
    dh_inv: &[[f64; 3]; 3],
    coef: &GridArray,
) -> Result<GridArray, GridError> {
    rotate_expansion(dh_inv, coef)
}

/// Which quantity a collocation/integration pass works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridFunc {
    /// The pair density itself: the host block is used as given.
    Density,
    /// Kinetic-energy density `0.5 * grad(ga) . grad(gb)`; angular momenta
    /// are extended by one on both sides.
    Tau,
}

/// Effective Cartesian pair block after mapping the host block to the
/// requested quantity.
#[derive(Debug, Clone)]
pub struct PreparedPab {
    /// Effective block, `[jco][ico]` with row stride `cab_ld`.
    pub cab: Vec<f64>,
    /// Row stride (`ncoset(la_max)` of the effective a-side).
    pub cab_ld: usize,
    /// Effective a-side shell range.
    pub la_min: i32,
    /// Effective a-side maximum shell.
    pub la_max: i32,
    /// Effective b-side shell range.
    pub lb_min: i32,
    /// Effective b-side maximum shell.
    pub lb_max: i32,
}

pub(crate) fn for_each_component(lmin: i32, lmax: i32, mut f: impl FnMut(i32, i32, i32)) {
    for l in lmin..=lmax {
        for lx in (0..=l).rev() {
            for ly in (0..=l - lx).rev() {
                f(lx, ly, l - lx - ly);
            }
        }
    }
}

/// Map a host pair-density block to the effective Cartesian block of the
/// requested quantity. `pab` is `[jco][ico]` with row stride `pab_ld`.
///
/// # Errors
///
/// `Precondition` for invalid shell ranges, `Allocation` on reserve failure.
#[allow(clippy::too_many_arguments)]
pub fn prepare_pab(
    func: GridFunc,
    pab: &[f64],
    pab_ld: usize,
    la_min: i32,
    la_max: i32,
    lb_min: i32,
    lb_max: i32,
    zeta: f64,
    zetb: f64,
) -> Result<PreparedPab, GridError> {
    if la_min < 0 || lb_min < 0 || la_max < la_min || lb_max < lb_min {
        return Err(GridError::Precondition(format!(
            "invalid shell ranges: a [{la_min}, {la_max}], b [{lb_min}, {lb_max}]"
        )));
    }
    match func {
        GridFunc::Density => {
            let cab_ld = ncoset(la_max);
            let rows = ncoset(lb_max);
            let mut cab = alloc_f64(rows * cab_ld, "prepared pab block")?;
            for jco in 0..rows {
                let src = &pab[jco * pab_ld..jco * pab_ld + cab_ld];
                cab[jco * cab_ld..(jco + 1) * cab_ld].copy_from_slice(src);
            }
            Ok(PreparedPab {
                cab,
                cab_ld,
                la_min,
                la_max,
                lb_min,
                lb_max,
            })
        }
        GridFunc::Tau => {
            let la_max_eff = la_max + 1;
            let lb_max_eff = lb_max + 1;
            let cab_ld = ncoset(la_max_eff);
            let rows = ncoset(lb_max_eff);
            let mut cab = alloc_f64(rows * cab_ld, "prepared pab block")?;

            for_each_component(lb_min, lb_max, |bx, by, bz| {
                let b = [bx, by, bz];
                for_each_component(la_min, la_max, |ax, ay, az| {
                    let a = [ax, ay, az];
                    let p = pab[coset(bx, by, bz) * pab_ld + coset(ax, ay, az)];
                    for axis in 0..3 {
                        let la_ax = a[axis];
                        let lb_ax = b[axis];
                        let am = shift(a, axis, -1);
                        let ap = shift(a, axis, 1);
                        let bm = shift(b, axis, -1);
                        let bp = shift(b, axis, 1);
                        if la_ax >= 1 && lb_ax >= 1 {
                            cab[cidx(bm, am, cab_ld)] +=
                                0.5 * f64::from(la_ax) * f64::from(lb_ax) * p;
                        }
                        if la_ax >= 1 {
                            cab[cidx(bp, am, cab_ld)] += -zetb * f64::from(la_ax) * p;
                        }
                        if lb_ax >= 1 {
                            cab[cidx(bm, ap, cab_ld)] += -zeta * f64::from(lb_ax) * p;
                        }
                        cab[cidx(bp, ap, cab_ld)] += 2.0 * zeta * zetb * p;
                    }
                });
            });
            Ok(PreparedPab {
                cab,
                cab_ld,
                la_min: (la_min - 1).max(0),
                la_max: la_max_eff,
                lb_min: (lb_min - 1).max(0),
                lb_max: lb_max_eff,
            })
        }
    }
}

#[inline]
fn shift(c: [i32; 3], axis: usize, by: i32) -> [i32; 3] {
    let mut out = c;
    out[axis] += by;
    out
}

#[inline]
fn cidx(b: [i32; 3], a: [i32; 3], ld: usize) -> usize {
    coset(b[0], b[1], b[2]) * ld + coset(a[0], a[1], a[2])
}

/// Adjoint of the `Tau` mapping for integration: fold extended-component
/// integrals `vab` back onto the host-shaped `hab` block.
#[allow(clippy::too_many_arguments)]
pub fn tau_hab_from_vab(
    vab: &[f64],
    vab_ld: usize,
    la_min: i32,
    la_max: i32,
    lb_min: i32,
    lb_max: i32,
    zeta: f64,
    zetb: f64,
    hab: &mut [f64],
    hab_ld: usize,
) {
    for_each_component(lb_min, lb_max, |bx, by, bz| {
        let b = [bx, by, bz];
        for_each_component(la_min, la_max, |ax, ay, az| {
            let a = [ax, ay, az];
            let mut acc = 0.0;
            for axis in 0..3 {
                let la_ax = a[axis];
                let lb_ax = b[axis];
                let am = shift(a, axis, -1);
                let ap = shift(a, axis, 1);
                let bm = shift(b, axis, -1);
                let bp = shift(b, axis, 1);
                if la_ax >= 1 && lb_ax >= 1 {
                    acc += 0.5 * f64::from(la_ax) * f64::from(lb_ax) * vab[cidx(bm, am, vab_ld)];
                }
                if la_ax >= 1 {
                    acc += -zetb * f64::from(la_ax) * vab[cidx(bp, am, vab_ld)];
                }
                if lb_ax >= 1 {
                    acc += -zeta * f64::from(lb_ax) * vab[cidx(bm, ap, vab_ld)];
                }
                acc += 2.0 * zeta * zetb * vab[cidx(bp, ap, vab_ld)];
            }
            hab[cidx(b, a, hab_ld)] += acc;
        });
    });
}
