// SPDX-License-Identifier: AGPL-3.0-only

//! Cartesian angular-momentum indexing and the basis-set data contract.
//!
//! A primitive Gaussian of angular momentum `l` spans the Cartesian
//! components `(lx, ly, lz)` with `lx + ly + lz = l`, ordered with `lx`
//! descending and, within equal `lx`, `lz` ascending. [`coset`] maps a
//! component triple to its flat index; [`ncoset`] counts all components up
//! to and including shell `l`.
//!
//! [`BasisSet`] is the read-only contract through which atom-kind metadata
//! enters the engine. Loading and construction of basis sets is the host's
//! job; the engine only reads shell ranges and primitive exponents.

use serde::Deserialize;

use crate::error::GridError;

/// Factorials 0! ..= 30! (exact in f64 up to 22!, nearest double beyond).
pub const FAC: [f64; 31] = [
    1.0,
    1.0,
    2.0,
    6.0,
    24.0,
    120.0,
    720.0,
    5040.0,
    40320.0,
    362880.0,
    3628800.0,
    39916800.0,
    479001600.0,
    6227020800.0,
    87178291200.0,
    1307674368000.0,
    20922789888000.0,
    355687428096000.0,
    6402373705728000.0,
    121645100408832000.0,
    2432902008176640000.0,
    5.109094217170944e19,
    1.1240007277776077e21,
    2.585201673888498e22,
    6.204484017332394e23,
    1.5511210043330986e25,
    4.0329146112660565e26,
    1.0888869450418352e28,
    3.0488834461171387e29,
    8.841761993739702e30,
    2.6525285981219105e32,
];

/// Number of Cartesian orbital components up to and including shell `l`.
#[must_use]
pub const fn ncoset(l: i32) -> usize {
    (((l + 1) * (l + 2) * (l + 3)) / 6) as usize
}

/// Flat index of the Cartesian component `(lx, ly, lz)`.
///
/// Components of shell `l = lx + ly + lz` follow all lower shells and are
/// ordered with `lx` descending, then `lz` ascending.
#[must_use]
pub const fn coset(lx: i32, ly: i32, lz: i32) -> usize {
    let l = lx + ly + lz;
    if l == 0 {
        0
    } else {
        ncoset(l - 1) + (((l - lx) * (l - lx + 1)) / 2 + lz) as usize
    }
}

/// Read-only basis-set metadata for one atom kind.
///
/// Per set: the shell range `[lmin, lmax]`, the number of primitives, and
/// the primitive exponents `zet[set][pgf]`. Hosts may deserialize this from
/// JSON; everything beyond this surface (contraction coefficients,
/// spherical transforms) stays with the host.
#[derive(Debug, Clone, Deserialize)]
pub struct BasisSet {
    /// Lowest angular momentum per set.
    pub lmin: Vec<i32>,
    /// Highest angular momentum per set.
    pub lmax: Vec<i32>,
    /// Number of primitive Gaussians per set.
    pub npgf: Vec<i32>,
    /// Primitive exponents, `zet[set][pgf]`.
    pub zet: Vec<Vec<f64>>,
}

impl BasisSet {
    /// Number of sets.
    #[must_use]
    pub fn nset(&self) -> usize {
        self.lmax.len()
    }

    /// Check internal consistency of the contract.
    ///
    /// # Errors
    ///
    /// `Precondition` when per-set arrays disagree in length, a shell range
    /// is inverted or negative, or an exponent row does not match `npgf`.
    pub fn check(&self) -> Result<(), GridError> {
        let nset = self.nset();
        if self.lmin.len() != nset || self.npgf.len() != nset || self.zet.len() != nset {
            return Err(GridError::Precondition(format!(
                "basis set arrays disagree: lmin {}, lmax {}, npgf {}, zet {}",
                self.lmin.len(),
                nset,
                self.npgf.len(),
                self.zet.len()
            )));
        }
        for iset in 0..nset {
            if self.lmin[iset] < 0 || self.lmax[iset] < self.lmin[iset] {
                return Err(GridError::Precondition(format!(
                    "basis set {iset}: invalid shell range [{}, {}]",
                    self.lmin[iset], self.lmax[iset]
                )));
            }
            if self.zet[iset].len() != self.npgf[iset] as usize {
                return Err(GridError::Precondition(format!(
                    "basis set {iset}: {} exponents for npgf = {}",
                    self.zet[iset].len(),
                    self.npgf[iset]
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ncoset_matches_shell_counts() {
        // 1, 4, 10, 20, 35 for l = 0..4
        assert_eq!(ncoset(0), 1);
        assert_eq!(ncoset(1), 4);
        assert_eq!(ncoset(2), 10);
        assert_eq!(ncoset(3), 20);
        assert_eq!(ncoset(4), 35);
    }

    #[test]
    fn coset_shell_ordering() {
        assert_eq!(coset(0, 0, 0), 0);
        // p shell: x, y, z
        assert_eq!(coset(1, 0, 0), 1);
        assert_eq!(coset(0, 1, 0), 2);
        assert_eq!(coset(0, 0, 1), 3);
        // d shell: xx, xy, xz, yy, yz, zz
        assert_eq!(coset(2, 0, 0), 4);
        assert_eq!(coset(1, 1, 0), 5);
        assert_eq!(coset(1, 0, 1), 6);
        assert_eq!(coset(0, 2, 0), 7);
        assert_eq!(coset(0, 1, 1), 8);
        assert_eq!(coset(0, 0, 2), 9);
    }

    #[test]
    fn coset_is_a_bijection_per_shell() {
        for l in 0..=6 {
            let mut seen = vec![false; ncoset(l)];
            for lx in (0..=l).rev() {
                for ly in (0..=l - lx).rev() {
                    for lz in 0..=l - lx - ly {
                        if lx + ly + lz == l {
                            let idx = coset(lx, ly, lz);
                            assert!(idx < ncoset(l));
                            assert!(idx >= if l == 0 { 0 } else { ncoset(l - 1) });
                            assert!(!seen[idx], "duplicate index for ({lx},{ly},{lz})");
                            seen[idx] = true;
                        }
                    }
                }
            }
            let filled = seen.iter().skip(if l == 0 { 0 } else { ncoset(l - 1) });
            assert!(filled.clone().all(|&s| s), "shell {l} not fully covered");
        }
    }

    #[test]
    #[allow(clippy::float_cmp)] // exact small factorials
    fn factorial_table() {
        assert_eq!(FAC[0], 1.0);
        assert_eq!(FAC[5], 120.0);
        assert_eq!(FAC[10], 3628800.0);
        for i in 1..FAC.len() {
            let ratio = FAC[i] / FAC[i - 1];
            assert!(
                (ratio - i as f64).abs() / (i as f64) < 1e-14,
                "FAC[{i}]/FAC[{}] should be {i}",
                i - 1
            );
        }
    }

    fn sample_basis() -> BasisSet {
        BasisSet {
            lmin: vec![0, 1],
            lmax: vec![1, 2],
            npgf: vec![2, 1],
            zet: vec![vec![0.5, 1.5], vec![0.8]],
        }
    }

    #[test]
    fn basis_check_accepts_consistent() {
        assert!(sample_basis().check().is_ok());
    }

    #[test]
    fn basis_check_rejects_inverted_range() {
        let mut b = sample_basis();
        b.lmin[1] = 3;
        assert!(matches!(b.check(), Err(GridError::Precondition(_))));
    }

    #[test]
    fn basis_check_rejects_exponent_mismatch() {
        let mut b = sample_basis();
        b.zet[0].pop();
        assert!(matches!(b.check(), Err(GridError::Precondition(_))));
    }

    #[test]
    fn basis_deserializes_from_json() {
        let json = r#"{
            "lmin": [0],
            "lmax": [1],
            "npgf": [2],
            "zet": [[0.5, 2.0]]
        }"#;
        let b: BasisSet = serde_json::from_str(json).expect("valid basis JSON");
        assert_eq!(b.nset(), 1);
        assert!(b.check().is_ok());
    }
}
