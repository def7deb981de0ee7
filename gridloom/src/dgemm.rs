// SPDX-License-Identifier: AGPL-3.0-only

//! Reference-grade dense matrix multiply.
//!
//! [`DgemmParams`] is the contract an accelerated backend would hand to a
//! vendor kernel: row-major operands with explicit leading dimensions,
//! transpose flags, and scale factors. The executor here is a plain
//! cache-friendly triple loop; it is what the CPU backend's separable cube
//! evaluation runs on.

use crate::error::GridError;

/// One row-major `C = alpha * op(A) * op(B) + beta * C` descriptor.
///
/// `op(A)` is `m x k`, `op(B)` is `k x n`, `C` is `m x n`. Leading
/// dimensions refer to the stored (untransposed) operands.
#[derive(Debug, Clone, Copy)]
pub struct DgemmParams {
    /// Transpose A before multiplying.
    pub transa: bool,
    /// Transpose B before multiplying.
    pub transb: bool,
    /// Rows of `op(A)` and `C`.
    pub m: usize,
    /// Columns of `op(B)` and `C`.
    pub n: usize,
    /// Inner dimension.
    pub k: usize,
    /// Scale on the product.
    pub alpha: f64,
    /// Scale on the existing `C`.
    pub beta: f64,
    /// Leading dimension of stored A.
    pub lda: usize,
    /// Leading dimension of stored B.
    pub ldb: usize,
    /// Leading dimension of C.
    pub ldc: usize,
}

impl DgemmParams {
    fn check(&self, a: &[f64], b: &[f64], c: &[f64]) -> Result<(), GridError> {
        let (a_rows, a_cols) = if self.transa {
            (self.k, self.m)
        } else {
            (self.m, self.k)
        };
        let (b_rows, b_cols) = if self.transb {
            (self.n, self.k)
        } else {
            (self.k, self.n)
        };
        if self.lda < a_cols || self.ldb < b_cols || self.ldc < self.n {
            return Err(GridError::Precondition(format!(
                "dgemm leading dimensions too small: lda {} (need {a_cols}), \
                 ldb {} (need {b_cols}), ldc {} (need {})",
                self.lda, self.ldb, self.ldc, self.n
            )));
        }
        let need_a = if a_rows == 0 {
            0
        } else {
            (a_rows - 1) * self.lda + a_cols
        };
        let need_b = if b_rows == 0 {
            0
        } else {
            (b_rows - 1) * self.ldb + b_cols
        };
        let need_c = if self.m == 0 {
            0
        } else {
            (self.m - 1) * self.ldc + self.n
        };
        if a.len() < need_a || b.len() < need_b || c.len() < need_c {
            return Err(GridError::Precondition(format!(
                "dgemm operands too short: a {} (need {need_a}), b {} (need {need_b}), \
                 c {} (need {need_c})",
                a.len(),
                b.len(),
                c.len()
            )));
        }
        Ok(())
    }

    #[inline]
    fn a_elem(&self, a: &[f64], i: usize, p: usize) -> f64 {
        if self.transa {
            a[p * self.lda + i]
        } else {
            a[i * self.lda + p]
        }
    }
}

/// Execute the multiply described by `p` into `c`.
///
/// # Errors
///
/// `Precondition` when leading dimensions or operand lengths are
/// inconsistent with the declared shape.
pub fn dgemm(p: &DgemmParams, a: &[f64], b: &[f64], c: &mut [f64]) -> Result<(), GridError> {
    p.check(a, b, c)?;

    for i in 0..p.m {
        let c_row = &mut c[i * p.ldc..i * p.ldc + p.n];
        if p.beta == 0.0 {
            c_row.iter_mut().for_each(|v| *v = 0.0);
        } else if p.beta != 1.0 {
            c_row.iter_mut().for_each(|v| *v *= p.beta);
        }
        for q in 0..p.k {
            let aiq = p.alpha * p.a_elem(a, i, q);
            if aiq == 0.0 {
                continue;
            }
            if p.transb {
                for (j, cv) in c_row.iter_mut().enumerate() {
                    *cv += aiq * b[j * p.ldb + q];
                }
            } else {
                let b_row = &b[q * p.ldb..q * p.ldb + p.n];
                for (cv, &bv) in c_row.iter_mut().zip(b_row) {
                    *cv += aiq * bv;
                }
            }
        }
    }
    Ok(())
}
