//! Dense linear algebra backend shared by the Newton solver and the implicit-function-theorem
//! Jacobian recovery.
//!
//! Both call sites need to solve `A x = b` for a square `A`; the Newton step solves
//! `∂r/∂y · Δy = −r` and the IFT recovery solves `∂r/∂y · ∂y/∂x = −∂r/∂x`. This module
//! wraps `faer`'s dense partial-pivoting LU, grounded on the teacher crate's `faer.rs`, and
//! additionally exposes the factorization itself so a caller that needs several right-hand
//! sides against the same matrix (as [`crate::solver::NewtonSolver`] does for a Newton step
//! followed by the IFT recovery at the same converged `∂r/∂y`) can factorize once and reuse it.

use faer::linalg::solvers::{PartialPivLu, Solve};
use faer::{Mat, MatRef};

use crate::error::Error;

/// An LU factorization of a square matrix, reusable across multiple right-hand sides.
pub struct Factorization {
    lu: PartialPivLu<f64>,
    n: usize,
}

/// Factorize a square matrix for repeated solves.
pub fn factorize(a: MatRef<'_, f64>) -> Result<Factorization, Error> {
    debug_assert_eq!(a.nrows(), a.ncols(), "Newton/IFT systems are always square");
    Ok(Factorization {
        lu: a.partial_piv_lu(),
        n: a.nrows(),
    })
}

impl Factorization {
    /// Solve `A x = b` for every column of `b` using this factorization.
    ///
    /// Fails with [`Error::SingularJacobian`] if the solution contains non-finite entries,
    /// which is how `faer`'s dense LU surfaces a (near-)singular matrix: it does not return
    /// a `Result` itself, only NaN/Inf once back-substitution divides by a vanished pivot.
    pub fn solve(&self, b: MatRef<'_, f64>) -> Result<Mat<f64>, Error> {
        debug_assert_eq!(b.nrows(), self.n);
        let x = self.lu.solve(b);
        if x.col_iter().any(|col| col.iter().any(|v| !v.is_finite())) {
            return Err(Error::SingularJacobian);
        }
        Ok(x)
    }
}

/// Factorize `a` and immediately solve `a x = b`. Prefer [`factorize`] + [`Factorization::solve`]
/// when the same `a` will be reused, e.g. for the IFT Jacobian recovery after a Newton solve.
pub fn solve(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Result<Mat<f64>, Error> {
    factorize(a)?.solve(b)
}

/// Build a dense column-major [`Mat`] from a row-major flat buffer (the convention used by
/// every Jacobian in this crate: row `i` is `∂(output i)/∂(input *)`).
pub fn mat_from_row_major(data: &[f64], rows: usize, cols: usize) -> Mat<f64> {
    debug_assert_eq!(data.len(), rows * cols);
    Mat::from_fn(rows, cols, |r, c| data[r * cols + c])
}
