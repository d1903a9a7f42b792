use faer::{prelude::*, solvers::PartialPivLu, Mat};
use thiserror::Error;

/// Pivots smaller than this are treated as zero by [`GaussSolver`].
const PIVOT_THRESHOLD: f64 = 1e-12;

/// Normwise backward error above which a faer solution is rejected.
const BACKWARD_ERROR_THRESHOLD: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinearSolveError {
    #[error("singular matrix")]
    Singular,

    #[error("matrix must be square (got {rows} rows, row {row} has {cols} columns)")]
    NotSquare { rows: usize, row: usize, cols: usize },

    #[error("rhs length ({rhs}) does not match matrix dimension {dim}")]
    DimensionMismatch { rhs: usize, dim: usize },
}

/// A factorized matrix that can be solved against many right-hand sides.
pub trait Factorization {
    fn dim(&self) -> usize;

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, LinearSolveError>;
}

/// Trait for solving dense linear systems (Ax = b).
pub trait LinearSystemBackend: Send + Sync + std::fmt::Debug {
    /// Factorize `matrix` once for repeated solves.
    fn factorize(&self, matrix: &[Vec<f64>]) -> Result<Box<dyn Factorization>, LinearSolveError>;

    /// Solve the linear system Ax = b
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>, LinearSolveError> {
        self.factorize(matrix)?.solve(rhs)
    }
}

fn check_square(matrix: &[Vec<f64>]) -> Result<usize, LinearSolveError> {
    let n = matrix.len();
    match matrix.iter().position(|row| row.len() != n) {
        Some(row) => Err(LinearSolveError::NotSquare {
            rows: n,
            row,
            cols: matrix[row].len(),
        }),
        None => Ok(n),
    }
}

fn check_rhs(dim: usize, rhs: &[f64]) -> Result<(), LinearSolveError> {
    if rhs.len() != dim {
        return Err(LinearSolveError::DimensionMismatch {
            rhs: rhs.len(),
            dim,
        });
    }
    Ok(())
}

/// Partial-pivoting LU written out by hand. Slower than faer but has an
/// explicit pivot threshold, which makes singularity detection exact.
#[derive(Debug, Clone, Default)]
pub struct GaussSolver;

struct GaussLu {
    lu: Vec<Vec<f64>>,
    perm: Vec<usize>,
}

impl LinearSystemBackend for GaussSolver {
    fn factorize(&self, matrix: &[Vec<f64>]) -> Result<Box<dyn Factorization>, LinearSolveError> {
        let n = check_square(matrix)?;
        let mut a = matrix.to_vec();
        let mut perm: Vec<usize> = (0..n).collect();

        for k in 0..n {
            let mut pivot = k;
            for row in k + 1..n {
                if a[row][k].abs() > a[pivot][k].abs() {
                    pivot = row;
                }
            }
            if !(a[pivot][k].abs() >= PIVOT_THRESHOLD) {
                return Err(LinearSolveError::Singular);
            }
            if pivot != k {
                a.swap(k, pivot);
                perm.swap(k, pivot);
            }

            let diag = a[k][k];
            let pivot_row = a[k][k + 1..].to_vec();
            for row in a.iter_mut().skip(k + 1) {
                let factor = row[k] / diag;
                row[k] = factor;
                if factor == 0.0 {
                    continue;
                }
                for (target, &p) in row[k + 1..].iter_mut().zip(pivot_row.iter()) {
                    *target -= factor * p;
                }
            }
        }

        Ok(Box::new(GaussLu { lu: a, perm }))
    }
}

impl Factorization for GaussLu {
    fn dim(&self) -> usize {
        self.lu.len()
    }

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, LinearSolveError> {
        let n = self.dim();
        check_rhs(n, rhs)?;

        // Forward substitution on the permuted rhs (unit lower triangle)
        let mut x: Vec<f64> = self.perm.iter().map(|&p| rhs[p]).collect();
        for i in 0..n {
            let sum: f64 = (0..i).map(|j| self.lu[i][j] * x[j]).sum();
            x[i] -= sum;
        }
        // Back substitution
        for i in (0..n).rev() {
            let sum: f64 = (i + 1..n).map(|j| self.lu[i][j] * x[j]).sum();
            x[i] = (x[i] - sum) / self.lu[i][i];
        }

        if x.iter().all(|v| v.is_finite()) {
            Ok(x)
        } else {
            Err(LinearSolveError::Singular)
        }
    }
}

/// Dense LU with partial pivoting from faer.
#[derive(Debug, Clone, Default)]
pub struct FaerSolver;

struct FaerLu {
    matrix: Mat<f64>,
    lu: PartialPivLu<f64>,
}

impl LinearSystemBackend for FaerSolver {
    fn factorize(&self, matrix: &[Vec<f64>]) -> Result<Box<dyn Factorization>, LinearSolveError> {
        let n = check_square(matrix)?;
        if matrix.iter().flatten().any(|v| !v.is_finite()) {
            return Err(LinearSolveError::Singular);
        }
        let mat = Mat::from_fn(n, n, |i, j| matrix[i][j]);
        let lu = PartialPivLu::new(mat.as_ref());
        Ok(Box::new(FaerLu { matrix: mat, lu }))
    }
}

impl Factorization for FaerLu {
    fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, LinearSolveError> {
        let n = self.dim();
        check_rhs(n, rhs)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let rhs_mat = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let sol = self.lu.solve(&rhs_mat);

        let mut solution = Vec::with_capacity(n);
        for i in 0..n {
            solution.push(sol.read(i, 0));
        }
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(LinearSolveError::Singular);
        }

        // faer has no pivot threshold, so a rank-deficient matrix can yield a
        // finite but meaningless answer. Reject it by its backward error.
        let mut residual = 0.0f64;
        let mut a_norm = 0.0f64;
        for i in 0..n {
            let mut row_sum = 0.0;
            let mut row_abs = 0.0;
            for j in 0..n {
                let a_ij = self.matrix.read(i, j);
                row_sum += a_ij * solution[j];
                row_abs += a_ij.abs();
            }
            residual = residual.max((row_sum - rhs[i]).abs());
            a_norm = a_norm.max(row_abs);
        }
        let x_norm = solution.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let b_norm = rhs.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let scale = a_norm * x_norm + b_norm;
        if scale > 0.0 && residual / scale > BACKWARD_ERROR_THRESHOLD {
            return Err(LinearSolveError::Singular);
        }

        Ok(solution)
    }
}
