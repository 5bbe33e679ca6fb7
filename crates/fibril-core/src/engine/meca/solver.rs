use nalgebra::Vector3;
use tracing::trace;

/// A symmetric positive-definite operator solvable by the conjugate
/// gradient method.
///
/// The system matrix is never materialized outside its sparse blocks; the
/// solver only needs matrix-vector products and a preconditioner
/// application.
pub trait LinearOperator {
    /// Number of 3-vector unknowns.
    fn len(&self) -> usize;

    /// `y = M x`.
    fn multiply(&self, x: &[Vector3<f64>], y: &mut [Vector3<f64>]);

    /// `y = P x`, an approximation of `M^-1 x`. The identity by default.
    fn precondition(&self, x: &[Vector3<f64>], y: &mut [Vector3<f64>]) {
        y.copy_from_slice(x);
    }
}

/// Why an iterative solve did not produce a usable solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolverFailure {
    /// The iteration cap was reached before the residual met the
    /// tolerance. Recoverable: retry with a smaller timestep.
    NotConverged { iterations: usize, residual: f64 },
    /// A non-finite value appeared in the iteration.
    NonFinite,
}

/// Outcome of a converged solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverReport {
    pub iterations: usize,
    pub residual: f64,
}

#[inline]
fn dot(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x.dot(y)).sum()
}

#[inline]
fn norm(a: &[Vector3<f64>]) -> f64 {
    dot(a, a).sqrt()
}

/// Preconditioned conjugate gradient.
///
/// Solves `M x = b` to a relative residual `tolerance`, starting from the
/// content of `x`. Iterations are capped; exceeding the cap reports
/// `NotConverged` with the residual reached, leaving the caller to decide
/// between retry and abort.
pub fn conjugate_gradient(
    operator: &impl LinearOperator,
    b: &[Vector3<f64>],
    x: &mut [Vector3<f64>],
    tolerance: f64,
    max_iterations: usize,
) -> Result<SolverReport, SolverFailure> {
    let n = operator.len();
    debug_assert_eq!(b.len(), n);
    debug_assert_eq!(x.len(), n);

    let b_norm = norm(b);
    if !b_norm.is_finite() {
        return Err(SolverFailure::NonFinite);
    }
    if b_norm == 0.0 {
        x.fill(Vector3::zeros());
        return Ok(SolverReport {
            iterations: 0,
            residual: 0.0,
        });
    }
    let target = tolerance * b_norm;

    let mut r = vec![Vector3::zeros(); n];
    let mut z = vec![Vector3::zeros(); n];
    let mut q = vec![Vector3::zeros(); n];

    // r = b - M x
    operator.multiply(x, &mut r);
    for i in 0..n {
        r[i] = b[i] - r[i];
    }

    operator.precondition(&r, &mut z);
    let mut p = z.clone();
    let mut rho = dot(&r, &z);

    for iteration in 0..max_iterations {
        let residual = norm(&r);
        if !residual.is_finite() {
            return Err(SolverFailure::NonFinite);
        }
        if residual <= target {
            trace!(iteration, residual, "conjugate gradient converged");
            return Ok(SolverReport {
                iterations: iteration,
                residual,
            });
        }

        operator.multiply(&p, &mut q);
        let pq = dot(&p, &q);
        if pq <= 0.0 || !pq.is_finite() {
            // the operator is not positive definite along p
            return Err(SolverFailure::NonFinite);
        }
        let alpha = rho / pq;
        for i in 0..n {
            x[i] += p[i] * alpha;
            r[i] -= q[i] * alpha;
        }

        operator.precondition(&r, &mut z);
        let rho_next = dot(&r, &z);
        let beta = rho_next / rho;
        rho = rho_next;
        for i in 0..n {
            p[i] = z[i] + p[i] * beta;
        }
    }

    Err(SolverFailure::NotConverged {
        iterations: max_iterations,
        residual: norm(&r),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::meca::matrix::BlockSparseSym;
    use approx::assert_relative_eq;

    struct MatrixOperator {
        matrix: BlockSparseSym,
    }

    impl LinearOperator for MatrixOperator {
        fn len(&self) -> usize {
            self.matrix.size()
        }

        fn multiply(&self, x: &[Vector3<f64>], y: &mut [Vector3<f64>]) {
            self.matrix.multiply(x, y);
        }

        fn precondition(&self, x: &[Vector3<f64>], y: &mut [Vector3<f64>]) {
            // Jacobi on the 3x3 diagonal blocks
            for i in 0..self.len() {
                let inv = self
                    .matrix
                    .diagonal_block(i)
                    .try_inverse()
                    .unwrap_or_else(nalgebra::Matrix3::identity);
                y[i] = inv * x[i];
            }
        }
    }

    /// A small SPD system: diagonally dominant with random-ish couplings.
    fn spd_system(n: usize) -> MatrixOperator {
        let mut matrix = BlockSparseSym::new(n);
        for i in 0..n {
            matrix.add_scalar(i, i, 4.0 + i as f64 * 0.1);
        }
        for i in 1..n {
            matrix.add_scalar(i - 1, i, -1.0);
        }
        MatrixOperator { matrix }
    }

    #[test]
    fn solves_a_spd_system_to_tolerance() {
        let op = spd_system(20);
        let b: Vec<Vector3<f64>> = (0..20)
            .map(|i| Vector3::new(1.0, (i as f64).sin(), -0.5))
            .collect();
        let mut x = vec![Vector3::zeros(); 20];

        let report = conjugate_gradient(&op, &b, &mut x, 1e-10, 200).unwrap();
        assert!(report.iterations > 0);

        let mut check = vec![Vector3::zeros(); 20];
        op.multiply(&x, &mut check);
        for i in 0..20 {
            assert_relative_eq!(check[i].x, b[i].x, epsilon = 1e-7);
            assert_relative_eq!(check[i].y, b[i].y, epsilon = 1e-7);
        }
    }

    #[test]
    fn zero_rhs_returns_zero_immediately() {
        let op = spd_system(5);
        let b = vec![Vector3::zeros(); 5];
        let mut x = vec![Vector3::repeat(3.0); 5];
        let report = conjugate_gradient(&op, &b, &mut x, 1e-8, 100).unwrap();
        assert_eq!(report.iterations, 0);
        assert!(x.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn iteration_cap_reports_not_converged() {
        let op = spd_system(50);
        let b = vec![Vector3::repeat(1.0); 50];
        let mut x = vec![Vector3::zeros(); 50];
        let err = conjugate_gradient(&op, &b, &mut x, 1e-14, 1).unwrap_err();
        assert!(matches!(
            err,
            SolverFailure::NotConverged { iterations: 1, .. }
        ));
    }

    #[test]
    fn non_finite_rhs_is_rejected() {
        let op = spd_system(3);
        let mut b = vec![Vector3::repeat(1.0); 3];
        b[1].y = f64::NAN;
        let mut x = vec![Vector3::zeros(); 3];
        assert_eq!(
            conjugate_gradient(&op, &b, &mut x, 1e-8, 100),
            Err(SolverFailure::NonFinite)
        );
    }

    #[test]
    fn warm_start_converges_faster_than_cold() {
        let op = spd_system(30);
        let b: Vec<Vector3<f64>> = (0..30).map(|i| Vector3::repeat(i as f64 * 0.1)).collect();

        let mut cold = vec![Vector3::zeros(); 30];
        let cold_report = conjugate_gradient(&op, &b, &mut cold, 1e-10, 500).unwrap();

        let mut warm = cold.clone();
        let warm_report = conjugate_gradient(&op, &b, &mut warm, 1e-10, 500).unwrap();
        assert!(warm_report.iterations <= cold_report.iterations);
    }
}
