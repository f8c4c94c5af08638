//! Direct solve through a dense LU factorization.
//!
//! The operator is assembled column by column from its action on unit
//! vectors, then factored with full pivoting. Intended for small,
//! single-process systems and for checking the iterative solver.

use faer::{Mat, linalg::solvers::Solve};

use super::{LinearOperator, LinearSolver};
use crate::error::OdeError;
use crate::state::StateVector;

/// Dense LU solver. The matrix is rebuilt on every call because the shift
/// changes with the stage.
///
/// Only for states held by a single process: the matrix would cover the
/// local slice alone. [`solve`](LinearSolver::solve) rejects a state split
/// across processes; use GMRES there.
pub struct DenseLu<S> {
    unit: S,
    column: S,
    n: usize,
}

impl<S: StateVector> DenseLu<S> {
    /// Create a solver for states shaped like `q`.
    pub fn new(q: &S) -> Self {
        Self {
            unit: q.zeros_like(),
            column: q.zeros_like(),
            n: q.len(),
        }
    }

    fn assemble(&mut self, op: &dyn LinearOperator<S>) -> Result<Mat<f64>, OdeError> {
        let n = self.n;
        let mut a = Mat::<f64>::zeros(n, n);
        let mut e = vec![0.0; n];
        for j in 0..n {
            e[j] = 1.0;
            self.unit.copy_from_host(&e)?;
            e[j] = 0.0;

            op.apply(&mut self.column, &self.unit)?;
            for (i, v) in self.column.to_host().into_iter().enumerate() {
                a[(i, j)] = v;
            }
        }
        Ok(a)
    }
}

impl<S: StateVector> LinearSolver<S> for DenseLu<S> {
    fn solve(
        &mut self,
        op: &dyn LinearOperator<S>,
        x: &mut S,
        b: &S,
    ) -> Result<usize, OdeError> {
        OdeError::check_len(self.n, x.len())?;
        if x.n_processes() > 1 {
            return Err(OdeError::Config(format!(
                "dense LU needs a single-process state, got one split across {} processes",
                x.n_processes()
            )));
        }
        let a = self.assemble(op)?;

        let mut rhs = Mat::<f64>::zeros(self.n, 1);
        for (i, v) in b.to_host().into_iter().enumerate() {
            rhs[(i, 0)] = v;
        }

        let lu = a.as_ref().full_piv_lu();
        let sol = lu.solve(&rhs);

        let host: Vec<f64> = (0..self.n).map(|i| sol[(i, 0)]).collect();
        if host.iter().any(|v| !v.is_finite()) {
            return Err(OdeError::LinearSolver {
                iterations: self.n,
                residual: f64::NAN,
            });
        }
        x.copy_from_host(&host)?;
        Ok(self.n)
    }
}
