//! Restarted GMRES (matrix-free).
//!
//! Arnoldi with modified Gram-Schmidt, Givens rotations on the Hessenberg
//! matrix, restart after `m` Krylov vectors. Only the operator action and
//! the state's inner product are used, so the solver works on distributed
//! states unchanged.

use log::debug;

use super::{LinearOperator, LinearSolver};
use crate::error::OdeError;
use crate::state::StateVector;

/// Restarted GMRES(m).
pub struct GeneralizedMinimalResidual<S> {
    /// Krylov basis, `m + 1` vectors.
    basis: Vec<S>,
    /// Residual / operator scratch.
    work: S,
    restart: usize,
    max_restarts: usize,
    rtol: f64,
    atol: f64,
}

impl<S: StateVector> GeneralizedMinimalResidual<S> {
    /// Create a solver for states shaped like `q`.
    ///
    /// # Arguments
    /// * `q` - Template state
    /// * `restart` - Krylov subspace size `m` before restarting
    /// * `rtol` - Residual tolerance relative to `|b|`
    pub fn new(q: &S, restart: usize, rtol: f64) -> Self {
        let restart = restart.clamp(1, q.len().max(1));
        Self {
            basis: (0..=restart).map(|_| q.zeros_like()).collect(),
            work: q.zeros_like(),
            restart,
            max_restarts: 20,
            rtol,
            atol: 0.0,
        }
    }

    /// Set the maximum number of restart cycles.
    pub fn with_max_restarts(mut self, max_restarts: usize) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Set an absolute residual floor.
    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }

    /// work = b - A x, returns its norm.
    fn residual(
        &mut self,
        op: &dyn LinearOperator<S>,
        x: &S,
        b: &S,
    ) -> Result<f64, OdeError> {
        op.apply(&mut self.work, x)?;
        self.work.scale(-1.0);
        self.work.axpy(1.0, b);
        Ok(self.work.norm())
    }
}

impl<S: StateVector> LinearSolver<S> for GeneralizedMinimalResidual<S> {
    fn solve(
        &mut self,
        op: &dyn LinearOperator<S>,
        x: &mut S,
        b: &S,
    ) -> Result<usize, OdeError> {
        OdeError::check_len(self.work.len(), x.len())?;
        let m = self.restart;
        let threshold = (self.rtol * b.norm()).max(self.atol);

        let mut beta = self.residual(op, x, b)?;
        if beta <= threshold {
            return Ok(0);
        }

        let mut iterations = 0;
        // Hessenberg matrix stored by column: h[j][i] = H(i, j)
        let mut h = vec![vec![0.0; m + 1]; m];
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];
        let mut g = vec![0.0; m + 1];

        for _cycle in 0..=self.max_restarts {
            self.basis[0].copy_from(&self.work);
            self.basis[0].scale(1.0 / beta);
            g.iter_mut().for_each(|v| *v = 0.0);
            g[0] = beta;

            let mut k = 0;
            for j in 0..m {
                iterations += 1;
                let (done, rest) = self.basis.split_at_mut(j + 1);
                let w = &mut rest[0];
                op.apply(w, &done[j])?;

                for (i, v) in done.iter().enumerate() {
                    let hij = w.dot(v);
                    h[j][i] = hij;
                    w.axpy(-hij, v);
                }
                let h_next = w.norm();
                h[j][j + 1] = h_next;
                if h_next > 0.0 {
                    w.scale(1.0 / h_next);
                }

                for i in 0..j {
                    let temp = cs[i] * h[j][i] + sn[i] * h[j][i + 1];
                    h[j][i + 1] = -sn[i] * h[j][i] + cs[i] * h[j][i + 1];
                    h[j][i] = temp;
                }

                let denom = h[j][j].hypot(h[j][j + 1]);
                if denom == 0.0 {
                    return Err(OdeError::LinearSolver {
                        iterations,
                        residual: beta,
                    });
                }
                cs[j] = h[j][j] / denom;
                sn[j] = h[j][j + 1] / denom;
                h[j][j] = denom;
                h[j][j + 1] = 0.0;
                g[j + 1] = -sn[j] * g[j];
                g[j] *= cs[j];

                k = j + 1;
                if g[j + 1].abs() <= threshold || h_next == 0.0 {
                    break;
                }
            }

            // Back substitution on the k x k upper triangle.
            let mut y = vec![0.0; k];
            for i in (0..k).rev() {
                let mut sum = g[i];
                for (l, yl) in y.iter().enumerate().skip(i + 1) {
                    sum -= h[l][i] * yl;
                }
                y[i] = sum / h[i][i];
            }
            for (i, yi) in y.iter().enumerate() {
                x.axpy(*yi, &self.basis[i]);
            }

            beta = self.residual(op, x, b)?;
            debug!("gmres: {} iterations, residual {:.3e}", iterations, beta);
            if beta <= threshold {
                return Ok(iterations);
            }
        }

        Err(OdeError::LinearSolver {
            iterations,
            residual: beta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::ShiftedOperator;
    use crate::linear::test_utils::sample_matrix;

    #[test]
    fn test_solves_shifted_system() {
        let l = sample_matrix();
        let op = ShiftedOperator::new(&l, 0.3, 0.0);
        let b = vec![1.0, -2.0, 0.5];
        let mut x = b.clone();

        let mut gmres = GeneralizedMinimalResidual::new(&b, 3, 1e-12);
        gmres.solve(&op, &mut x, &b).unwrap();

        let mut ax = vec![0.0; 3];
        op.apply(&mut ax, &x).unwrap();
        for (a, bi) in ax.iter().zip(&b) {
            assert!((a - bi).abs() < 1e-10);
        }
    }

    #[test]
    fn test_restarted_still_converges() {
        let l = sample_matrix();
        let op = ShiftedOperator::new(&l, 0.3, 0.0);
        let b = vec![1.0, 1.0, 1.0];
        let mut x = vec![0.0; 3];

        let mut gmres = GeneralizedMinimalResidual::new(&b, 1, 1e-10).with_max_restarts(200);
        gmres.solve(&op, &mut x, &b).unwrap();

        let mut ax = vec![0.0; 3];
        op.apply(&mut ax, &x).unwrap();
        for (a, bi) in ax.iter().zip(&b) {
            assert!((a - bi).abs() < 1e-8);
        }
    }

    #[test]
    fn test_non_convergence_reported() {
        let l = sample_matrix();
        let op = ShiftedOperator::new(&l, 0.3, 0.0);
        let b = vec![1.0, 1.0, 1.0];
        let mut x = vec![0.0; 3];

        let mut gmres = GeneralizedMinimalResidual::new(&b, 1, 1e-14).with_max_restarts(0);
        let err = gmres.solve(&op, &mut x, &b).unwrap_err();
        assert!(matches!(err, OdeError::LinearSolver { iterations: 1, .. }));
    }

    #[test]
    fn test_exact_guess_returns_immediately() {
        let l = sample_matrix();
        let op = ShiftedOperator::new(&l, 0.0, 0.0);
        let b = vec![1.0, 2.0, 3.0];
        let mut x = b.clone();
        let mut gmres = GeneralizedMinimalResidual::new(&b, 3, 1e-12);
        assert_eq!(gmres.solve(&op, &mut x, &b).unwrap(), 0);
    }
}
