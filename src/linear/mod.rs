//! Linear solvers for implicit stages.
//!
//! IMEX integrators solve `(I - alpha * L) x = b` once per implicit stage,
//! where `L` is the linear part of the RHS. The operator is only available
//! through its action, so solvers receive it as a [`LinearOperator`].

mod dense;
mod gmres;

pub use dense::DenseLu;
pub use gmres::GeneralizedMinimalResidual;

use crate::error::OdeError;
use crate::rhs::Rhs;
use crate::state::StateVector;

/// Action of a linear operator `out = A x`.
pub trait LinearOperator<S> {
    /// Apply the operator.
    ///
    /// # Errors
    ///
    /// Propagates failures of the underlying RHS evaluation.
    fn apply(&self, out: &mut S, x: &S) -> Result<(), OdeError>;
}

/// Solver for `A x = b` given the action of `A`.
pub trait LinearSolver<S: StateVector> {
    /// Solve in place, using `x` as the initial guess. Returns the number of
    /// iterations (or operator applications) used.
    ///
    /// # Errors
    ///
    /// [`OdeError::LinearSolver`] when the solve does not converge, or any
    /// error raised by the operator.
    fn solve(
        &mut self,
        op: &dyn LinearOperator<S>,
        x: &mut S,
        b: &S,
    ) -> Result<usize, OdeError>;
}

impl<S: StateVector, T: LinearSolver<S> + ?Sized> LinearSolver<S> for Box<T> {
    fn solve(
        &mut self,
        op: &dyn LinearOperator<S>,
        x: &mut S,
        b: &S,
    ) -> Result<usize, OdeError> {
        (**self).solve(op, x, b)
    }
}

/// The backward-Euler operator `x - alpha * L(x, t)` built from a linear RHS.
pub struct ShiftedOperator<'a, L> {
    linear: &'a L,
    alpha: f64,
    time: f64,
}

impl<'a, L> ShiftedOperator<'a, L> {
    /// Wrap `linear` with shift `alpha`, evaluated at `time`.
    pub fn new(linear: &'a L, alpha: f64, time: f64) -> Self {
        Self {
            linear,
            alpha,
            time,
        }
    }
}

impl<S: StateVector, L: Rhs<S>> LinearOperator<S> for ShiftedOperator<'_, L> {
    fn apply(&self, out: &mut S, x: &S) -> Result<(), OdeError> {
        self.linear
            .eval(out, x, self.time, false)
            .map_err(|source| OdeError::rhs(self.time, source))?;
        out.scale(-self.alpha);
        out.axpy(1.0, x);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::sample_matrix;
    use super::*;

    #[test]
    fn test_shifted_operator() {
        let l = sample_matrix();
        let op = ShiftedOperator::new(&l, 0.5, 0.0);
        let mut out = vec![0.0; 3];
        op.apply(&mut out, &vec![1.0, 0.0, 0.0]).unwrap();
        // e1 - 0.5 * first column
        assert_eq!(out, vec![3.0, 0.0, -0.125]);
    }
}
