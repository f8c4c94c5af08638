//! Trait-based time integrator abstraction.
//!
//! Every integrator in this crate (single-rate, IMEX and multirate) exposes
//! the same capability set through [`OdeSolver`], so a multirate composer can
//! hold any of them as its fast solver, including another composer.
//!
//! # Example
//! ```
//! use atmos_ode::rhs::rhs_fn;
//! use atmos_ode::time::{LowStorageRungeKutta, LsrkTableau, OdeSolver};
//!
//! // du/dt = -u
//! let decay = rhs_fn(|dq: &mut Vec<f64>, q: &Vec<f64>, _t: f64, increment: bool| {
//!     for (d, v) in dq.iter_mut().zip(q) {
//!         if increment { *d -= v } else { *d = -v }
//!     }
//!     Ok(())
//! });
//!
//! let mut u = vec![1.0];
//! let mut solver = LowStorageRungeKutta::new(decay, LsrkTableau::carpenter_kennedy_54(), &u, 0.01, 0.0);
//! for _ in 0..100 {
//!     solver.step(&mut u, None, None).unwrap();
//! }
//! assert!((u[0] - (-1.0_f64).exp()).abs() < 1e-9);
//! ```

use crate::error::OdeError;
use crate::rhs::Forcing;
use crate::state::StateVector;

// =============================================================================
// SolverInfo Trait (non-generic, dyn-compatible)
// =============================================================================

/// Non-generic information about a time integrator.
///
/// Separate from [`OdeSolver`] so info can be queried without naming a
/// state type.
pub trait SolverInfo {
    /// Human-readable name for debugging and logging.
    fn name(&self) -> &'static str;

    /// Design order of accuracy.
    fn order(&self) -> usize;

    /// Number of RHS stages per step (slow stages for composers).
    fn n_stages(&self) -> usize;
}

// =============================================================================
// OdeSolver Trait
// =============================================================================

/// Uniform stepping interface shared by all integrators.
///
/// A solver owns its RHS, its stage buffers, and a clock (`time`, `dt`,
/// step counter). [`dostep`](OdeSolver::dostep) advances a state from an
/// explicit time without touching the clock; composers drive their fast
/// solver through it. [`step`](OdeSolver::step) is the clocked form used by
/// the driver.
///
/// On error, `dostep` leaves `q` exactly as it was on entry.
pub trait OdeSolver<S: StateVector>: SolverInfo {
    /// Configured step size.
    fn dt(&self) -> f64;

    /// Change the configured step size.
    fn set_dt(&mut self, dt: f64);

    /// Current time of the solver clock.
    fn time(&self) -> f64;

    /// Move the solver clock (restart, or a parent re-anchoring a child).
    fn set_time(&mut self, t: f64);

    /// Number of clocked steps taken.
    fn steps(&self) -> u64;

    /// Overwrite the step counter (restart).
    fn set_steps(&mut self, steps: u64);

    /// Check that `dt` can be used as this solver's step size. Composers
    /// check it against their fast solver.
    ///
    /// # Errors
    ///
    /// [`OdeError::Nesting`] or [`OdeError::Config`] when `dt` does not fit.
    fn check_dt(&self, _dt: f64) -> Result<(), OdeError> {
        Ok(())
    }

    /// Advance `q` from time `t` by `dt`.
    ///
    /// `forcing`, when present, is added to every stage tendency.
    ///
    /// # Errors
    ///
    /// RHS and linear-solver failures, and length mismatches. `q` is
    /// restored to its entry value before the error is returned.
    fn dostep(
        &mut self,
        q: &mut S,
        t: f64,
        dt: f64,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<(), OdeError>;

    /// Advance `q` by one clocked step and return the new time.
    ///
    /// `dt_override` replaces the configured step size for this step only
    /// (used for a shortened final step).
    ///
    /// # Errors
    ///
    /// Same as [`dostep`](OdeSolver::dostep); the clock is not advanced.
    fn step(
        &mut self,
        q: &mut S,
        dt_override: Option<f64>,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<f64, OdeError> {
        let dt = dt_override.unwrap_or_else(|| self.dt());
        let t = self.time();
        self.dostep(q, t, dt, forcing)?;
        let t_new = t + dt;
        self.set_time(t_new);
        self.set_steps(self.steps() + 1);
        Ok(t_new)
    }
}

// =============================================================================
// Boxed Solvers (Runtime Polymorphism)
// =============================================================================

/// Type alias for a boxed solver (runtime selection and nesting).
pub type BoxedSolver<S> = Box<dyn OdeSolver<S>>;

impl<T: SolverInfo + ?Sized> SolverInfo for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn order(&self) -> usize {
        (**self).order()
    }

    fn n_stages(&self) -> usize {
        (**self).n_stages()
    }
}

impl<S: StateVector, T: OdeSolver<S> + ?Sized> OdeSolver<S> for Box<T> {
    fn dt(&self) -> f64 {
        (**self).dt()
    }

    fn set_dt(&mut self, dt: f64) {
        (**self).set_dt(dt);
    }

    fn time(&self) -> f64 {
        (**self).time()
    }

    fn set_time(&mut self, t: f64) {
        (**self).set_time(t);
    }

    fn steps(&self) -> u64 {
        (**self).steps()
    }

    fn set_steps(&mut self, steps: u64) {
        (**self).set_steps(steps);
    }

    fn check_dt(&self, dt: f64) -> Result<(), OdeError> {
        (**self).check_dt(dt)
    }

    fn dostep(
        &mut self,
        q: &mut S,
        t: f64,
        dt: f64,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<(), OdeError> {
        (**self).dostep(q, t, dt, forcing)
    }

    fn step(
        &mut self,
        q: &mut S,
        dt_override: Option<f64>,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<f64, OdeError> {
        (**self).step(q, dt_override, forcing)
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Time, step size and step counter shared by every solver.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SolverClock {
    pub dt: f64,
    pub time: f64,
    pub steps: u64,
}

impl SolverClock {
    pub fn new(dt: f64, t0: f64) -> Self {
        Self {
            dt,
            time: t0,
            steps: 0,
        }
    }
}

/// Implements the clock accessors of [`OdeSolver`] for a type with a
/// `clock: SolverClock` field.
macro_rules! clock_accessors {
    () => {
        fn dt(&self) -> f64 {
            self.clock.dt
        }

        fn set_dt(&mut self, dt: f64) {
            self.clock.dt = dt;
        }

        fn time(&self) -> f64 {
            self.clock.time
        }

        fn set_time(&mut self, t: f64) {
            self.clock.time = t;
        }

        fn steps(&self) -> u64 {
            self.clock.steps
        }

        fn set_steps(&mut self, steps: u64) {
            self.clock.steps = steps;
        }
    };
}

pub(crate) use clock_accessors;
