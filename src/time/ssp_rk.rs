//! Strong Stability Preserving Runge-Kutta time integration.
//!
//! Shu-Osher form with two state registers. Each stage blends the step's
//! initial state with the previous stage:
//!
//! ```text
//! Q_s = a1[s] * Q_n + a2[s] * Q_{s-1} + b[s] * dt * f(Q_{s-1}, t + c[s] * dt)
//! ```
//!
//! `Q` itself is only overwritten after the last stage, so a failed stage
//! never leaks into the caller's state.

use serde::{Deserialize, Serialize};

use super::integrator::{OdeSolver, SolverClock, SolverInfo, clock_accessors};
use crate::error::OdeError;
use crate::rhs::{Forcing, Rhs, eval_forced};
use crate::state::StateVector;

/// Coefficients of an SSP Runge-Kutta method in Shu-Osher form.
#[derive(Clone, Debug)]
pub struct SspTableau {
    /// Identifier used in logs.
    pub name: &'static str,
    /// Design order.
    pub order: usize,
    /// Weight of the step's initial state per stage.
    pub a1: Vec<f64>,
    /// Weight of the previous stage per stage.
    pub a2: Vec<f64>,
    /// Tendency weight per stage.
    pub b: Vec<f64>,
    /// Stage time fraction per stage.
    pub c: Vec<f64>,
}

impl SspTableau {
    /// SSP-RK(3,3), Shu & Osher (1988).
    ///
    /// ```text
    /// u1 = u + dt * L(u, t)
    /// u2 = 3/4 * u + 1/4 * u1 + 1/4 * dt * L(u1, t + dt)
    /// u_new = 1/3 * u + 2/3 * u2 + 2/3 * dt * L(u2, t + dt/2)
    /// ```
    pub fn shu_osher_33() -> Self {
        Self {
            name: "ssprk33-shu-osher",
            order: 3,
            a1: vec![1.0, 0.75, 1.0 / 3.0],
            a2: vec![0.0, 0.25, 2.0 / 3.0],
            b: vec![1.0, 0.25, 2.0 / 3.0],
            c: vec![0.0, 1.0, 0.5],
        }
    }

    /// SSP-RK(4,3), Spiteri & Ruuth (2002); CFL coefficient 2.
    pub fn spiteri_ruuth_43() -> Self {
        Self {
            name: "ssprk43-spiteri-ruuth",
            order: 3,
            a1: vec![1.0, 0.0, 2.0 / 3.0, 0.0],
            a2: vec![0.0, 1.0, 1.0 / 3.0, 1.0],
            b: vec![0.5, 0.5, 1.0 / 6.0, 0.5],
            c: vec![0.0, 0.5, 1.0, 0.5],
        }
    }

    /// Number of stages.
    pub fn n_stages(&self) -> usize {
        self.b.len()
    }
}

/// Named SSP schemes for configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SspScheme {
    /// SSP-RK(3,3) (default).
    #[default]
    ShuOsher33,
    /// SSP-RK(4,3).
    SpiteriRuuth43,
}

impl SspScheme {
    /// Coefficients for this scheme.
    pub fn tableau(self) -> SspTableau {
        match self {
            SspScheme::ShuOsher33 => SspTableau::shu_osher_33(),
            SspScheme::SpiteriRuuth43 => SspTableau::spiteri_ruuth_43(),
        }
    }
}

/// Strong Stability Preserving Runge-Kutta solver.
pub struct StrongStabilityPreservingRungeKutta<S, R> {
    rhs: R,
    tableau: SspTableau,
    stage: S,
    dq: S,
    clock: SolverClock,
}

impl<S: StateVector, R: Rhs<S>> StrongStabilityPreservingRungeKutta<S, R> {
    /// Create a solver for states shaped like `q`.
    pub fn new(rhs: R, tableau: SspTableau, q: &S, dt: f64, t0: f64) -> Self {
        Self {
            rhs,
            tableau,
            stage: q.zeros_like(),
            dq: q.zeros_like(),
            clock: SolverClock::new(dt, t0),
        }
    }
}

impl<S, R> SolverInfo for StrongStabilityPreservingRungeKutta<S, R> {
    fn name(&self) -> &'static str {
        self.tableau.name
    }

    fn order(&self) -> usize {
        self.tableau.order
    }

    fn n_stages(&self) -> usize {
        self.tableau.n_stages()
    }
}

impl<S: StateVector, R: Rhs<S>> OdeSolver<S> for StrongStabilityPreservingRungeKutta<S, R> {
    clock_accessors!();

    fn dostep(
        &mut self,
        q: &mut S,
        t: f64,
        dt: f64,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<(), OdeError> {
        OdeError::check_len(self.stage.len(), q.len())?;
        let tab = &self.tableau;

        self.stage.copy_from(q);
        for s in 0..tab.n_stages() {
            let stage_time = t + tab.c[s] * dt;
            eval_forced(&self.rhs, &mut self.dq, &self.stage, stage_time, false, forcing)?;

            self.stage.scale(tab.a2[s]);
            self.stage.axpy(tab.a1[s], q);
            self.stage.axpy(tab.b[s] * dt, &self.dq);
        }
        q.copy_from(&self.stage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;

    /// du/dt = u
    struct Growth;

    impl Rhs<Vec<f64>> for Growth {
        fn eval(
            &self,
            dq: &mut Vec<f64>,
            q: &Vec<f64>,
            _t: f64,
            increment: bool,
        ) -> Result<(), BoxError> {
            for (d, v) in dq.iter_mut().zip(q) {
                if increment { *d += v } else { *d = *v }
            }
            Ok(())
        }
    }

    /// du/dt = cos(t), exercises stage times.
    struct Cosine;

    impl Rhs<Vec<f64>> for Cosine {
        fn eval(
            &self,
            dq: &mut Vec<f64>,
            _q: &Vec<f64>,
            t: f64,
            increment: bool,
        ) -> Result<(), BoxError> {
            for d in dq.iter_mut() {
                if increment { *d += t.cos() } else { *d = t.cos() }
            }
            Ok(())
        }
    }

    #[test]
    fn test_ssprk3_order() {
        // Exponential growth: du/dt = u, u(0) = 1, exact u(t) = exp(t)
        let mut u = vec![1.0];
        let dt = 0.01;
        let n_steps = 10;
        let mut solver =
            StrongStabilityPreservingRungeKutta::new(Growth, SspTableau::shu_osher_33(), &u, dt, 0.0);

        for _ in 0..n_steps {
            solver.step(&mut u, None, None).unwrap();
        }

        let expected = (dt * n_steps as f64).exp();
        let error = (u[0] - expected).abs();
        assert!(error < 1e-8, "Expected {}, got {} (error {})", expected, u[0], error);
    }

    #[test]
    fn test_stage_times_respected() {
        for tab in [SspTableau::shu_osher_33(), SspTableau::spiteri_ruuth_43()] {
            let mut errors = Vec::new();
            for n in [10, 20] {
                let mut u = vec![0.0];
                let dt = 1.0 / n as f64;
                let mut solver =
                    StrongStabilityPreservingRungeKutta::new(Cosine, tab.clone(), &u, dt, 0.0);
                for _ in 0..n {
                    solver.step(&mut u, None, None).unwrap();
                }
                errors.push((u[0] - 1.0_f64.sin()).abs());
            }
            let observed = (errors[0] / errors[1]).log2();
            assert!(observed > 2.8, "{}: observed order {:.3}", tab.name, observed);
        }
    }

    #[test]
    fn test_convex_weights() {
        for tab in [SspTableau::shu_osher_33(), SspTableau::spiteri_ruuth_43()] {
            for s in 0..tab.n_stages() {
                assert!((tab.a1[s] + tab.a2[s] - 1.0).abs() < 1e-14);
            }
        }
    }
}
