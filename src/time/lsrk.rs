//! Low-storage (2N) explicit Runge-Kutta methods.
//!
//! Williamson's 2N form keeps a single tendency register `dQ` next to the
//! state. For stage `s` with coefficients `A[s]`, `B[s]`, `C[s]`:
//!
//! ```text
//! dQ = A[s] * dQ + f(Q, t + C[s] * dt)
//! Q  = Q + B[s] * dt * dQ
//! ```
//!
//! with `A[0] = 0`. The first stage overwrites `dQ`; later stages scale it
//! and let the RHS accumulate. Reordering these updates silently lowers the
//! order of the scheme, so the loop below follows the derivation exactly.

use serde::{Deserialize, Serialize};

use super::integrator::{OdeSolver, SolverClock, SolverInfo, clock_accessors};
use crate::error::OdeError;
use crate::rhs::{Forcing, Rhs, eval_forced};
use crate::state::StateVector;

// =============================================================================
// Tableau
// =============================================================================

/// Coefficients of a 2N-storage Runge-Kutta method.
#[derive(Clone, Debug)]
pub struct LsrkTableau {
    /// Identifier used in logs.
    pub name: &'static str,
    /// Design order.
    pub order: usize,
    /// Register scaling per stage (`a[0]` is unused and zero).
    pub a: Vec<f64>,
    /// State update weight per stage.
    pub b: Vec<f64>,
    /// Stage time fraction per stage.
    pub c: Vec<f64>,
}

impl LsrkTableau {
    /// Forward Euler (1 stage, order 1).
    pub fn euler() -> Self {
        Self {
            name: "lsrk-euler",
            order: 1,
            a: vec![0.0],
            b: vec![1.0],
            c: vec![0.0],
        }
    }

    /// Williamson (1980) 3-stage, order 3.
    pub fn williamson_33() -> Self {
        Self {
            name: "lsrk33-williamson",
            order: 3,
            a: vec![0.0, -5.0 / 9.0, -153.0 / 128.0],
            b: vec![1.0 / 3.0, 15.0 / 16.0, 8.0 / 15.0],
            c: vec![0.0, 1.0 / 3.0, 3.0 / 4.0],
        }
    }

    /// Carpenter & Kennedy (1994) 5-stage, order 4.
    pub fn carpenter_kennedy_54() -> Self {
        Self {
            name: "lsrk54-carpenter-kennedy",
            order: 4,
            a: vec![
                0.0,
                -567301805773.0 / 1357537059087.0,
                -2404267990393.0 / 2016746695238.0,
                -3550918686646.0 / 2091501179385.0,
                -1275806237668.0 / 842570457699.0,
            ],
            b: vec![
                1432997174477.0 / 9575080441755.0,
                5161836677717.0 / 13612068292357.0,
                1720146321549.0 / 2090206949498.0,
                3134564353537.0 / 4481467310338.0,
                2277821191437.0 / 14882151754819.0,
            ],
            c: vec![
                0.0,
                1432997174477.0 / 9575080441755.0,
                2526269341429.0 / 6820363962896.0,
                2006345519317.0 / 3224310063776.0,
                2802321613138.0 / 2924317926251.0,
            ],
        }
    }

    /// Number of stages.
    pub fn n_stages(&self) -> usize {
        self.b.len()
    }
}

/// Named LSRK schemes for configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LsrkScheme {
    /// Forward Euler.
    Euler,
    /// Williamson 3-stage, order 3.
    Williamson33,
    /// Carpenter-Kennedy 5-stage, order 4 (default).
    #[default]
    CarpenterKennedy54,
}

impl LsrkScheme {
    /// Coefficients for this scheme.
    pub fn tableau(self) -> LsrkTableau {
        match self {
            LsrkScheme::Euler => LsrkTableau::euler(),
            LsrkScheme::Williamson33 => LsrkTableau::williamson_33(),
            LsrkScheme::CarpenterKennedy54 => LsrkTableau::carpenter_kennedy_54(),
        }
    }
}

// =============================================================================
// Solver
// =============================================================================

/// Low-storage explicit Runge-Kutta solver.
///
/// Buffers: the tendency register `dq` and a copy of the entry state used
/// to roll back a failed step.
pub struct LowStorageRungeKutta<S, R> {
    rhs: R,
    tableau: LsrkTableau,
    dq: S,
    backup: S,
    clock: SolverClock,
}

impl<S: StateVector, R: Rhs<S>> LowStorageRungeKutta<S, R> {
    /// Create a solver for states shaped like `q`.
    ///
    /// # Arguments
    /// * `rhs` - Tendency operator
    /// * `tableau` - LSRK coefficients
    /// * `q` - Template state (only its shape is used)
    /// * `dt` - Step size
    /// * `t0` - Initial time
    pub fn new(rhs: R, tableau: LsrkTableau, q: &S, dt: f64, t0: f64) -> Self {
        debug_assert_eq!(tableau.a.len(), tableau.b.len());
        debug_assert_eq!(tableau.c.len(), tableau.b.len());
        Self {
            rhs,
            tableau,
            dq: q.zeros_like(),
            backup: q.zeros_like(),
            clock: SolverClock::new(dt, t0),
        }
    }

    /// The coefficients in use.
    pub fn tableau(&self) -> &LsrkTableau {
        &self.tableau
    }

    fn stages(
        &mut self,
        q: &mut S,
        t: f64,
        dt: f64,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<(), OdeError> {
        let tab = &self.tableau;
        for s in 0..tab.n_stages() {
            let stage_time = t + tab.c[s] * dt;
            if s == 0 {
                eval_forced(&self.rhs, &mut self.dq, q, stage_time, false, forcing)?;
            } else {
                self.dq.scale(tab.a[s]);
                eval_forced(&self.rhs, &mut self.dq, q, stage_time, true, forcing)?;
            }
            q.axpy(tab.b[s] * dt, &self.dq);
        }
        Ok(())
    }
}

impl<S, R> SolverInfo for LowStorageRungeKutta<S, R> {
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

impl<S: StateVector, R: Rhs<S>> OdeSolver<S> for LowStorageRungeKutta<S, R> {
    clock_accessors!();

    fn dostep(
        &mut self,
        q: &mut S,
        t: f64,
        dt: f64,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<(), OdeError> {
        OdeError::check_len(self.dq.len(), q.len())?;
        self.backup.copy_from(q);
        if let Err(err) = self.stages(q, t, dt, forcing) {
            q.copy_from(&self.backup);
            return Err(err);
        }
        Ok(())
    }
}
