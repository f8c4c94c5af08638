//! Explicit MRI-GARK composer (Sandu, 2019).
//!
//! The slow step is split at the abscissae `c_0 = 0 < c_1 < ... < c_S = 1`.
//! On each interval the fast solver integrates its own tendency plus a
//! polynomial-in-time combination of the slow stage tendencies:
//!
//! ```text
//! R_s = f_slow(Q, t_n + c_s H)
//! dY/dtau = f_fast(Y, tau) + sum_k sum_{j<=s} (Gamma_k[s][j] / dc_s) theta^k R_j
//! theta = (tau - t_n - c_s H) / (dc_s H)
//! ```

use serde::{Deserialize, Serialize};

use super::integrator::{OdeSolver, SolverClock, SolverInfo, clock_accessors};
use super::mis::SubstepPolicy;
use crate::error::OdeError;
use crate::rhs::{Forcing, Rhs, eval_forced};
use crate::state::StateVector;

// =============================================================================
// Tableau
// =============================================================================

/// Coupling coefficients of an explicit MRI-GARK method.
#[derive(Clone, Debug)]
pub struct MriGarkTableau {
    /// Identifier used in logs.
    pub name: &'static str,
    /// Design order.
    pub order: usize,
    /// Interval boundaries, `c[0] = 0` and `c[S] = 1`.
    pub c: Vec<f64>,
    /// `gamma[k][s][j]`: weight of `R_j` in the `theta^k` term on interval `s`.
    pub gamma: Vec<Vec<Vec<f64>>>,
}

impl MriGarkTableau {
    /// MRI-GARK-ERK22a, the multirate explicit midpoint method.
    pub fn erk22a() -> Self {
        Self {
            name: "mri-gark-erk22a",
            order: 2,
            c: vec![0.0, 0.5, 1.0],
            gamma: vec![vec![vec![0.5, 0.0], vec![-0.5, 1.0]]],
        }
    }

    /// MRI-GARK-ERK33a with free parameter `delta`.
    pub fn erk33a(delta: f64) -> Self {
        Self {
            name: "mri-gark-erk33a",
            order: 3,
            c: vec![0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0],
            gamma: vec![
                vec![
                    vec![1.0 / 3.0, 0.0, 0.0],
                    vec![(-6.0 * delta - 7.0) / 12.0, (6.0 * delta + 11.0) / 12.0, 0.0],
                    vec![0.0, (6.0 * delta - 5.0) / 12.0, (3.0 - 2.0 * delta) / 4.0],
                ],
                vec![
                    vec![0.0, 0.0, 0.0],
                    vec![(2.0 * delta + 1.0) / 2.0, -(2.0 * delta + 1.0) / 2.0, 0.0],
                    vec![0.5, -(2.0 * delta + 1.0) / 2.0, delta],
                ],
            ],
        }
    }

    /// Number of slow stages (and fast intervals).
    pub fn n_stages(&self) -> usize {
        self.c.len() - 1
    }

    /// Degree of the forcing polynomial plus one.
    pub fn n_terms(&self) -> usize {
        self.gamma.len()
    }
}

/// Named MRI-GARK schemes for configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MriGarkScheme {
    /// ERK22a.
    Erk22a,
    /// ERK33a with `delta = -1/2` (default).
    #[default]
    Erk33a,
}

impl MriGarkScheme {
    /// Coefficients for this scheme.
    pub fn tableau(self) -> MriGarkTableau {
        match self {
            MriGarkScheme::Erk22a => MriGarkTableau::erk22a(),
            MriGarkScheme::Erk33a => MriGarkTableau::erk33a(-0.5),
        }
    }
}

// =============================================================================
// Forcing
// =============================================================================

/// `sum_k theta^k P_k` on one fast interval.
struct PolynomialForcing<'a, S> {
    coeffs: &'a [S],
    start: f64,
    len: f64,
}

impl<S: StateVector> Forcing<S> for PolynomialForcing<'_, S> {
    fn add_to(&self, dq: &mut S, t: f64) {
        let theta = (t - self.start) / self.len;
        let mut power = 1.0;
        for p in self.coeffs {
            dq.axpy(power, p);
            power *= theta;
        }
    }
}

// =============================================================================
// Composer
// =============================================================================

/// Explicit MRI-GARK composer.
pub struct MriGarkExplicit<S, R, C> {
    slow: R,
    fast: C,
    tableau: MriGarkTableau,
    policy: SubstepPolicy,
    yn: S,
    slow_stages: Vec<S>,
    poly: Vec<S>,
    clock: SolverClock,
}

impl<S, R, C> MriGarkExplicit<S, R, C>
where
    S: StateVector,
    R: Rhs<S>,
    C: OdeSolver<S>,
{
    /// Wrap `fast` under the slow operator `slow`.
    ///
    /// # Errors
    ///
    /// [`OdeError::Nesting`] when the fast solver cannot be driven under this
    /// policy, [`OdeError::Config`] for non-increasing abscissae.
    pub fn new(
        slow: R,
        fast: C,
        tableau: MriGarkTableau,
        policy: SubstepPolicy,
        q: &S,
        dt: f64,
        t0: f64,
    ) -> Result<Self, OdeError> {
        policy.validate(dt, fast.dt())?;
        let n = tableau.n_stages();
        if let Some(s) = (0..n).find(|&s| tableau.c[s + 1] <= tableau.c[s]) {
            return Err(OdeError::Config(format!(
                "{}: abscissae must increase, interval {} is empty",
                tableau.name, s
            )));
        }
        Ok(Self {
            slow,
            fast,
            policy,
            yn: q.zeros_like(),
            slow_stages: (0..n).map(|_| q.zeros_like()).collect(),
            poly: (0..tableau.n_terms()).map(|_| q.zeros_like()).collect(),
            clock: SolverClock::new(dt, t0),
            tableau,
        })
    }

    /// The nested fast solver.
    pub fn fast(&self) -> &C {
        &self.fast
    }

    fn stages(
        &mut self,
        q: &mut S,
        t: f64,
        dt: f64,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<(), OdeError> {
        let Self {
            slow,
            fast,
            tableau,
            policy,
            slow_stages,
            poly,
            ..
        } = self;

        for s in 0..tableau.n_stages() {
            let ts = t + tableau.c[s] * dt;
            eval_forced(&*slow, &mut slow_stages[s], q, ts, false, forcing)?;

            let dc = tableau.c[s + 1] - tableau.c[s];
            for (k, p) in poly.iter_mut().enumerate() {
                p.set_zero();
                for (j, r) in slow_stages.iter().enumerate().take(s + 1) {
                    let w = tableau.gamma[k][s][j] / dc;
                    if w != 0.0 {
                        p.axpy(w, r);
                    }
                }
            }

            let len = dc * dt;
            let nsub = policy.count(len, fast.dt());
            let h = len / nsub as f64;
            let stage_forcing = PolynomialForcing {
                coeffs: poly.as_slice(),
                start: ts,
                len,
            };
            for m in 0..nsub {
                fast.dostep(q, ts + m as f64 * h, h, Some(&stage_forcing))?;
            }
        }
        Ok(())
    }
}

impl<S, R, C: SolverInfo> SolverInfo for MriGarkExplicit<S, R, C> {
    fn name(&self) -> &'static str {
        self.tableau.name
    }

    fn order(&self) -> usize {
        self.tableau.order.min(self.fast.order())
    }

    fn n_stages(&self) -> usize {
        self.tableau.n_stages()
    }
}

impl<S, R, C> OdeSolver<S> for MriGarkExplicit<S, R, C>
where
    S: StateVector,
    R: Rhs<S>,
    C: OdeSolver<S>,
{
    clock_accessors!();

    fn check_dt(&self, dt: f64) -> Result<(), OdeError> {
        self.policy.validate(dt, self.fast.dt())
    }

    fn dostep(
        &mut self,
        q: &mut S,
        t: f64,
        dt: f64,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<(), OdeError> {
        OdeError::check_len(self.yn.len(), q.len())?;
        self.yn.copy_from(q);
        if let Err(err) = self.stages(q, t, dt, forcing) {
            q.copy_from(&self.yn);
            return Err(err);
        }
        Ok(())
    }
}
