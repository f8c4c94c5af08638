//! Multirate infinitesimal step (MIS) composer.
//!
//! A slow step of size `H` runs the slow stages of an outer RK method. Each
//! stage hands the fast solver a constant offset tendency built from the
//! slow evaluations `fY` and the telescoping deltas `dY = Y - y_n`, and lets
//! it integrate over a sub-interval of length `d_i H`:
//!
//! ```text
//! Y_i(0) = y_n + sum_j alpha[i][j] * dY_j
//! dY/dtau = f_fast(Y, tau) + sum_j (gamma[i][j] / (d_i H)) dY_j + (beta[i][j] / d_i) fY_j
//! ```
//!
//! The fast solver is any [`OdeSolver`], including another composer, so
//! multirate integration nests to arbitrary depth.
//!
//! # Fast time
//!
//! Stage `i` hands the fast solver the interval `[t + (c_i - d_i) H, t + c_i H]`
//! and the fast clock runs at the slow rate, so every stage ends at its
//! abscissa. A fast tendency that depends on time explicitly is therefore
//! only first-order accurate in `H` for schemes with non-zero `alpha` or
//! `gamma` (MIS2). Schemes that restart every stage from `y_n`
//! (Wicker-Skamarock) integrate it consistently. Keep the fast operator
//! autonomous, or carry the explicit time dependence in the slow operator,
//! to retain the design order.

use log::debug;
use serde::{Deserialize, Serialize};

use super::integrator::{OdeSolver, SolverClock, SolverInfo, clock_accessors};
use crate::error::OdeError;
use crate::rhs::{ConstantForcing, Forcing, Rhs, eval_forced};
use crate::state::StateVector;

/// Tolerance used when rounding a sub-interval into fast steps.
const SUBSTEP_TOL: f64 = 1e-10;

// =============================================================================
// Tableau
// =============================================================================

/// Coefficients of an MIS method. Row `i` describes stage `i`; row 0 is the
/// step's initial state and is all zero.
#[derive(Clone, Debug)]
pub struct MisTableau {
    /// Identifier used in logs.
    pub name: &'static str,
    /// Design order.
    pub order: usize,
    /// Initial-value weights of the deltas.
    pub alpha: Vec<Vec<f64>>,
    /// Slow-tendency weights.
    pub beta: Vec<Vec<f64>>,
    /// Delta forcing weights.
    pub gamma: Vec<Vec<f64>>,
}

impl MisTableau {
    /// MIS2 of Knoth & Wensch (2014), order 2.
    pub fn mis2() -> Self {
        Self {
            name: "mis2",
            order: 2,
            alpha: vec![
                vec![0.0, 0.0, 0.0, 0.0],
                vec![0.0, 0.0, 0.0, 0.0],
                vec![0.0, 0.536946566710, 0.0, 0.0],
                vec![0.0, 0.480892968551, 0.500561163566, 0.0],
            ],
            beta: vec![
                vec![0.0, 0.0, 0.0, 0.0],
                vec![0.126848494553, 0.0, 0.0, 0.0],
                vec![-0.784838278826, 1.37442675268, 0.0, 0.0],
                vec![-0.0456727081749, -0.00875082271190, 0.524775788629, 0.0],
            ],
            gamma: vec![
                vec![0.0, 0.0, 0.0, 0.0],
                vec![0.0, 0.0, 0.0, 0.0],
                vec![0.0, 0.652465126004, 0.0, 0.0],
                vec![0.0, -0.0732769849457, 0.144902430420, 0.0],
            ],
        }
    }

    /// The split-explicit RK3 of Wicker & Skamarock (2002): every stage
    /// restarts from `y_n` and integrates over `H/3`, `H/2`, `H`.
    pub fn misrk3_wicker_skamarock() -> Self {
        Self {
            name: "misrk3-wicker-skamarock",
            order: 2,
            alpha: vec![vec![0.0; 4]; 4],
            beta: vec![
                vec![0.0, 0.0, 0.0, 0.0],
                vec![1.0 / 3.0, 0.0, 0.0, 0.0],
                vec![0.0, 0.5, 0.0, 0.0],
                vec![0.0, 0.0, 1.0, 0.0],
            ],
            gamma: vec![vec![0.0; 4]; 4],
        }
    }

    /// Number of rows, including the initial one.
    pub fn n_rows(&self) -> usize {
        self.beta.len()
    }

    /// Stage divisors `d_i = sum_j beta[i][j]`, indexed by row.
    pub fn divisors(&self) -> Vec<f64> {
        self.beta.iter().map(|row| row.iter().sum()).collect()
    }

    /// Stage end times `c_i` as fractions of the slow step.
    pub fn abscissae(&self) -> Vec<f64> {
        let d = self.divisors();
        let mut c = vec![0.0; self.n_rows()];
        for i in 1..self.n_rows() {
            let mut ci = d[i];
            for j in 0..i {
                ci += (self.alpha[i][j] + self.gamma[i][j]) * c[j];
            }
            c[i] = ci;
        }
        c
    }
}

/// Named MIS schemes for configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisScheme {
    /// MIS2 (default).
    #[default]
    Mis2,
    /// Wicker-Skamarock RK3.
    WickerSkamarock,
}

impl MisScheme {
    /// Coefficients for this scheme.
    pub fn tableau(self) -> MisTableau {
        match self {
            MisScheme::Mis2 => MisTableau::mis2(),
            MisScheme::WickerSkamarock => MisTableau::misrk3_wicker_skamarock(),
        }
    }
}

// =============================================================================
// Substepping
// =============================================================================

/// How many fast steps cover one slow sub-interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstepPolicy {
    /// A fixed count per sub-interval.
    Fixed(usize),
    /// Enough steps that none exceeds the fast solver's configured `dt`.
    #[default]
    FastDt,
}

impl SubstepPolicy {
    /// Number of fast steps for a sub-interval of length `len`.
    pub(crate) fn count(self, len: f64, fast_dt: f64) -> usize {
        match self {
            SubstepPolicy::Fixed(n) => n,
            SubstepPolicy::FastDt => ((len / fast_dt - SUBSTEP_TOL).ceil() as usize).max(1),
        }
    }

    /// Checks the policy against the slow and fast step sizes.
    pub(crate) fn validate(self, slow_dt: f64, fast_dt: f64) -> Result<(), OdeError> {
        if !(slow_dt > 0.0 && slow_dt.is_finite()) {
            return Err(OdeError::Config(format!(
                "slow dt must be positive and finite, got {}",
                slow_dt
            )));
        }
        if !(fast_dt > 0.0 && fast_dt.is_finite()) {
            return Err(OdeError::Nesting(format!(
                "fast solver dt must be positive and finite, got {}",
                fast_dt
            )));
        }
        match self {
            SubstepPolicy::Fixed(0) => Err(OdeError::Nesting(
                "number of fast substeps must be at least 1".into(),
            )),
            SubstepPolicy::FastDt if fast_dt > slow_dt * (1.0 + SUBSTEP_TOL) => {
                Err(OdeError::Nesting(format!(
                    "fast dt {} exceeds slow dt {}",
                    fast_dt, slow_dt
                )))
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Composer
// =============================================================================

/// Multirate infinitesimal step composer.
///
/// The design order assumes an autonomous fast operator; see the module
/// docs on fast time.
///
/// Buffers: the step's initial state, `n - 2` deltas, `n - 1` slow
/// tendencies and the offset tendency.
pub struct MultirateInfinitesimalStep<S, R, C> {
    slow: R,
    fast: C,
    tableau: MisTableau,
    policy: SubstepPolicy,
    d: Vec<f64>,
    c: Vec<f64>,
    yn: S,
    delta: Vec<S>,
    fy: Vec<S>,
    offset: S,
    clock: SolverClock,
}

impl<S, R, C> MultirateInfinitesimalStep<S, R, C>
where
    S: StateVector,
    R: Rhs<S>,
    C: OdeSolver<S>,
{
    /// Wrap `fast` under the slow operator `slow`.
    ///
    /// # Arguments
    /// * `slow` - Slow tendency operator
    /// * `fast` - Solver for the fast tendency (its own RHS)
    /// * `tableau` - MIS coefficients
    /// * `policy` - Fast step count per sub-interval
    /// * `q` - Template state
    /// * `dt` - Slow step size
    /// * `t0` - Initial time
    ///
    /// # Errors
    ///
    /// [`OdeError::Nesting`] when the fast solver cannot be driven under this
    /// policy, [`OdeError::Config`] for a malformed tableau or step size.
    pub fn new(
        slow: R,
        fast: C,
        tableau: MisTableau,
        policy: SubstepPolicy,
        q: &S,
        dt: f64,
        t0: f64,
    ) -> Result<Self, OdeError> {
        policy.validate(dt, fast.dt())?;
        let n = tableau.n_rows();
        if n < 2 {
            return Err(OdeError::Config(format!("{}: needs at least one stage", tableau.name)));
        }
        let d = tableau.divisors();
        if let Some(i) = (1..n).find(|&i| d[i] <= 0.0) {
            return Err(OdeError::Config(format!(
                "{}: stage {} has non-positive divisor {}",
                tableau.name, i, d[i]
            )));
        }
        let c = tableau.abscissae();

        debug!(
            "{}: slow dt {}, fast {} with dt {}, policy {:?}",
            tableau.name,
            dt,
            fast.name(),
            fast.dt(),
            policy
        );

        Ok(Self {
            slow,
            fast,
            policy,
            d,
            c,
            yn: q.zeros_like(),
            delta: (0..n - 2).map(|_| q.zeros_like()).collect(),
            fy: (0..n - 1).map(|_| q.zeros_like()).collect(),
            offset: q.zeros_like(),
            clock: SolverClock::new(dt, t0),
            tableau,
        })
    }

    /// The nested fast solver.
    pub fn fast(&self) -> &C {
        &self.fast
    }

    /// Stage end times as fractions of the slow step.
    pub fn abscissae(&self) -> &[f64] {
        &self.c
    }

    /// Runs the slow stages; `yn` already holds the entry state.
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
            d,
            c,
            yn,
            delta,
            fy,
            offset,
            ..
        } = self;
        let (alpha, beta, gamma) = (&tableau.alpha, &tableau.beta, &tableau.gamma);

        for i in 1..tableau.n_rows() {
            eval_forced(&*slow, &mut fy[i - 1], q, t + c[i - 1] * dt, false, forcing)?;

            if i > 1 {
                delta[i - 2].copy_from(q);
                delta[i - 2].axpy(-1.0, yn);
                q.copy_from(yn);
                for j in 1..i {
                    q.axpy(alpha[i][j], &delta[j - 1]);
                }
            }

            let di = d[i];
            offset.copy_from(&fy[0]);
            offset.scale(beta[i][0] / di);
            for j in 1..i {
                offset.axpy(gamma[i][j] / (di * dt), &delta[j - 1]);
                offset.axpy(beta[i][j] / di, &fy[j]);
            }

            let len = di * dt;
            let nsub = policy.count(len, fast.dt());
            let h = len / nsub as f64;
            let tau0 = t + (c[i] - di) * dt;
            let stage_forcing = ConstantForcing(&*offset);
            for k in 0..nsub {
                fast.dostep(q, tau0 + k as f64 * h, h, Some(&stage_forcing))?;
            }
        }
        Ok(())
    }
}

impl<S, R, C: SolverInfo> SolverInfo for MultirateInfinitesimalStep<S, R, C> {
    fn name(&self) -> &'static str {
        self.tableau.name
    }

    fn order(&self) -> usize {
        self.tableau.order.min(self.fast.order())
    }

    fn n_stages(&self) -> usize {
        self.tableau.n_rows() - 1
    }
}

impl<S, R, C> OdeSolver<S> for MultirateInfinitesimalStep<S, R, C>
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
