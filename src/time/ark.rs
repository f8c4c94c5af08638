//! IMEX additive Runge-Kutta time integration.
//!
//! The tendency is split as `f = N + L` with `L` linear (and stiff) and `N`
//! treated explicitly. Stage `i` forms
//!
//! ```text
//! Qhat_i = Q_n + dt * sum_{j<i} (Ae[i][j] * N_j + Ai[i][j] * L_j)
//! (I - dt * Ai[i][i] * L) Y_i = Qhat_i
//! ```
//!
//! and the step combines `Q_{n+1} = Q_n + dt * sum_i b[i] * (N_i + L_i)`.
//! The implicit solve goes through a [`LinearSolver`]; stages with a zero
//! diagonal entry skip it.

use serde::{Deserialize, Serialize};

use super::integrator::{OdeSolver, SolverClock, SolverInfo, clock_accessors};
use crate::error::OdeError;
use crate::linear::{LinearSolver, ShiftedOperator};
use crate::rhs::{Forcing, Rhs, eval_forced};
use crate::state::StateVector;

// =============================================================================
// Tableau
// =============================================================================

/// Explicit/implicit coefficient pair of an additive RK method.
#[derive(Clone, Debug)]
pub struct ArkTableau {
    /// Identifier used in logs.
    pub name: &'static str,
    /// Design order.
    pub order: usize,
    /// Explicit tableau (strictly lower triangular).
    pub ae: Vec<Vec<f64>>,
    /// Implicit tableau (lower triangular).
    pub ai: Vec<Vec<f64>>,
    /// Shared weights.
    pub b: Vec<f64>,
    /// Shared abscissae.
    pub c: Vec<f64>,
}

impl ArkTableau {
    /// Forward-backward Euler, order 1.
    pub fn ark1_forward_backward_euler() -> Self {
        Self {
            name: "ark1-forward-backward-euler",
            order: 1,
            ae: vec![vec![0.0, 0.0], vec![1.0, 0.0]],
            ai: vec![vec![0.0, 0.0], vec![0.0, 1.0]],
            b: vec![0.0, 1.0],
            c: vec![0.0, 1.0],
        }
    }

    /// Giraldo, Kelly & Constantinescu (2013) ARK2 with `a32 = 1/2`.
    pub fn ark2_giraldo_kelly_constantinescu() -> Self {
        let sqrt2 = std::f64::consts::SQRT_2;
        let a32 = 0.5;
        let gamma = 1.0 - 1.0 / sqrt2;
        let delta = 1.0 / (2.0 * sqrt2);
        Self {
            name: "ark2-giraldo-kelly-constantinescu",
            order: 2,
            ae: vec![
                vec![0.0, 0.0, 0.0],
                vec![2.0 - sqrt2, 0.0, 0.0],
                vec![1.0 - a32, a32, 0.0],
            ],
            ai: vec![
                vec![0.0, 0.0, 0.0],
                vec![gamma, gamma, 0.0],
                vec![delta, delta, gamma],
            ],
            b: vec![delta, delta, gamma],
            c: vec![0.0, 2.0 - sqrt2, 1.0],
        }
    }

    /// Number of stages.
    pub fn n_stages(&self) -> usize {
        self.b.len()
    }
}

/// Named IMEX schemes for configuration files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArkScheme {
    /// Forward-backward Euler.
    ForwardBackwardEuler,
    /// ARK2 Giraldo-Kelly-Constantinescu (default).
    #[default]
    GiraldoKellyConstantinescu,
}

impl ArkScheme {
    /// Coefficients for this scheme.
    pub fn tableau(self) -> ArkTableau {
        match self {
            ArkScheme::ForwardBackwardEuler => ArkTableau::ark1_forward_backward_euler(),
            ArkScheme::GiraldoKellyConstantinescu => {
                ArkTableau::ark2_giraldo_kelly_constantinescu()
            }
        }
    }
}

/// How the explicit operator relates to the linear one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImexSplitting {
    /// The explicit operator is `N` only.
    #[default]
    Split,
    /// The explicit operator is the full tendency `N + L`; `L` is subtracted.
    Unsplit,
}

// =============================================================================
// Solver
// =============================================================================

/// IMEX additive Runge-Kutta solver.
///
/// Stores the explicit and linear tendency of every stage, a right-hand side
/// buffer for the implicit solves and a copy of the entry state.
pub struct AdditiveRungeKutta<S, F, L, LS> {
    explicit: F,
    linear: L,
    solver: LS,
    tableau: ArkTableau,
    splitting: ImexSplitting,
    explicit_stages: Vec<S>,
    linear_stages: Vec<S>,
    qhat: S,
    backup: S,
    clock: SolverClock,
}

impl<S, F, L, LS> AdditiveRungeKutta<S, F, L, LS>
where
    S: StateVector,
    F: Rhs<S>,
    L: Rhs<S>,
    LS: LinearSolver<S>,
{
    /// Create a split-mode solver for states shaped like `q`.
    ///
    /// # Arguments
    /// * `explicit` - Non-stiff operator `N`
    /// * `linear` - Linear stiff operator `L`
    /// * `solver` - Solver for `(I - alpha L) x = b`
    /// * `tableau` - IMEX coefficients
    /// * `q` - Template state
    /// * `dt` - Step size
    /// * `t0` - Initial time
    pub fn new(
        explicit: F,
        linear: L,
        solver: LS,
        tableau: ArkTableau,
        q: &S,
        dt: f64,
        t0: f64,
    ) -> Self {
        let n = tableau.n_stages();
        Self {
            explicit,
            linear,
            solver,
            tableau,
            splitting: ImexSplitting::Split,
            explicit_stages: (0..n).map(|_| q.zeros_like()).collect(),
            linear_stages: (0..n).map(|_| q.zeros_like()).collect(),
            qhat: q.zeros_like(),
            backup: q.zeros_like(),
            clock: SolverClock::new(dt, t0),
        }
    }

    /// Select split or unsplit interpretation of the explicit operator.
    pub fn with_splitting(mut self, splitting: ImexSplitting) -> Self {
        self.splitting = splitting;
        self
    }

    /// The coefficients in use.
    pub fn tableau(&self) -> &ArkTableau {
        &self.tableau
    }

    /// Runs every stage and combines into `q`; `backup` holds `Q_n`.
    fn stages(
        &mut self,
        q: &mut S,
        t: f64,
        dt: f64,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<(), OdeError> {
        let Self {
            explicit,
            linear,
            solver,
            tableau,
            splitting,
            explicit_stages,
            linear_stages,
            qhat,
            backup,
            ..
        } = self;

        for i in 0..tableau.n_stages() {
            let stage_time = t + tableau.c[i] * dt;

            qhat.copy_from(backup);
            for j in 0..i {
                qhat.axpy(dt * tableau.ae[i][j], &explicit_stages[j]);
                qhat.axpy(dt * tableau.ai[i][j], &linear_stages[j]);
            }

            q.copy_from(qhat);
            let diag = tableau.ai[i][i];
            if diag != 0.0 {
                let op = ShiftedOperator::new(&*linear, dt * diag, stage_time);
                solver.solve(&op, q, qhat)?;
            }

            linear
                .eval(&mut linear_stages[i], q, stage_time, false)
                .map_err(|source| OdeError::rhs(stage_time, source))?;
            eval_forced(&*explicit, &mut explicit_stages[i], q, stage_time, false, forcing)?;
            if *splitting == ImexSplitting::Unsplit {
                explicit_stages[i].axpy(-1.0, &linear_stages[i]);
            }
        }

        q.copy_from(backup);
        for (i, &b) in tableau.b.iter().enumerate() {
            if b != 0.0 {
                q.axpy(dt * b, &explicit_stages[i]);
                q.axpy(dt * b, &linear_stages[i]);
            }
        }
        Ok(())
    }
}

impl<S, F, L, LS> SolverInfo for AdditiveRungeKutta<S, F, L, LS> {
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

impl<S, F, L, LS> OdeSolver<S> for AdditiveRungeKutta<S, F, L, LS>
where
    S: StateVector,
    F: Rhs<S>,
    L: Rhs<S>,
    LS: LinearSolver<S>,
{
    clock_accessors!();

    fn dostep(
        &mut self,
        q: &mut S,
        t: f64,
        dt: f64,
        forcing: Option<&dyn Forcing<S>>,
    ) -> Result<(), OdeError> {
        OdeError::check_len(self.backup.len(), q.len())?;
        self.backup.copy_from(q);
        if let Err(err) = self.stages(q, t, dt, forcing) {
            q.copy_from(&self.backup);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::linear::{DenseLu, GeneralizedMinimalResidual, LinearOperator};
    use crate::rhs::{SumRhs, rhs_fn};

    /// L y = -a y
    struct Damping(f64);

    impl Rhs<Vec<f64>> for Damping {
        fn eval(
            &self,
            dq: &mut Vec<f64>,
            q: &Vec<f64>,
            _t: f64,
            increment: bool,
        ) -> Result<(), BoxError> {
            for (d, v) in dq.iter_mut().zip(q) {
                let f = -self.0 * v;
                if increment { *d += f } else { *d = f }
            }
            Ok(())
        }
    }

    /// N(t) = a sin t + cos t, so that y = sin t solves y' = N + L y.
    struct Source(f64);

    impl Rhs<Vec<f64>> for Source {
        fn eval(
            &self,
            dq: &mut Vec<f64>,
            _q: &Vec<f64>,
            t: f64,
            increment: bool,
        ) -> Result<(), BoxError> {
            let f = self.0 * t.sin() + t.cos();
            for d in dq.iter_mut() {
                if increment { *d += f } else { *d = f }
            }
            Ok(())
        }
    }

    struct NeverConverges;

    impl LinearSolver<Vec<f64>> for NeverConverges {
        fn solve(
            &mut self,
            _op: &dyn LinearOperator<Vec<f64>>,
            _x: &mut Vec<f64>,
            _b: &Vec<f64>,
        ) -> Result<usize, OdeError> {
            Err(OdeError::LinearSolver {
                iterations: 7,
                residual: 1.0,
            })
        }
    }

    fn error_at_one(tableau: ArkTableau, a: f64, n: usize) -> f64 {
        let mut y = vec![0.0];
        let dt = 1.0 / n as f64;
        let mut solver =
            AdditiveRungeKutta::new(Source(a), Damping(a), DenseLu::new(&y), tableau, &y, dt, 0.0);
        for _ in 0..n {
            solver.step(&mut y, None, None).unwrap();
        }
        (y[0] - 1.0_f64.sin()).abs()
    }

    #[test]
    fn test_tableaus_consistent() {
        for tab in [
            ArkTableau::ark1_forward_backward_euler(),
            ArkTableau::ark2_giraldo_kelly_constantinescu(),
        ] {
            let b_sum: f64 = tab.b.iter().sum();
            assert!((b_sum - 1.0).abs() < 1e-14);
            for i in 0..tab.n_stages() {
                let ae_sum: f64 = tab.ae[i].iter().sum();
                let ai_sum: f64 = tab.ai[i].iter().sum();
                assert!((ae_sum - tab.c[i]).abs() < 1e-14, "{} row {}", tab.name, i);
                assert!((ai_sum - tab.c[i]).abs() < 1e-14, "{} row {}", tab.name, i);
            }
        }
    }

    #[test]
    fn test_observed_orders() {
        for (tab, expected) in [
            (ArkTableau::ark1_forward_backward_euler(), 1.0),
            (ArkTableau::ark2_giraldo_kelly_constantinescu(), 2.0),
        ] {
            let e1 = error_at_one(tab.clone(), 2.0, 40);
            let e2 = error_at_one(tab.clone(), 2.0, 80);
            let observed = (e1 / e2).log2();
            assert!(
                (observed - expected).abs() < 0.2,
                "{}: observed order {:.3}",
                tab.name,
                observed
            );
        }
    }

    #[test]
    fn test_stiff_linear_part_is_damped() {
        let zero = rhs_fn(|dq: &mut Vec<f64>, _q: &Vec<f64>, _t: f64, increment: bool| {
            if !increment {
                dq.fill(0.0);
            }
            Ok(())
        });
        let mut y = vec![1.0];
        // dt * a = 1000, far outside any explicit stability region
        let mut solver = AdditiveRungeKutta::new(
            zero,
            Damping(1e4),
            DenseLu::new(&y),
            ArkTableau::ark2_giraldo_kelly_constantinescu(),
            &y,
            0.1,
            0.0,
        );
        for _ in 0..10 {
            solver.step(&mut y, None, None).unwrap();
        }
        assert!(y[0].is_finite());
        assert!(y[0].abs() < 1e-3, "y = {}", y[0]);
    }

    #[test]
    fn test_unsplit_matches_split() {
        let a = 3.0;
        let tab = ArkTableau::ark2_giraldo_kelly_constantinescu();

        let mut split_y = vec![0.5];
        let mut split = AdditiveRungeKutta::new(
            Source(a),
            Damping(a),
            GeneralizedMinimalResidual::new(&split_y, 1, 1e-14),
            tab.clone(),
            &split_y,
            0.1,
            0.0,
        );

        let mut full_y = vec![0.5];
        let mut unsplit = AdditiveRungeKutta::new(
            SumRhs::new(Source(a), Damping(a)),
            Damping(a),
            GeneralizedMinimalResidual::new(&full_y, 1, 1e-14),
            tab,
            &full_y,
            0.1,
            0.0,
        )
        .with_splitting(ImexSplitting::Unsplit);

        for _ in 0..10 {
            split.step(&mut split_y, None, None).unwrap();
            unsplit.step(&mut full_y, None, None).unwrap();
        }
        assert!((split_y[0] - full_y[0]).abs() < 1e-12);
    }

    #[test]
    fn test_linear_solver_failure_reported() {
        let mut y = vec![1.0];
        let mut solver = AdditiveRungeKutta::new(
            Source(1.0),
            Damping(1.0),
            NeverConverges,
            ArkTableau::ark1_forward_backward_euler(),
            &y,
            0.1,
            0.0,
        );
        let err = solver.step(&mut y, None, None).unwrap_err();
        assert!(matches!(err, OdeError::LinearSolver { iterations: 7, .. }));
        assert_eq!(y, vec![1.0]);
        assert_eq!(solver.steps(), 0);
    }

    #[test]
    fn test_explicit_rhs_failure_restores_state() {
        let failing = rhs_fn(|_dq: &mut Vec<f64>, _q: &Vec<f64>, t: f64, _inc: bool| {
            if t > 0.0 {
                Err("explicit part failed".into())
            } else {
                Ok(())
            }
        });
        let mut y = vec![2.0, 3.0];
        let mut solver = AdditiveRungeKutta::new(
            failing,
            Damping(1.0),
            DenseLu::new(&y),
            ArkTableau::ark2_giraldo_kelly_constantinescu(),
            &y,
            0.1,
            0.0,
        );
        let err = solver.step(&mut y, None, None).unwrap_err();
        assert!(matches!(err, OdeError::Rhs { .. }));
        assert_eq!(y, vec![2.0, 3.0]);
    }
}
