//! Serializable solver selection.
//!
//! A driver binary reads these from JSON and turns them into boxed solvers.
//! The RHS operators are supplied by the model at build time.
//!
//! ```
//! use atmos_ode::config::{ExplicitChoice, MultirateChoice};
//!
//! let fast: ExplicitChoice = serde_json::from_str(r#"{ "kind": "lsrk", "scheme": "williamson33" }"#).unwrap();
//! let slow: MultirateChoice = serde_json::from_str(
//!     r#"{ "method": { "kind": "mri_gark", "scheme": "erk22a" }, "substeps": { "fixed": 4 } }"#,
//! ).unwrap();
//! assert_eq!(fast, ExplicitChoice::Lsrk { scheme: atmos_ode::time::LsrkScheme::Williamson33 });
//! assert_eq!(slow.substeps, atmos_ode::time::SubstepPolicy::Fixed(4));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::OdeError;
use crate::linear::{DenseLu, GeneralizedMinimalResidual, LinearSolver};
use crate::rhs::Rhs;
use crate::state::StateVector;
use crate::time::{
    AdditiveRungeKutta, ArkScheme, BoxedSolver, ImexSplitting, LowStorageRungeKutta, LsrkScheme,
    MisScheme, MriGarkExplicit, MriGarkScheme, MultirateInfinitesimalStep, SspScheme,
    StrongStabilityPreservingRungeKutta, SubstepPolicy,
};

// =============================================================================
// Explicit
// =============================================================================

/// An explicit single-rate solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExplicitChoice {
    /// Low-storage RK.
    Lsrk {
        #[serde(default)]
        scheme: LsrkScheme,
    },
    /// SSP RK.
    Ssp {
        #[serde(default)]
        scheme: SspScheme,
    },
}

impl Default for ExplicitChoice {
    fn default() -> Self {
        ExplicitChoice::Lsrk {
            scheme: LsrkScheme::default(),
        }
    }
}

impl ExplicitChoice {
    /// Build the solver around `rhs`.
    pub fn build<S, R>(self, rhs: R, q: &S, dt: f64, t0: f64) -> BoxedSolver<S>
    where
        S: StateVector + 'static,
        R: Rhs<S> + 'static,
    {
        match self {
            ExplicitChoice::Lsrk { scheme } => {
                Box::new(LowStorageRungeKutta::new(rhs, scheme.tableau(), q, dt, t0))
            }
            ExplicitChoice::Ssp { scheme } => Box::new(StrongStabilityPreservingRungeKutta::new(
                rhs,
                scheme.tableau(),
                q,
                dt,
                t0,
            )),
        }
    }
}

// =============================================================================
// IMEX
// =============================================================================

/// Linear solver for implicit stages.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinearSolverChoice {
    /// Restarted GMRES.
    Gmres {
        restart: usize,
        rtol: f64,
        #[serde(default = "default_max_restarts")]
        max_restarts: usize,
    },
    /// Dense LU, for small single-process systems.
    DenseLu,
}

fn default_max_restarts() -> usize {
    20
}

impl Default for LinearSolverChoice {
    fn default() -> Self {
        LinearSolverChoice::Gmres {
            restart: 20,
            rtol: 1e-10,
            max_restarts: default_max_restarts(),
        }
    }
}

impl LinearSolverChoice {
    /// Build a solver for states shaped like `q`.
    pub fn build<S: StateVector + 'static>(self, q: &S) -> Box<dyn LinearSolver<S>> {
        match self {
            LinearSolverChoice::Gmres {
                restart,
                rtol,
                max_restarts,
            } => Box::new(
                GeneralizedMinimalResidual::new(q, restart, rtol).with_max_restarts(max_restarts),
            ),
            LinearSolverChoice::DenseLu => Box::new(DenseLu::new(q)),
        }
    }
}

/// An IMEX additive RK solver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImexChoice {
    pub scheme: ArkScheme,
    pub splitting: ImexSplitting,
    pub linear_solver: LinearSolverChoice,
}

impl ImexChoice {
    /// Build the solver around an explicit and a linear operator.
    pub fn build<S, F, L>(self, explicit: F, linear: L, q: &S, dt: f64, t0: f64) -> BoxedSolver<S>
    where
        S: StateVector + 'static,
        F: Rhs<S> + 'static,
        L: Rhs<S> + 'static,
    {
        Box::new(
            AdditiveRungeKutta::new(
                explicit,
                linear,
                self.linear_solver.build(q),
                self.scheme.tableau(),
                q,
                dt,
                t0,
            )
            .with_splitting(self.splitting),
        )
    }
}

// =============================================================================
// Multirate
// =============================================================================

/// The outer scheme of a multirate composer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MultirateMethod {
    /// MIS family.
    Mis {
        #[serde(default)]
        scheme: MisScheme,
    },
    /// Explicit MRI-GARK family.
    MriGark {
        #[serde(default)]
        scheme: MriGarkScheme,
    },
}

/// A multirate composer level.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultirateChoice {
    pub method: MultirateMethod,
    #[serde(default)]
    pub substeps: SubstepPolicy,
}

impl MultirateChoice {
    /// Wrap `fast` under `slow`.
    ///
    /// # Errors
    ///
    /// [`OdeError::Nesting`] or [`OdeError::Config`] from the composer.
    pub fn build<S, R>(
        self,
        slow: R,
        fast: BoxedSolver<S>,
        q: &S,
        dt: f64,
        t0: f64,
    ) -> Result<BoxedSolver<S>, OdeError>
    where
        S: StateVector + 'static,
        R: Rhs<S> + 'static,
    {
        Ok(match self.method {
            MultirateMethod::Mis { scheme } => Box::new(MultirateInfinitesimalStep::new(
                slow,
                fast,
                scheme.tableau(),
                self.substeps,
                q,
                dt,
                t0,
            )?),
            MultirateMethod::MriGark { scheme } => Box::new(MriGarkExplicit::new(
                slow,
                fast,
                scheme.tableau(),
                self.substeps,
                q,
                dt,
                t0,
            )?),
        })
    }
}
