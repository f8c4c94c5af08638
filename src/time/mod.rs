//! Time integration methods.
//!
//! Single-rate solvers ([`LowStorageRungeKutta`],
//! [`StrongStabilityPreservingRungeKutta`], [`AdditiveRungeKutta`]) own an
//! RHS; multirate composers ([`MultirateInfinitesimalStep`],
//! [`MriGarkExplicit`]) own a slow RHS and a fast solver, which may itself be
//! a composer. All of them implement [`OdeSolver`].

mod ark;
mod integrator;
mod lsrk;
mod mis;
mod mri_gark;
mod ssp_rk;

pub use ark::{AdditiveRungeKutta, ArkScheme, ArkTableau, ImexSplitting};
pub use integrator::{BoxedSolver, OdeSolver, SolverInfo};
pub use lsrk::{LowStorageRungeKutta, LsrkScheme, LsrkTableau};
pub use mis::{MisScheme, MisTableau, MultirateInfinitesimalStep, SubstepPolicy};
pub use mri_gark::{MriGarkExplicit, MriGarkScheme, MriGarkTableau};
pub use ssp_rk::{SspScheme, SspTableau, StrongStabilityPreservingRungeKutta};
