//! # atmos-ode
//!
//! Time integration for atmosphere models whose terms evolve on different
//! time scales.
//!
//! This crate provides:
//! - A state-vector abstraction with optional cross-process reductions
//! - Explicit single-rate integrators (low-storage RK, SSP RK)
//! - IMEX additive RK with GMRES or dense-LU implicit stages
//! - Multirate composers (MIS, explicit MRI-GARK) that nest to any depth
//! - A stepping driver with callbacks, checkpointing and restart
//!
//! ```
//! use atmos_ode::{LowStorageRungeKutta, LsrkTableau, OdeSolver, rhs_fn};
//!
//! let decay = rhs_fn(|dq: &mut Vec<f64>, q: &Vec<f64>, _t: f64, increment: bool| {
//!     for (d, v) in dq.iter_mut().zip(q) {
//!         if increment { *d -= v } else { *d = -v }
//!     }
//!     Ok(())
//! });
//!
//! let mut q = vec![1.0];
//! let mut solver = LowStorageRungeKutta::new(decay, LsrkTableau::carpenter_kennedy_54(), &q, 0.1, 0.0);
//! for _ in 0..10 {
//!     solver.step(&mut q, None, None).unwrap();
//! }
//! assert!((q[0] - (-1.0_f64).exp()).abs() < 1e-6);
//! ```

pub mod callbacks;
pub mod config;
pub mod error;
pub mod io;
pub mod linear;
pub mod rhs;
pub mod simulation;
pub mod state;
pub mod time;

// Re-export main types for convenience
pub use callbacks::{Callback, CallbackAction, CallbackContext, Trigger, callback_fn};
pub use error::{BoxError, OdeError};
pub use io::{CheckpointRecord, CheckpointStore, RetentionPolicy};
pub use rhs::{Forcing, Rhs, rhs_fn};
pub use simulation::{RunStatus, Simulation, SimulationConfig, SimulationResult};
pub use state::{Precision, StateVector};
pub use time::{
    AdditiveRungeKutta, BoxedSolver, LowStorageRungeKutta, LsrkTableau, MriGarkExplicit,
    MultirateInfinitesimalStep, OdeSolver, SolverInfo, StrongStabilityPreservingRungeKutta,
    SubstepPolicy,
};
