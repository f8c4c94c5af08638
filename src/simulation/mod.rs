//! Simulation runner abstraction.
//!
//! [`Simulation`] ties together:
//! - a time integrator (any [`OdeSolver`](crate::time::OdeSolver))
//! - callbacks fired on step or wall-clock cadences
//! - checkpoint output and restart
//!
//! # Example
//! ```
//! use atmos_ode::rhs::rhs_fn;
//! use atmos_ode::simulation::{Simulation, SimulationConfig};
//! use atmos_ode::time::{LowStorageRungeKutta, LsrkTableau};
//!
//! let decay = rhs_fn(|dq: &mut Vec<f64>, q: &Vec<f64>, _t: f64, increment: bool| {
//!     for (d, v) in dq.iter_mut().zip(q) {
//!         if increment { *d -= v } else { *d = -v }
//!     }
//!     Ok(())
//! });
//!
//! let mut q = vec![1.0];
//! let solver = LowStorageRungeKutta::new(decay, LsrkTableau::carpenter_kennedy_54(), &q, 0.1, 0.0);
//! let mut sim = Simulation::new(solver, SimulationConfig::new(0.0, 1.0, 0.1)).unwrap();
//! let result = sim.solve(&mut q).unwrap();
//! assert_eq!(result.steps, 10);
//! ```

mod runner;

pub use runner::{
    CheckpointConfig, Phase, RunStatus, Simulation, SimulationConfig, SimulationResult,
};
