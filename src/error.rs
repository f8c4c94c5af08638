//! Error types for time integration and run control.
//!
//! All failures in the integration core surface as [`OdeError`]. Nothing is
//! retried or swallowed: an RHS failure, a linear solve that does not
//! converge, or a non-finite state is reported to the caller with the time
//! (and, from the driver, the step) at which it happened.

use thiserror::Error;

use crate::io::CheckpointError;

/// Boxed error returned by user-supplied RHS evaluations and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for the integration core.
#[derive(Debug, Error)]
pub enum OdeError {
    /// Invalid run or solver configuration, detected before stepping.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Incompatible nesting of a fast solver inside a multirate composer.
    #[error("invalid multirate nesting: {0}")]
    Nesting(String),

    /// A right-hand side evaluation signaled an error.
    #[error("RHS evaluation failed at t = {time}: {source}")]
    Rhs {
        /// Stage time at which the evaluation was requested.
        time: f64,
        /// Error raised by the RHS.
        #[source]
        source: BoxError,
    },

    /// An implicit stage's linear solve did not converge.
    #[error("linear solver did not converge after {iterations} iterations (residual {residual:.3e})")]
    LinearSolver {
        /// Iterations performed before giving up.
        iterations: usize,
        /// Final residual norm.
        residual: f64,
    },

    /// The state contains NaN or infinite values after a step.
    #[error("non-finite state after step {step} at t = {time}")]
    NonFinite {
        /// Step index that produced the non-finite state.
        step: u64,
        /// Simulation time after that step.
        time: f64,
    },

    /// A buffer does not have the length the solver was built for.
    #[error("state length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Length fixed at construction.
        expected: usize,
        /// Length that was passed in.
        actual: usize,
    },

    /// A step failed inside the driver loop.
    #[error("step {step} failed at t = {time}: {source}")]
    StepFailed {
        /// Index the failed step would have had.
        step: u64,
        /// Time at the start of the failed step.
        time: f64,
        /// Underlying integrator error.
        #[source]
        source: Box<OdeError>,
    },

    /// A callback returned an error.
    #[error("callback failed at step {step}: {source}")]
    Callback {
        /// Step at which the callback was polled.
        step: u64,
        /// Error raised by the callback.
        #[source]
        source: BoxError,
    },

    /// Checkpoint read or write failure.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl OdeError {
    pub(crate) fn rhs(time: f64, source: BoxError) -> Self {
        Self::Rhs { time, source }
    }

    /// Checks that `actual` matches the length a solver was built for.
    pub(crate) fn check_len(expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::LengthMismatch { expected, actual })
        }
    }
}
