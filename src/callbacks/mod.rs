//! Callbacks interleaved with stepping.
//!
//! The driver polls a [`CallbackScheduler`] once before the first step (the
//! init pass) and once after every step. Each registered callback carries a
//! [`Trigger`] deciding when it fires: every N steps, or once at least T
//! wall-clock seconds have passed since it last fired.
//!
//! # Example
//! ```
//! use atmos_ode::callbacks::{CallbackAction, CallbackContext, CallbackScheduler, Trigger, callback_fn};
//!
//! let mut scheduler = CallbackScheduler::<Vec<f64>>::new();
//! scheduler
//!     .register(
//!         Trigger::EverySteps(2),
//!         callback_fn(|ctx: &CallbackContext<'_, Vec<f64>>, _init: bool| {
//!             Ok(if ctx.step >= 4 { CallbackAction::Stop } else { CallbackAction::Continue })
//!         }),
//!     )
//!     .unwrap();
//!
//! let q = vec![0.0];
//! let ctx = |step| CallbackContext { step, time: 0.0, wall_time: 0.0, state: &q };
//! scheduler.poll(&ctx(0), true).unwrap();
//! assert_eq!(scheduler.poll(&ctx(2), false).unwrap(), CallbackAction::Continue);
//! assert_eq!(scheduler.poll(&ctx(4), false).unwrap(), CallbackAction::Stop);
//! ```

mod clock;
mod progress;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use progress::{NormHistory, NormMonitor, NormSample, ProgressLogger, format_duration};
pub use scheduler::{CallbackScheduler, Trigger};

use crate::error::BoxError;

/// What the driver should do after a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    /// Keep stepping.
    Continue,
    /// Finish the run after the current poll.
    Stop,
}

/// Snapshot handed to callbacks.
#[derive(Clone, Copy, Debug)]
pub struct CallbackContext<'a, S> {
    /// Steps completed so far (0 during the init pass).
    pub step: u64,
    /// Simulation time.
    pub time: f64,
    /// Wall-clock reading, in seconds, from the driver's clock.
    pub wall_time: f64,
    /// Current state.
    pub state: &'a S,
}

/// A user action fired by the scheduler.
pub trait Callback<S> {
    /// Run the callback. `init` is true only during the init pass.
    ///
    /// # Errors
    ///
    /// Any error aborts the run.
    fn call(&mut self, ctx: &CallbackContext<'_, S>, init: bool) -> Result<CallbackAction, BoxError>;
}

impl<S, C: Callback<S> + ?Sized> Callback<S> for Box<C> {
    fn call(&mut self, ctx: &CallbackContext<'_, S>, init: bool) -> Result<CallbackAction, BoxError> {
        (**self).call(ctx, init)
    }
}

/// Closure adapter returned by [`callback_fn`].
pub struct CallbackFn<F>(F);

/// Wrap a closure `(ctx, init) -> Result<CallbackAction, BoxError>` as a [`Callback`].
pub fn callback_fn<S, F>(f: F) -> CallbackFn<F>
where
    F: FnMut(&CallbackContext<'_, S>, bool) -> Result<CallbackAction, BoxError>,
{
    CallbackFn(f)
}

impl<S, F> Callback<S> for CallbackFn<F>
where
    F: FnMut(&CallbackContext<'_, S>, bool) -> Result<CallbackAction, BoxError>,
{
    fn call(&mut self, ctx: &CallbackContext<'_, S>, init: bool) -> Result<CallbackAction, BoxError> {
        (self.0)(ctx, init)
    }
}
