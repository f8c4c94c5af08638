//! Trigger bookkeeping and firing order.
//!
//! Step triggers depend only on the step counter, which every process shares.
//! Wall triggers and stop requests depend on local readings, so their verdicts
//! are agreed through the scheduler's [`Communicator`] before anything runs.

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use super::{Callback, CallbackAction, CallbackContext};
use crate::error::OdeError;
use crate::state::{Communicator, SingleProcess};

/// When a callback fires.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// After every step whose index is a multiple of N.
    EverySteps(u64),
    /// After a step once at least T wall seconds passed since the last firing.
    EveryWallSeconds(f64),
}

impl Trigger {
    fn validate(self) -> Result<(), OdeError> {
        match self {
            Trigger::EverySteps(0) => Err(OdeError::Config(
                "step trigger interval must be at least 1".into(),
            )),
            Trigger::EveryWallSeconds(t) if !(t > 0.0 && t.is_finite()) => Err(OdeError::Config(
                format!("wall trigger interval must be positive and finite, got {}", t),
            )),
            _ => Ok(()),
        }
    }
}

struct Registration<S> {
    trigger: Trigger,
    /// Wall reading of the last firing (wall triggers only).
    last_fire: f64,
    callback: Box<dyn Callback<S>>,
}

impl<S> Registration<S> {
    /// Collective for wall triggers: fires everywhere once any process is due.
    fn due(&self, ctx: &CallbackContext<'_, S>, comm: &dyn Communicator) -> bool {
        match self.trigger {
            Trigger::EverySteps(n) => ctx.step % n == 0,
            Trigger::EveryWallSeconds(t) => comm.any(ctx.wall_time - self.last_fire >= t),
        }
    }
}

/// Ordered set of callbacks with per-registration trigger state.
///
/// Every process must register the same callbacks with the same triggers in
/// the same order.
pub struct CallbackScheduler<S> {
    entries: Vec<Registration<S>>,
    initialized: bool,
    comm: Arc<dyn Communicator>,
}

impl<S> Default for CallbackScheduler<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> CallbackScheduler<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            initialized: false,
            comm: Arc::new(SingleProcess),
        }
    }

    /// Agree wall triggers and stop requests across the processes of `comm`.
    pub fn with_communicator(mut self, comm: Arc<dyn Communicator>) -> Self {
        self.comm = comm;
        self
    }

    pub(crate) fn set_communicator(&mut self, comm: Arc<dyn Communicator>) {
        self.comm = comm;
    }

    /// Add a callback. Callbacks fire in registration order.
    ///
    /// # Errors
    ///
    /// [`OdeError::Config`] for a zero step interval or a non-positive wall
    /// interval.
    pub fn register<C>(&mut self, trigger: Trigger, callback: C) -> Result<(), OdeError>
    where
        C: Callback<S> + 'static,
    {
        trigger.validate()?;
        self.entries.push(Registration {
            trigger,
            last_fire: 0.0,
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the init pass has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Allow another init pass (used when restarting a run).
    pub fn reset(&mut self) {
        self.initialized = false;
    }

    /// Run every due callback, in registration order.
    ///
    /// With `init` set, every callback fires and wall triggers start timing
    /// from `ctx.wall_time`. A `Stop` from any callback, on any process, is
    /// reported only after all due callbacks ran.
    ///
    /// # Errors
    ///
    /// [`OdeError::Config`] for a second init pass or a step poll before the
    /// init pass; [`OdeError::Callback`] when a callback fails.
    pub fn poll(
        &mut self,
        ctx: &CallbackContext<'_, S>,
        init: bool,
    ) -> Result<CallbackAction, OdeError> {
        if init {
            if self.initialized {
                return Err(OdeError::Config(
                    "callback init pass already ran; reset the scheduler first".into(),
                ));
            }
            self.initialized = true;
        } else if !self.initialized {
            return Err(OdeError::Config(
                "callbacks polled before the init pass".into(),
            ));
        }

        let comm = &*self.comm;
        let mut stop = false;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if !init && !entry.due(ctx, comm) {
                continue;
            }
            if let Trigger::EveryWallSeconds(_) = entry.trigger {
                entry.last_fire = ctx.wall_time;
            }
            let result = entry
                .callback
                .call(ctx, init)
                .map_err(|source| OdeError::Callback {
                    step: ctx.step,
                    source,
                })?;
            if result == CallbackAction::Stop {
                debug!("callback {} requested stop at step {}", index, ctx.step);
                stop = true;
            }
        }
        Ok(if comm.any(stop) {
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::callbacks::callback_fn;

    type Log = Rc<RefCell<Vec<(u64, bool)>>>;

    fn recorder(log: &Log) -> impl Callback<Vec<f64>> + 'static {
        let log = Rc::clone(log);
        callback_fn(move |ctx: &CallbackContext<'_, Vec<f64>>, init: bool| {
            log.borrow_mut().push((ctx.step, init));
            Ok(CallbackAction::Continue)
        })
    }

    fn ctx(q: &Vec<f64>, step: u64, wall_time: f64) -> CallbackContext<'_, Vec<f64>> {
        CallbackContext {
            step,
            time: step as f64,
            wall_time,
            state: q,
        }
    }

    #[test]
    fn test_step_cadence() {
        let q = vec![0.0];
        let log: Log = Rc::default();
        let mut scheduler = CallbackScheduler::new();
        scheduler.register(Trigger::EverySteps(3), recorder(&log)).unwrap();

        scheduler.poll(&ctx(&q, 0, 0.0), true).unwrap();
        for step in 1..=10 {
            scheduler.poll(&ctx(&q, step, 0.0), false).unwrap();
        }
        assert_eq!(
            *log.borrow(),
            vec![(0, true), (3, false), (6, false), (9, false)]
        );
    }

    #[test]
    fn test_wall_cadence() {
        let q = vec![0.0];
        let log: Log = Rc::default();
        let mut scheduler = CallbackScheduler::new();
        scheduler
            .register(Trigger::EveryWallSeconds(5.0), recorder(&log))
            .unwrap();

        scheduler.poll(&ctx(&q, 0, 100.0), true).unwrap();
        // Wall readings after each step.
        for (step, wall) in [(1, 102.0), (2, 104.9), (3, 105.0), (4, 108.0), (5, 110.5)] {
            scheduler.poll(&ctx(&q, step, wall), false).unwrap();
        }
        assert_eq!(*log.borrow(), vec![(0, true), (3, false), (5, false)]);
    }

    #[test]
    fn test_stop_after_all_callbacks() {
        let q = vec![0.0];
        let log: Log = Rc::default();
        let mut scheduler = CallbackScheduler::new();
        scheduler
            .register(
                Trigger::EverySteps(1),
                callback_fn(|_ctx: &CallbackContext<'_, Vec<f64>>, init: bool| {
                    Ok(if init {
                        CallbackAction::Continue
                    } else {
                        CallbackAction::Stop
                    })
                }),
            )
            .unwrap();
        scheduler.register(Trigger::EverySteps(1), recorder(&log)).unwrap();

        scheduler.poll(&ctx(&q, 0, 0.0), true).unwrap();
        let action = scheduler.poll(&ctx(&q, 1, 0.0), false).unwrap();
        assert_eq!(action, CallbackAction::Stop);
        assert_eq!(*log.borrow(), vec![(0, true), (1, false)]);
    }

    #[test]
    fn test_init_runs_once() {
        let q = vec![0.0];
        let mut scheduler = CallbackScheduler::<Vec<f64>>::new();
        scheduler.poll(&ctx(&q, 0, 0.0), true).unwrap();
        let err = scheduler.poll(&ctx(&q, 0, 0.0), true).unwrap_err();
        assert!(matches!(err, OdeError::Config(_)));

        scheduler.reset();
        assert!(scheduler.poll(&ctx(&q, 0, 0.0), true).is_ok());
    }

    #[test]
    fn test_poll_before_init_rejected() {
        let q = vec![0.0];
        let mut scheduler = CallbackScheduler::<Vec<f64>>::new();
        assert!(scheduler.poll(&ctx(&q, 1, 0.0), false).is_err());
    }

    #[test]
    fn test_invalid_triggers_rejected() {
        let log: Log = Rc::default();
        let mut scheduler = CallbackScheduler::new();
        assert!(scheduler.register(Trigger::EverySteps(0), recorder(&log)).is_err());
        assert!(
            scheduler
                .register(Trigger::EveryWallSeconds(0.0), recorder(&log))
                .is_err()
        );
        assert!(
            scheduler
                .register(Trigger::EveryWallSeconds(f64::NAN), recorder(&log))
                .is_err()
        );
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_callback_error_carries_step() {
        let q = vec![0.0];
        let mut scheduler = CallbackScheduler::new();
        scheduler
            .register(
                Trigger::EverySteps(2),
                callback_fn(|_ctx: &CallbackContext<'_, Vec<f64>>, init: bool| {
                    if init {
                        Ok(CallbackAction::Continue)
                    } else {
                        Err("disk full".into())
                    }
                }),
            )
            .unwrap();
        scheduler.poll(&ctx(&q, 0, 0.0), true).unwrap();
        scheduler.poll(&ctx(&q, 1, 0.0), false).unwrap();
        let err = scheduler.poll(&ctx(&q, 2, 0.0), false).unwrap_err();
        assert!(matches!(err, OdeError::Callback { step: 2, .. }));
    }

    /// A second process that is always past its wall intervals and always
    /// asks to stop.
    struct EagerPeer;

    impl Communicator for EagerPeer {
        fn rank(&self) -> usize {
            0
        }

        fn size(&self) -> usize {
            2
        }

        fn all_reduce_sum(&self, local: f64) -> f64 {
            local + 1.0
        }
    }

    #[test]
    fn test_peer_verdicts_are_shared() {
        let q = vec![0.0];
        let log: Log = Rc::default();
        let mut scheduler = CallbackScheduler::new().with_communicator(Arc::new(EagerPeer));
        scheduler
            .register(Trigger::EveryWallSeconds(5.0), recorder(&log))
            .unwrap();
        scheduler.register(Trigger::EverySteps(4), recorder(&log)).unwrap();

        let action = scheduler.poll(&ctx(&q, 0, 0.0), true).unwrap();
        assert_eq!(action, CallbackAction::Stop);
        // The local clock has not moved, the peer's has.
        scheduler.poll(&ctx(&q, 1, 0.1), false).unwrap();
        scheduler.poll(&ctx(&q, 2, 0.2), false).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![(0, true), (0, true), (1, false), (2, false)]
        );
    }
}
