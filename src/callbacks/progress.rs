//! Stock callbacks: progress logging and state-norm monitoring.

use std::cell::RefCell;
use std::rc::Rc;

use log::{info, warn};

use super::{Callback, CallbackAction, CallbackContext};
use crate::error::BoxError;
use crate::state::StateVector;

// =============================================================================
// Progress
// =============================================================================

/// Logs percentage complete, elapsed wall time, ETA and step rate.
///
/// Fire it every step; it only logs when another `report_interval_pct`
/// percent of the run has elapsed.
pub struct ProgressLogger {
    t0: f64,
    timeend: f64,
    report_interval_pct: u32,
    last_reported_pct: u32,
    /// Wall reading and step count at the init pass.
    start: Option<(f64, u64)>,
}

impl ProgressLogger {
    /// # Arguments
    /// * `t0` - Simulation start time
    /// * `timeend` - Simulation end time
    /// * `report_interval_pct` - Report every N percent (e.g., 10 for 10%, 20%, ...)
    pub fn new(t0: f64, timeend: f64, report_interval_pct: u32) -> Self {
        Self {
            t0,
            timeend,
            report_interval_pct: report_interval_pct.max(1),
            last_reported_pct: 0,
            start: None,
        }
    }

    fn percent(&self, time: f64) -> f64 {
        let span = self.timeend - self.t0;
        if span > 0.0 {
            ((time - self.t0) / span * 100.0).clamp(0.0, 100.0)
        } else {
            100.0
        }
    }
}

impl<S> Callback<S> for ProgressLogger {
    fn call(&mut self, ctx: &CallbackContext<'_, S>, init: bool) -> Result<CallbackAction, BoxError> {
        if init {
            self.start = Some((ctx.wall_time, ctx.step));
            self.last_reported_pct = (self.percent(ctx.time) as u32 / self.report_interval_pct)
                * self.report_interval_pct;
            info!(
                "run starting at t = {:.4}, step {}, end time {:.4}",
                ctx.time, ctx.step, self.timeend
            );
            return Ok(CallbackAction::Continue);
        }

        let pct = self.percent(ctx.time);
        let threshold = self.last_reported_pct + self.report_interval_pct;
        let whole = pct as u32;
        if whole < threshold && !(whole == 100 && self.last_reported_pct < 100) {
            return Ok(CallbackAction::Continue);
        }
        self.last_reported_pct = (whole / self.report_interval_pct) * self.report_interval_pct;

        let (wall0, step0) = self.start.unwrap_or((ctx.wall_time, ctx.step));
        let elapsed = ctx.wall_time - wall0;
        let eta = if pct > 0.1 {
            format_duration(elapsed * 100.0 / pct - elapsed)
        } else {
            "calculating...".to_string()
        };
        let steps_per_sec = if elapsed > 0.0 {
            (ctx.step - step0) as f64 / elapsed
        } else {
            0.0
        };

        info!(
            "[{:>5.1}%] t={:.4} step={} | elapsed={} | ETA={} | {:.0} steps/s",
            pct,
            ctx.time,
            ctx.step,
            format_duration(elapsed),
            eta,
            steps_per_sec
        );
        Ok(CallbackAction::Continue)
    }
}

/// Format duration in human-readable form.
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let s = secs - mins * 60.0;
        format!("{:.0}m{:.0}s", mins, s)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs - hours * 3600.0) / 60.0).floor();
        format!("{:.0}h{:.0}m", hours, mins)
    }
}

// =============================================================================
// Norm monitor
// =============================================================================

/// One recorded norm.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormSample {
    pub step: u64,
    pub time: f64,
    pub norm: f64,
}

/// Shared view of a [`NormMonitor`]'s samples, readable after the monitor
/// has been handed to a scheduler.
#[derive(Clone, Debug, Default)]
pub struct NormHistory(Rc<RefCell<Vec<NormSample>>>);

impl NormHistory {
    /// Copy of the samples recorded so far.
    pub fn samples(&self) -> Vec<NormSample> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// Records the global state norm and optionally stops the run when it
/// exceeds a limit.
///
/// The norm is a collective reduction, so every process must register the
/// monitor with the same trigger.
#[derive(Default)]
pub struct NormMonitor {
    history: NormHistory,
    limit: Option<f64>,
}

impl NormMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop once the norm exceeds `limit`.
    pub fn with_limit(mut self, limit: f64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Handle to the recorded samples.
    pub fn history(&self) -> NormHistory {
        self.history.clone()
    }
}

impl<S: StateVector> Callback<S> for NormMonitor {
    fn call(&mut self, ctx: &CallbackContext<'_, S>, _init: bool) -> Result<CallbackAction, BoxError> {
        let norm = ctx.state.norm();
        self.history.0.borrow_mut().push(NormSample {
            step: ctx.step,
            time: ctx.time,
            norm,
        });

        match self.limit {
            Some(limit) if !(norm <= limit) => {
                warn!(
                    "state norm {:.6e} exceeds limit {:.6e} at step {} (t = {:.4})",
                    norm, limit, ctx.step, ctx.time
                );
                Ok(CallbackAction::Stop)
            }
            _ => Ok(CallbackAction::Continue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(q: &Vec<f64>, step: u64, time: f64) -> CallbackContext<'_, Vec<f64>> {
        CallbackContext {
            step,
            time,
            wall_time: step as f64,
            state: q,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30.0s");
        assert_eq!(format_duration(90.0), "1m30s");
        assert_eq!(format_duration(3700.0), "1h1m");
    }

    #[test]
    fn test_progress_logger_continues() {
        let q = vec![1.0];
        let mut logger = ProgressLogger::new(0.0, 10.0, 10);
        assert_eq!(logger.call(&ctx(&q, 0, 0.0), true).unwrap(), CallbackAction::Continue);
        for step in 1..=10 {
            let action = logger.call(&ctx(&q, step, step as f64), false).unwrap();
            assert_eq!(action, CallbackAction::Continue);
        }
        assert_eq!(logger.last_reported_pct, 100);
    }

    #[test]
    fn test_norm_monitor_records_and_stops() {
        let mut monitor = NormMonitor::new().with_limit(4.0);
        let history = monitor.history();

        let small = vec![3.0, 0.0];
        let large = vec![3.0, 4.0];
        assert_eq!(monitor.call(&ctx(&small, 0, 0.0), true).unwrap(), CallbackAction::Continue);
        assert_eq!(monitor.call(&ctx(&large, 1, 0.5), false).unwrap(), CallbackAction::Stop);

        let samples = history.samples();
        assert_eq!(samples.len(), 2);
        assert!((samples[1].norm - 5.0).abs() < 1e-14);
        assert_eq!(samples[1].step, 1);
    }

    #[test]
    fn test_norm_monitor_stops_on_nan() {
        let mut monitor = NormMonitor::new().with_limit(1e3);
        let q = vec![f64::NAN];
        assert_eq!(monitor.call(&ctx(&q, 3, 0.3), false).unwrap(), CallbackAction::Stop);
    }
}
