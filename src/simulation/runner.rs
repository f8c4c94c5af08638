//! Simulation runner implementation.
//!
//! Drives one solver from `t0` to `timeend`, polling callbacks after every
//! step and writing checkpoints on the configured cadence.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::callbacks::{
    Callback, CallbackAction, CallbackContext, CallbackScheduler, Clock, SystemClock, Trigger,
    format_duration,
};
use crate::error::OdeError;
use crate::io::{CheckpointRecord, CheckpointStore, RetentionPolicy};
use crate::state::{Communicator, SingleProcess, StateVector};
use crate::time::OdeSolver;

/// Relative tolerance (in units of `dt`) for time comparisons.
const TIME_TOL: f64 = 1e-10;

// =============================================================================
// Configuration
// =============================================================================

/// When and where checkpoints are written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Output directory (created if missing).
    pub directory: PathBuf,
    /// Run name used in file names.
    pub name: String,
    /// Process rank used in file names.
    pub rank: usize,
    /// Write after every N steps.
    pub every_steps: Option<u64>,
    /// Write once at least T wall seconds passed since the last write on any
    /// process.
    pub every_wall_seconds: Option<f64>,
    /// Write after the last step.
    pub at_end: bool,
    /// What happens to older checkpoints.
    pub retention: RetentionPolicy,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("checkpoints"),
            name: "run".to_string(),
            rank: 0,
            every_steps: None,
            every_wall_seconds: None,
            at_end: true,
            retention: RetentionPolicy::default(),
        }
    }
}

impl CheckpointConfig {
    /// Checkpoints named `name` in `directory`, written at the end of the run.
    pub fn new(directory: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            directory: directory.into(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_every_steps(mut self, n: u64) -> Self {
        self.every_steps = Some(n);
        self
    }

    pub fn with_every_wall_seconds(mut self, seconds: f64) -> Self {
        self.every_wall_seconds = Some(seconds);
        self
    }

    pub fn with_at_end(mut self, at_end: bool) -> Self {
        self.at_end = at_end;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    fn validate(&self) -> Result<(), OdeError> {
        if self.name.is_empty() {
            return Err(OdeError::Config("checkpoint name must not be empty".into()));
        }
        if self.every_steps == Some(0) {
            return Err(OdeError::Config(
                "checkpoint step interval must be at least 1".into(),
            ));
        }
        if let Some(t) = self.every_wall_seconds
            && !(t > 0.0 && t.is_finite())
        {
            return Err(OdeError::Config(format!(
                "checkpoint wall interval must be positive and finite, got {}",
                t
            )));
        }
        Ok(())
    }
}

fn default_adjust_final_step() -> bool {
    true
}

/// Configuration for a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Start time.
    pub t0: f64,
    /// End time.
    pub timeend: f64,
    /// Step size.
    pub dt: f64,
    /// Shorten the last step to land on `timeend`. When false, `timeend - t0`
    /// must be a whole number of steps.
    #[serde(default = "default_adjust_final_step")]
    pub adjust_final_step: bool,
    /// Stop once the step counter reaches this value. The counter includes
    /// steps restored from a checkpoint.
    #[serde(default)]
    pub max_steps: Option<u64>,
    /// Checkpoint output.
    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,
}

impl SimulationConfig {
    pub fn new(t0: f64, timeend: f64, dt: f64) -> Self {
        Self {
            t0,
            timeend,
            dt,
            adjust_final_step: true,
            max_steps: None,
            checkpoint: None,
        }
    }

    /// Set the maximum number of steps.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Enable or disable the shortened final step.
    pub fn with_adjust_final_step(mut self, adjust: bool) -> Self {
        self.adjust_final_step = adjust;
        self
    }

    /// Enable checkpointing.
    pub fn with_checkpoint(mut self, checkpoint: CheckpointConfig) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Number of steps from `t0` to `timeend`, counting a shortened final step.
    pub fn n_steps(&self) -> u64 {
        let span = (self.timeend - self.t0) / self.dt;
        (span - TIME_TOL).ceil().max(0.0) as u64
    }

    /// Check the configuration before stepping.
    ///
    /// # Errors
    ///
    /// [`OdeError::Config`] for a non-positive or non-finite `dt`, non-finite
    /// times, `timeend < t0`, a span that is not a whole number of steps when
    /// final-step adjustment is off, or an invalid checkpoint cadence.
    pub fn validate(&self) -> Result<(), OdeError> {
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(OdeError::Config(format!(
                "dt must be positive and finite, got {}",
                self.dt
            )));
        }
        if !(self.t0.is_finite() && self.timeend.is_finite()) {
            return Err(OdeError::Config(format!(
                "start and end times must be finite, got {} and {}",
                self.t0, self.timeend
            )));
        }
        if self.timeend < self.t0 {
            return Err(OdeError::Config(format!(
                "timeend {} is before t0 {}",
                self.timeend, self.t0
            )));
        }
        if !self.adjust_final_step {
            let span = (self.timeend - self.t0) / self.dt;
            if (span - span.round()).abs() > TIME_TOL * span.max(1.0) {
                return Err(OdeError::Config(format!(
                    "timeend - t0 = {} is not a multiple of dt = {} and final-step adjustment is disabled",
                    self.timeend - self.t0,
                    self.dt
                )));
            }
        }
        if let Some(checkpoint) = &self.checkpoint {
            checkpoint.validate()?;
        }
        Ok(())
    }
}

// =============================================================================
// Simulation Result
// =============================================================================

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Reached `timeend`.
    Completed,
    /// A callback returned [`CallbackAction::Stop`].
    StoppedByCallback,
    /// The step counter reached `max_steps`.
    StepLimitReached,
}

/// Result of a simulation run.
#[derive(Clone, Debug)]
pub struct SimulationResult {
    /// Why the run ended.
    pub status: RunStatus,
    /// Steps taken by this call.
    pub steps: u64,
    /// Step counter at the end (includes restored steps).
    pub total_steps: u64,
    /// Final simulation time reached.
    pub final_time: f64,
    /// Size of the last step taken (0 if none).
    pub last_dt: f64,
    /// State norm before the first step.
    pub norm_before: f64,
    /// State norm after the last step.
    pub norm_after: f64,
    /// Total wall-clock time in seconds.
    pub wall_time: f64,
}

impl SimulationResult {
    /// Whether the run reached `timeend`.
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Lifecycle of a [`Simulation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Running,
    Finished,
}

// =============================================================================
// Simulation Runner
// =============================================================================

/// Stepping driver.
///
/// # Type Parameters
///
/// * `S` - State type (must implement [`StateVector`])
/// * `I` - Solver (must implement [`OdeSolver<S>`])
pub struct Simulation<S, I> {
    solver: I,
    config: SimulationConfig,
    callbacks: CallbackScheduler<S>,
    clock: Box<dyn Clock>,
    comm: Arc<dyn Communicator>,
    checkpoints: Option<CheckpointStore>,
    aux: Option<S>,
    phase: Phase,
    step: u64,
}

impl<S, I> Simulation<S, I>
where
    S: StateVector,
    I: OdeSolver<S>,
{
    /// Create a driver. The solver's clock is reset to `config.t0` and its
    /// step size to `config.dt`.
    ///
    /// # Errors
    ///
    /// [`OdeError::Config`] for an invalid configuration,
    /// [`OdeError::Nesting`] if `config.dt` does not fit the solver's nested
    /// fast solvers, or a checkpoint error if the checkpoint directory cannot
    /// be created.
    pub fn new(mut solver: I, config: SimulationConfig) -> Result<Self, OdeError> {
        config.validate()?;
        solver.check_dt(config.dt)?;
        let checkpoints = match &config.checkpoint {
            Some(cfg) => Some(CheckpointStore::new(
                &cfg.directory,
                &cfg.name,
                cfg.rank,
                cfg.retention,
            )?),
            None => None,
        };
        solver.set_dt(config.dt);
        solver.set_time(config.t0);
        solver.set_steps(0);
        Ok(Self {
            solver,
            config,
            callbacks: CallbackScheduler::new(),
            clock: Box::new(SystemClock::new()),
            comm: Arc::new(SingleProcess),
            checkpoints,
            aux: None,
            phase: Phase::NotStarted,
            step: 0,
        })
    }

    /// Use `clock` for wall-time triggers and timing.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Agree wall-clock cadences and stop requests across the processes of
    /// `comm`, so that every process checkpoints and fires callbacks at the
    /// same steps.
    pub fn with_communicator(mut self, comm: Arc<dyn Communicator>) -> Self {
        self.callbacks.set_communicator(Arc::clone(&comm));
        self.comm = comm;
        self
    }

    /// Carry an auxiliary state in checkpoints.
    pub fn with_aux(mut self, aux: S) -> Self {
        self.aux = Some(aux);
        self
    }

    /// Register a callback.
    ///
    /// # Errors
    ///
    /// [`OdeError::Config`] for an invalid trigger.
    pub fn register<C>(&mut self, trigger: Trigger, callback: C) -> Result<(), OdeError>
    where
        C: Callback<S> + 'static,
    {
        self.callbacks.register(trigger, callback)
    }

    /// Get a reference to the solver.
    pub fn solver(&self) -> &I {
        &self.solver
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Steps completed, including restored ones.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.solver.time()
    }

    pub fn aux(&self) -> Option<&S> {
        self.aux.as_ref()
    }

    /// The checkpoint store, if checkpointing is configured.
    pub fn checkpoints(&self) -> Option<&CheckpointStore> {
        self.checkpoints.as_ref()
    }

    /// Continue from `record`: restores `q` (and aux), the time and the step
    /// counter. Wall-time triggers restart from the init pass of the next
    /// [`solve`](Self::solve).
    ///
    /// # Errors
    ///
    /// [`OdeError::Config`] if the run already started or the record lies
    /// past `timeend`; a checkpoint mismatch if the record does not fit `q`.
    pub fn resume_from(&mut self, record: &CheckpointRecord, q: &mut S) -> Result<(), OdeError> {
        if self.phase != Phase::NotStarted {
            return Err(OdeError::Config(
                "cannot resume a simulation that already started".into(),
            ));
        }
        if record.time > self.config.timeend + TIME_TOL * self.config.dt {
            return Err(OdeError::Config(format!(
                "checkpoint time {} is past timeend {}",
                record.time, self.config.timeend
            )));
        }
        record.restore_into(q, self.aux.as_mut())?;
        self.solver.set_time(record.time);
        self.solver.set_steps(record.step);
        self.step = record.step;
        info!(
            "resumed '{}' rank {} at step {} (t = {:.6})",
            record.name, record.rank, record.step, record.time
        );
        Ok(())
    }

    /// Continue from the newest checkpoint in the configured store.
    ///
    /// # Errors
    ///
    /// [`OdeError::Config`] without a checkpoint configuration; otherwise as
    /// [`resume_from`](Self::resume_from) or a missing checkpoint.
    pub fn resume_latest(&mut self, q: &mut S) -> Result<u64, OdeError> {
        let record = match &self.checkpoints {
            Some(store) => store.latest()?,
            None => {
                return Err(OdeError::Config(
                    "no checkpoint directory configured".into(),
                ));
            }
        };
        self.resume_from(&record, q)?;
        Ok(record.step)
    }

    /// Run the simulation to `timeend`.
    ///
    /// # Arguments
    /// * `q` - Solution state (modified in place)
    ///
    /// # Errors
    ///
    /// [`OdeError::Config`] when called on a finished run;
    /// [`OdeError::StepFailed`], [`OdeError::NonFinite`],
    /// [`OdeError::Callback`] and checkpoint errors abort the run.
    pub fn solve(&mut self, q: &mut S) -> Result<SimulationResult, OdeError> {
        if self.phase != Phase::NotStarted {
            return Err(OdeError::Config(
                "simulation already ran; build a new one to continue".into(),
            ));
        }
        self.phase = Phase::Running;

        info!(
            "starting {} (order {}, {} stages): t = {} -> {}, dt = {}",
            self.solver.name(),
            self.solver.order(),
            self.solver.n_stages(),
            self.solver.time(),
            self.config.timeend,
            self.config.dt
        );

        let outcome = self.run(q);
        self.phase = Phase::Finished;

        match outcome {
            Ok(result) => {
                info!(
                    "run {:?}: {} steps (total {}), t = {:.6}, |Q| {:.6e} -> {:.6e}, wall {}",
                    result.status,
                    result.steps,
                    result.total_steps,
                    result.final_time,
                    result.norm_before,
                    result.norm_after,
                    format_duration(result.wall_time)
                );
                Ok(result)
            }
            Err(err) => {
                error!("run aborted: {}", err);
                Err(err)
            }
        }
    }

    fn run(&mut self, q: &mut S) -> Result<SimulationResult, OdeError> {
        let wall_start = self.clock.now();
        let norm_before = q.norm();
        let dt = self.config.dt;
        let timeend = self.config.timeend;
        let tol = TIME_TOL * dt;

        let mut steps = 0;
        let mut last_dt = 0.0;
        let mut last_checkpoint_wall = wall_start;
        let mut last_checkpoint_step = None;

        self.callbacks.reset();
        let mut status = match self.poll(q, true)? {
            CallbackAction::Stop => RunStatus::StoppedByCallback,
            CallbackAction::Continue => RunStatus::Completed,
        };

        while status == RunStatus::Completed {
            let t = self.solver.time();
            let remaining = timeend - t;
            if remaining <= tol {
                break;
            }
            if let Some(max_steps) = self.config.max_steps
                && self.step >= max_steps
            {
                status = RunStatus::StepLimitReached;
                break;
            }

            let step_dt = if remaining < dt - tol { remaining } else { dt };
            let t_new = self
                .solver
                .step(q, Some(step_dt), None)
                .map_err(|source| OdeError::StepFailed {
                    step: self.step + 1,
                    time: t,
                    source: Box::new(source),
                })?;
            if (timeend - t_new).abs() <= tol {
                self.solver.set_time(timeend);
            }
            self.step += 1;
            steps += 1;
            last_dt = step_dt;
            debug!("step {}: t = {:.6}, dt = {:.3e}", self.step, self.solver.time(), step_dt);

            if !q.is_finite() {
                return Err(OdeError::NonFinite {
                    step: self.step,
                    time: self.solver.time(),
                });
            }

            let action = self.poll(q, false)?;

            if self.checkpoint_due(&mut last_checkpoint_wall) {
                self.write_checkpoint(q)?;
                last_checkpoint_step = Some(self.step);
            }

            if action == CallbackAction::Stop {
                status = RunStatus::StoppedByCallback;
            }
        }

        let at_end = self.config.checkpoint.as_ref().is_some_and(|c| c.at_end);
        if at_end && last_checkpoint_step != Some(self.step) {
            self.write_checkpoint(q)?;
        }

        Ok(SimulationResult {
            status,
            steps,
            total_steps: self.step,
            final_time: self.solver.time(),
            last_dt,
            norm_before,
            norm_after: q.norm(),
            wall_time: self.clock.now() - wall_start,
        })
    }

    fn poll(&mut self, q: &S, init: bool) -> Result<CallbackAction, OdeError> {
        let ctx = CallbackContext {
            step: self.step,
            time: self.solver.time(),
            wall_time: self.clock.now(),
            state: q,
        };
        self.callbacks.poll(&ctx, init)
    }

    fn checkpoint_due(&self, last_wall: &mut f64) -> bool {
        let Some(cfg) = &self.config.checkpoint else {
            return false;
        };
        let by_steps = cfg.every_steps.is_some_and(|n| self.step % n == 0);
        let now = self.clock.now();
        let by_wall = cfg
            .every_wall_seconds
            .is_some_and(|seconds| self.comm.any(now - *last_wall >= seconds));
        if by_steps || by_wall {
            *last_wall = now;
            true
        } else {
            false
        }
    }

    fn write_checkpoint(&self, q: &S) -> Result<(), OdeError> {
        if let Some(store) = &self.checkpoints {
            let record = CheckpointRecord::capture(
                store.name(),
                store.rank(),
                self.step,
                self.solver.time(),
                q,
                self.aux.as_ref(),
            );
            store.write(&record)?;
        }
        Ok(())
    }
}
