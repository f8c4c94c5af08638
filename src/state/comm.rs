//! Cross-process reductions for distributed state vectors.
//!
//! A domain-decomposed model advances one local slice per process. The only
//! collective operations the integration core needs are sums used by `dot`,
//! `norm` and the finiteness check, and the agreement on wall-clock cadences
//! made by the driver and the callback scheduler.

use std::sync::Arc;

use super::{Precision, StateVector};
use crate::error::OdeError;

/// Collective reduction interface.
pub trait Communicator: Send + Sync {
    /// Rank of this process.
    fn rank(&self) -> usize;

    /// Number of participating processes.
    fn size(&self) -> usize;

    /// Sum `local` over all processes. Blocks until every process arrives.
    fn all_reduce_sum(&self, local: f64) -> f64;

    /// True on every process if `local` is true on any of them.
    fn any(&self, local: bool) -> bool {
        self.all_reduce_sum(if local { 1.0 } else { 0.0 }) > 0.0
    }
}

/// Communicator for a single-process run.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, local: f64) -> f64 {
        local
    }
}

/// A local state slice whose reductions are global.
///
/// Elementwise operations act on the local slice only; `dot` and
/// `is_finite` go through the communicator on every call.
pub struct Distributed<S, C> {
    local: S,
    comm: Arc<C>,
}

impl<S: Clone, C> Clone for Distributed<S, C> {
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            comm: Arc::clone(&self.comm),
        }
    }
}

impl<S: StateVector, C: Communicator> Distributed<S, C> {
    /// Wrap a local slice.
    pub fn new(local: S, comm: Arc<C>) -> Self {
        Self { local, comm }
    }

    /// The local slice.
    pub fn local(&self) -> &S {
        &self.local
    }

    /// Mutable access to the local slice.
    pub fn local_mut(&mut self) -> &mut S {
        &mut self.local
    }

    /// The communicator.
    pub fn comm(&self) -> &C {
        &self.comm
    }
}

impl<S: StateVector, C: Communicator> StateVector for Distributed<S, C> {
    fn len(&self) -> usize {
        self.local.len()
    }

    fn precision(&self) -> Precision {
        self.local.precision()
    }

    fn scale(&mut self, c: f64) {
        self.local.scale(c);
    }

    fn axpy(&mut self, c: f64, other: &Self) {
        self.local.axpy(c, &other.local);
    }

    fn copy_from(&mut self, other: &Self) {
        self.local.copy_from(&other.local);
    }

    fn set_zero(&mut self) {
        self.local.set_zero();
    }

    fn dot(&self, other: &Self) -> f64 {
        self.comm.all_reduce_sum(self.local.dot(&other.local))
    }

    fn is_finite(&self) -> bool {
        !self.comm.any(!self.local.is_finite())
    }

    fn n_processes(&self) -> usize {
        self.comm.size()
    }

    fn to_host(&self) -> Vec<f64> {
        self.local.to_host()
    }

    fn copy_from_host(&mut self, data: &[f64]) -> Result<(), OdeError> {
        self.local.copy_from_host(data)
    }
}
