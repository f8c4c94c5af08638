//! State vector abstraction.
//!
//! The integration core never looks inside the model state. It only needs the
//! vector-space operations below, a (possibly cross-process) norm, and a
//! host snapshot for checkpointing.
//!
//! # Example
//! ```
//! use atmos_ode::state::StateVector;
//!
//! let mut u = vec![1.0_f64, 2.0, 3.0];
//! let v = u.clone();
//! u.scale(2.0);      // u = 2.0 * u
//! u.axpy(0.5, &v);   // u = u + 0.5 * v
//! assert_eq!(u, vec![2.5, 5.0, 7.5]);
//! ```

mod comm;

pub use comm::{Communicator, Distributed, SingleProcess};

use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::OdeError;

/// Floating-point precision of a state vector's elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    /// 32-bit elements.
    F32,
    /// 64-bit elements.
    F64,
}

// =============================================================================
// StateVector Trait
// =============================================================================

/// Trait for state types that can be time-integrated.
///
/// Coefficients are always `f64`; implementations with 32-bit storage round
/// on write. The length of a state is fixed at construction and every
/// operation taking a second vector requires equal lengths.
///
/// `dot` and `norm` are global quantities. A distributed implementation
/// reduces them across processes, so every process must call them at the
/// same logical point.
pub trait StateVector: Clone + Send + Sized {
    /// Number of elements.
    fn len(&self) -> usize;

    /// Whether the state has no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element precision.
    fn precision(&self) -> Precision;

    /// Scale the state by a constant: self <- c * self
    fn scale(&mut self, c: f64);

    /// Add a scaled vector: self <- self + c * other
    fn axpy(&mut self, c: f64, other: &Self);

    /// Overwrite with the contents of `other`.
    fn copy_from(&mut self, other: &Self);

    /// Set every element to zero (also clears NaN and infinities).
    fn set_zero(&mut self);

    /// Global inner product.
    fn dot(&self, other: &Self) -> f64;

    /// Whether every element is finite (global).
    fn is_finite(&self) -> bool;

    /// Copy the elements into a host-addressable `f64` buffer.
    fn to_host(&self) -> Vec<f64>;

    /// Overwrite the elements from a host buffer of the same length.
    ///
    /// # Errors
    ///
    /// Returns [`OdeError::LengthMismatch`] if `data` has the wrong length.
    fn copy_from_host(&mut self, data: &[f64]) -> Result<(), OdeError>;

    /// Global Euclidean norm.
    fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Number of processes the state is split across.
    fn n_processes(&self) -> usize {
        1
    }

    /// Create a zero-initialized state with the same shape.
    fn zeros_like(&self) -> Self {
        let mut result = self.clone();
        result.set_zero();
        result
    }
}

// =============================================================================
// Vec Implementations
// =============================================================================

impl StateVector for Vec<f64> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn precision(&self) -> Precision {
        Precision::F64
    }

    #[cfg(not(feature = "parallel"))]
    fn scale(&mut self, c: f64) {
        for v in self.iter_mut() {
            *v *= c;
        }
    }

    #[cfg(feature = "parallel")]
    fn scale(&mut self, c: f64) {
        self.par_iter_mut().for_each(|v| *v *= c);
    }

    #[cfg(not(feature = "parallel"))]
    fn axpy(&mut self, c: f64, other: &Self) {
        assert_eq!(self.as_slice().len(), other.as_slice().len());
        for (a, b) in self.iter_mut().zip(other.iter()) {
            *a += c * *b;
        }
    }

    #[cfg(feature = "parallel")]
    fn axpy(&mut self, c: f64, other: &Self) {
        assert_eq!(self.as_slice().len(), other.as_slice().len());
        self.par_iter_mut()
            .zip(other.par_iter())
            .for_each(|(a, b)| *a += c * *b);
    }

    fn copy_from(&mut self, other: &Self) {
        self.copy_from_slice(other);
    }

    fn set_zero(&mut self) {
        self.fill(0.0);
    }

    // Reductions stay serial so results do not depend on the thread count.
    fn dot(&self, other: &Self) -> f64 {
        assert_eq!(self.as_slice().len(), other.as_slice().len());
        self.iter().zip(other.iter()).map(|(a, b)| a * b).sum()
    }

    fn is_finite(&self) -> bool {
        self.iter().all(|v| v.is_finite())
    }

    fn to_host(&self) -> Vec<f64> {
        self.clone()
    }

    fn copy_from_host(&mut self, data: &[f64]) -> Result<(), OdeError> {
        OdeError::check_len(self.as_slice().len(), data.len())?;
        self.copy_from_slice(data);
        Ok(())
    }
}

impl StateVector for Vec<f32> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn precision(&self) -> Precision {
        Precision::F32
    }

    fn scale(&mut self, c: f64) {
        for v in self.iter_mut() {
            *v = (*v as f64 * c) as f32;
        }
    }

    fn axpy(&mut self, c: f64, other: &Self) {
        assert_eq!(self.as_slice().len(), other.as_slice().len());
        for (a, b) in self.iter_mut().zip(other.iter()) {
            *a = (*a as f64 + c * *b as f64) as f32;
        }
    }

    fn copy_from(&mut self, other: &Self) {
        self.copy_from_slice(other);
    }

    fn set_zero(&mut self) {
        self.fill(0.0);
    }

    fn dot(&self, other: &Self) -> f64 {
        assert_eq!(self.as_slice().len(), other.as_slice().len());
        self.iter()
            .zip(other.iter())
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum()
    }

    fn is_finite(&self) -> bool {
        self.iter().all(|v| v.is_finite())
    }

    fn to_host(&self) -> Vec<f64> {
        self.iter().map(|&v| v as f64).collect()
    }

    fn copy_from_host(&mut self, data: &[f64]) -> Result<(), OdeError> {
        OdeError::check_len(self.as_slice().len(), data.len())?;
        for (a, &b) in self.iter_mut().zip(data) {
            *a = b as f32;
        }
        Ok(())
    }
}
