//! Right-hand side contract.
//!
//! An RHS computes a tendency `dQ = f(Q, t)`. With `increment = false` the
//! result overwrites `dq`; with `increment = true` it is added to whatever
//! `dq` already holds. Low-storage schemes and multirate forcing both rely
//! on the accumulating form, so an implementation must never overwrite
//! `dq` when asked to increment.
//!
//! Model parameters are captured by the RHS value itself.

use std::sync::Arc;

use crate::error::BoxError;
use crate::state::StateVector;

// =============================================================================
// Rhs Trait
// =============================================================================

/// A tendency operator `f(Q, t)`.
///
/// # Example
/// ```
/// use atmos_ode::rhs::{Rhs, rhs_fn};
///
/// // dq/dt = -q
/// let decay = rhs_fn(|dq: &mut Vec<f64>, q: &Vec<f64>, _t: f64, increment: bool| {
///     for (d, v) in dq.iter_mut().zip(q) {
///         if increment { *d -= v } else { *d = -v }
///     }
///     Ok(())
/// });
///
/// let mut dq = vec![0.0; 2];
/// decay.eval(&mut dq, &vec![1.0, 2.0], 0.0, false).unwrap();
/// assert_eq!(dq, vec![-1.0, -2.0]);
/// ```
pub trait Rhs<S> {
    /// Evaluate the tendency at `q` and time `t` into `dq`.
    ///
    /// # Errors
    ///
    /// Any error signaled here fails the enclosing step.
    fn eval(&self, dq: &mut S, q: &S, t: f64, increment: bool) -> Result<(), BoxError>;
}

impl<S, R: Rhs<S> + ?Sized> Rhs<S> for &R {
    fn eval(&self, dq: &mut S, q: &S, t: f64, increment: bool) -> Result<(), BoxError> {
        (**self).eval(dq, q, t, increment)
    }
}

impl<S, R: Rhs<S> + ?Sized> Rhs<S> for Box<R> {
    fn eval(&self, dq: &mut S, q: &S, t: f64, increment: bool) -> Result<(), BoxError> {
        (**self).eval(dq, q, t, increment)
    }
}

impl<S, R: Rhs<S> + ?Sized> Rhs<S> for Arc<R> {
    fn eval(&self, dq: &mut S, q: &S, t: f64, increment: bool) -> Result<(), BoxError> {
        (**self).eval(dq, q, t, increment)
    }
}

/// Closure adapter returned by [`rhs_fn`].
#[derive(Clone, Copy, Debug)]
pub struct RhsFn<F>(F);

/// Wrap a closure `(dq, q, t, increment) -> Result<(), BoxError>` as an [`Rhs`].
pub fn rhs_fn<S, F>(f: F) -> RhsFn<F>
where
    F: Fn(&mut S, &S, f64, bool) -> Result<(), BoxError>,
{
    RhsFn(f)
}

impl<S, F> Rhs<S> for RhsFn<F>
where
    F: Fn(&mut S, &S, f64, bool) -> Result<(), BoxError>,
{
    fn eval(&self, dq: &mut S, q: &S, t: f64, increment: bool) -> Result<(), BoxError> {
        (self.0)(dq, q, t, increment)
    }
}

// =============================================================================
// Composition
// =============================================================================

/// Additive composition `f = a + b`.
///
/// `a` honours the caller's `increment` flag; `b` always accumulates on top.
#[derive(Clone, Debug)]
pub struct SumRhs<A, B> {
    a: A,
    b: B,
}

impl<A, B> SumRhs<A, B> {
    /// Compose two operators.
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

impl<S, A: Rhs<S>, B: Rhs<S>> Rhs<S> for SumRhs<A, B> {
    fn eval(&self, dq: &mut S, q: &S, t: f64, increment: bool) -> Result<(), BoxError> {
        self.a.eval(dq, q, t, increment)?;
        self.b.eval(dq, q, t, true)
    }
}

// =============================================================================
// Forcing
// =============================================================================

/// An additive tendency a parent integrator injects into a child's stages.
///
/// Multirate composers hand their fast solver a forcing built from slow
/// tendencies; the fast solver adds it to every stage tendency it computes.
pub trait Forcing<S> {
    /// Add the forcing at time `t` to `dq`.
    fn add_to(&self, dq: &mut S, t: f64);
}

/// A time-independent forcing `dq += v`.
#[derive(Clone, Copy, Debug)]
pub struct ConstantForcing<'a, S>(pub &'a S);

impl<S: StateVector> Forcing<S> for ConstantForcing<'_, S> {
    fn add_to(&self, dq: &mut S, _t: f64) {
        dq.axpy(1.0, self.0);
    }
}

/// Evaluate `rhs` and then add an optional parent forcing at the same time.
pub(crate) fn eval_forced<S, R: Rhs<S>>(
    rhs: &R,
    dq: &mut S,
    q: &S,
    t: f64,
    increment: bool,
    forcing: Option<&dyn Forcing<S>>,
) -> Result<(), crate::error::OdeError> {
    rhs.eval(dq, q, t, increment)
        .map_err(|source| crate::error::OdeError::rhs(t, source))?;
    if let Some(forcing) = forcing {
        forcing.add_to(dq, t);
    }
    Ok(())
}
