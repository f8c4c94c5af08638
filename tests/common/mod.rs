//! Manufactured problems shared by the integration tests.

#![allow(dead_code)]

use atmos_ode::{BoxError, Rhs};

/// Relaxation towards `sin t`, split as `y' = -k (y - sin t) + w cos t`.
///
/// A fast part with `(a, 1.0)` plus a slow part with `(b, 0.0)` sums to
/// `y' = -(a + b)(y - sin t) + cos t`, whose solution from `y(0) = 1` is
/// [`relax_exact`].
#[derive(Clone, Copy)]
pub struct Relax {
    pub k: f64,
    pub w: f64,
}

impl Rhs<Vec<f64>> for Relax {
    fn eval(&self, dq: &mut Vec<f64>, q: &Vec<f64>, t: f64, increment: bool) -> Result<(), BoxError> {
        for (d, y) in dq.iter_mut().zip(q) {
            let f = -self.k * (y - t.sin()) + self.w * t.cos();
            if increment { *d += f } else { *d = f }
        }
        Ok(())
    }
}

/// Exact solution of the summed relaxation problem with rate `k`.
pub fn relax_exact(k: f64, t: f64) -> f64 {
    t.sin() + (-k * t).exp()
}

/// Eigenvalues of the three-rate linear system, fastest first.
pub const LAMBDA: [f64; 3] = [-100.0, -10.0, -1.0];

/// One rate of the system `y' = V diag(lambda) V^-1 y` with
/// `V = [[1, 0, 0], [1, 1, 0], [1, 1, 1]]`.
///
/// Level `i` owns `lambda_i v_i w_i^T`, where `v_i` is column `i` of `V` and
/// `w_i` row `i` of `V^-1 = [[1, 0, 0], [-1, 1, 0], [0, -1, 1]]`. The three
/// levels sum to the full operator.
#[derive(Clone, Copy)]
pub struct ThreeRate {
    pub level: usize,
}

impl ThreeRate {
    fn coefficient(&self, q: &[f64]) -> f64 {
        let w = match self.level {
            0 => q[0],
            1 => q[1] - q[0],
            _ => q[2] - q[1],
        };
        LAMBDA[self.level] * w
    }
}

impl Rhs<Vec<f64>> for ThreeRate {
    fn eval(&self, dq: &mut Vec<f64>, q: &Vec<f64>, _t: f64, increment: bool) -> Result<(), BoxError> {
        let c = self.coefficient(q);
        for (i, d) in dq.iter_mut().enumerate() {
            let f = if i >= self.level { c } else { 0.0 };
            if increment { *d += f } else { *d = f }
        }
        Ok(())
    }
}

/// Initial condition of the three-rate system.
pub fn three_rate_initial() -> Vec<f64> {
    vec![1.0, 2.0, 3.0]
}

/// Exact solution of the three-rate system.
pub fn three_rate_exact(t: f64) -> Vec<f64> {
    let e: Vec<f64> = LAMBDA.iter().map(|l| (l * t).exp()).collect();
    vec![e[0], e[0] + e[1], e[0] + e[1] + e[2]]
}

/// Max-norm distance between two states.
pub fn max_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Observed orders between successive halvings.
pub fn observed_orders(errors: &[f64]) -> Vec<f64> {
    errors.windows(2).map(|w| (w[0] / w[1]).log2()).collect()
}

/// Linear damping `y' = -a y`, the implicit part of the IMEX split.
#[derive(Clone, Copy)]
pub struct Damping(pub f64);

impl Rhs<Vec<f64>> for Damping {
    fn eval(&self, dq: &mut Vec<f64>, q: &Vec<f64>, _t: f64, increment: bool) -> Result<(), BoxError> {
        for (d, y) in dq.iter_mut().zip(q) {
            if increment { *d -= self.0 * y } else { *d = -self.0 * y }
        }
        Ok(())
    }
}

/// Explicit remainder pairing with [`Damping`]`(a)` to give the relaxation
/// problem with rate `a + b`.
#[derive(Clone, Copy)]
pub struct RelaxRemainder {
    pub a: f64,
    pub b: f64,
}

impl Rhs<Vec<f64>> for RelaxRemainder {
    fn eval(&self, dq: &mut Vec<f64>, q: &Vec<f64>, t: f64, increment: bool) -> Result<(), BoxError> {
        for (d, y) in dq.iter_mut().zip(q) {
            let f = -self.b * (y - t.sin()) + self.a * t.sin() + t.cos();
            if increment { *d += f } else { *d = f }
        }
        Ok(())
    }
}
