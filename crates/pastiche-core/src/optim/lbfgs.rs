//! Limited-memory BFGS over a single image tensor.
//!
//! Keeps the last `history_size` curvature pairs `(s, y)` and builds the
//! search direction with the two-loop recursion. Each step runs a
//! backtracking line search that only accepts points satisfying the Armijo
//! condition, so accepted steps never increase the objective.
//!
//! # Algorithm
//!
//! ```text
//! q = g
//! for i = newest..oldest:  a_i = rho_i s_i.q ;  q -= a_i y_i
//! r = (s.y / y.y) q
//! for i = oldest..newest:  b = rho_i y_i.r ;   r += (a_i - b) s_i
//! d = -r
//! ```
//!
//! # Reference
//!
//! Nocedal & Wright, *Numerical Optimization*, Algorithm 7.4.

use crate::error::Result;
use candle_core::Tensor;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Curvature pairs with `y.s` at or below this are skipped.
const CURVATURE_EPS: f64 = 1e-10;

/// Sufficient decrease constant of the Armijo condition.
const ARMIJO_C1: f64 = 1e-4;

/// One stored curvature pair.
#[derive(Debug, Clone)]
struct Pair {
    s: Tensor,
    y: Tensor,
    rho: f64,
}

/// Outcome of one L-BFGS step.
#[derive(Debug, Clone)]
pub enum LineSearch {
    /// A trial point was accepted.
    Accepted {
        /// New point, as returned by the objective.
        point: Tensor,
        /// Objective value at the new point.
        value: f64,
        /// Accepted step length.
        step: f64,
    },
    /// No trial point decreased the objective enough; keep the current point.
    Rejected,
}

/// L-BFGS state.
#[derive(Debug, Clone)]
pub struct Lbfgs {
    lr: f64,
    history_size: usize,
    max_line_search: usize,
    pairs: VecDeque<Pair>,
    /// Point and gradient at the previous call.
    prev: Option<(Tensor, Tensor)>,
}

fn dot(a: &Tensor, b: &Tensor) -> Result<f64> {
    Ok(a.mul(b)?.sum_all()?.to_scalar::<f32>()? as f64)
}

impl Lbfgs {
    /// Optimizer with initial step length `lr`.
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            history_size: 10,
            max_line_search: 20,
            pairs: VecDeque::new(),
            prev: None,
        }
    }

    /// Number of curvature pairs kept.
    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size.max(1);
        self
    }

    /// Step halvings tried before giving up.
    pub fn with_max_line_search(mut self, max_line_search: usize) -> Self {
        self.max_line_search = max_line_search.max(1);
        self
    }

    /// Stored curvature pairs.
    pub fn history_len(&self) -> usize {
        self.pairs.len()
    }

    /// Drop all curvature information.
    pub fn reset(&mut self) {
        self.pairs.clear();
    }

    /// One step from `x` with gradient `grad` and objective value `value`.
    ///
    /// `objective` maps a trial point to the point actually used (for
    /// instance a clamped copy) and its objective value. Non-finite values
    /// reject the trial.
    pub fn step<F>(
        &mut self,
        x: &Tensor,
        grad: &Tensor,
        value: f64,
        mut objective: F,
    ) -> Result<LineSearch>
    where
        F: FnMut(&Tensor) -> Result<(Tensor, f64)>,
    {
        let dims = x.dims().to_vec();
        // Owned copy: callers may update `x` in place after the step.
        let x = x.detach().flatten_all()?.copy()?;
        let g = grad.detach().flatten_all()?;

        if let Some((x_prev, g_prev)) = self.prev.take() {
            self.push_pair(x.sub(&x_prev)?, g.sub(&g_prev)?)?;
        }
        self.prev = Some((x.clone(), g.clone()));

        let g_norm1 = g.abs()?.sum_all()?.to_scalar::<f32>()? as f64;
        if g_norm1 == 0.0 || !g_norm1.is_finite() {
            debug!(g_norm1, "gradient vanished or non-finite; keeping point");
            return Ok(LineSearch::Rejected);
        }

        let (mut direction, mut t) = if self.pairs.is_empty() {
            (g.neg()?, self.lr * (1.0 / g_norm1).min(1.0))
        } else {
            (self.direction(&g)?.neg()?, self.lr)
        };

        let mut slope = dot(&g, &direction)?;
        if !(slope < -CURVATURE_EPS) {
            warn!(
                slope,
                pairs = self.pairs.len(),
                "lbfgs direction not a descent direction; resetting history"
            );
            self.reset();
            direction = g.neg()?;
            t = self.lr * (1.0 / g_norm1).min(1.0);
            slope = dot(&g, &direction)?;
        }

        for _ in 0..self.max_line_search {
            let trial = (&x + (&direction * t)?)?.reshape(dims.as_slice())?;
            let (point, trial_value) = objective(&trial)?;
            if trial_value.is_finite() && trial_value <= value + ARMIJO_C1 * t * slope {
                debug!(step = t, value = trial_value, "lbfgs step accepted");
                return Ok(LineSearch::Accepted {
                    point,
                    value: trial_value,
                    step: t,
                });
            }
            t *= 0.5;
        }

        warn!(value, "lbfgs line search found no decrease; keeping point");
        Ok(LineSearch::Rejected)
    }

    fn push_pair(&mut self, s: Tensor, y: Tensor) -> Result<()> {
        let ys = dot(&y, &s)?;
        if ys <= CURVATURE_EPS || !ys.is_finite() {
            return Ok(());
        }
        if self.pairs.len() == self.history_size {
            self.pairs.pop_front();
        }
        self.pairs.push_back(Pair { s, y, rho: 1.0 / ys });
        Ok(())
    }

    /// Two-loop recursion: approximate inverse Hessian times `g`.
    fn direction(&self, g: &Tensor) -> Result<Tensor> {
        let mut q = g.clone();
        let mut alphas = Vec::with_capacity(self.pairs.len());
        for pair in self.pairs.iter().rev() {
            let alpha = pair.rho * dot(&pair.s, &q)?;
            q = (q - (&pair.y * alpha)?)?;
            alphas.push(alpha);
        }

        let gamma = match self.pairs.back() {
            Some(newest) => {
                let yy = dot(&newest.y, &newest.y)?;
                if yy > 0.0 {
                    1.0 / (newest.rho * yy)
                } else {
                    1.0
                }
            }
            None => 1.0,
        };
        let mut r = (q * gamma)?;

        for (pair, alpha) in self.pairs.iter().zip(alphas.iter().rev()) {
            let beta = pair.rho * dot(&pair.y, &r)?;
            r = (r + (&pair.s * (alpha - beta))?)?;
        }
        Ok(r)
    }
}
