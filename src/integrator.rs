//! Leapfrog integration of Hamiltonian dynamics.
//!
//! The potential energy is `U(q) = -log_density(q)` and the kinetic energy is `K(p) = ½‖p‖²`
//! (identity mass matrix). A [`PhasePoint`] carries the log-density and gradient evaluated at
//! its position, so consecutive steps reuse the gradient that closed the previous step instead
//! of evaluating it twice.

use ndarray::Array1;

use crate::distributions::{GradientTarget, Target};

/// A point in phase space together with the target evaluated at its position.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePoint {
    pub position: Array1<f64>,
    pub momentum: Array1<f64>,
    /// Gradient of the log-density at `position`.
    pub grad: Array1<f64>,
    /// Log-density at `position`.
    pub log_density: f64,
}

impl PhasePoint {
    /// Evaluates the target at `position` and pairs it with `momentum`.
    pub fn new<D: GradientTarget + ?Sized>(
        target: &D,
        position: Array1<f64>,
        momentum: Array1<f64>,
    ) -> Self {
        let (log_density, grad) = target.logp_and_grad(&position);
        Self {
            position,
            momentum,
            grad,
            log_density,
        }
    }

    /// Same position (and cached evaluation) with a different momentum.
    pub fn with_momentum(&self, momentum: Array1<f64>) -> Self {
        Self {
            position: self.position.clone(),
            momentum,
            grad: self.grad.clone(),
            log_density: self.log_density,
        }
    }

    /// Total energy `H(q, p) = -log_density(q) + ½‖p‖²`.
    pub fn hamiltonian(&self) -> f64 {
        -self.log_density + kinetic_energy(&self.momentum)
    }
}

/// `K(p) = ½‖p‖²`.
pub fn kinetic_energy(momentum: &Array1<f64>) -> f64 {
    0.5 * momentum.dot(momentum)
}

/// `H(q, p) = -log_density(q) + ½‖p‖²`.
pub fn hamiltonian<D: Target + ?Sized>(
    target: &D,
    position: &Array1<f64>,
    momentum: &Array1<f64>,
) -> f64 {
    -target.log_density(position) + kinetic_energy(momentum)
}

/// One leapfrog step of size `epsilon` (negative values integrate backwards in time).
///
/// Half momentum step with the cached gradient, full position step, then a half momentum step
/// with the gradient at the new position. The momentum is not negated.
pub fn leapfrog_step<D: GradientTarget + ?Sized>(
    target: &D,
    point: &PhasePoint,
    epsilon: f64,
) -> PhasePoint {
    let mut momentum = point.momentum.clone();
    momentum.scaled_add(0.5 * epsilon, &point.grad);
    let mut position = point.position.clone();
    position.scaled_add(epsilon, &momentum);
    let (log_density, grad) = target.logp_and_grad(&position);
    momentum.scaled_add(0.5 * epsilon, &grad);
    PhasePoint {
        position,
        momentum,
        grad,
        log_density,
    }
}

/// A trajectory of `n_steps` leapfrog steps, followed by momentum negation.
///
/// The inner half steps are fused into full momentum steps, so the trajectory costs exactly
/// `n_steps` gradient evaluations. Negating the final momentum makes the map its own inverse.
/// Integration stops early once the log-density stops being finite; such a proposal carries
/// infinite (or `NaN`) energy and is rejected by the caller.
pub fn leapfrog<D: GradientTarget + ?Sized>(
    target: &D,
    point: &PhasePoint,
    epsilon: f64,
    n_steps: usize,
) -> PhasePoint {
    let mut position = point.position.clone();
    let mut momentum = point.momentum.clone();
    let mut grad = point.grad.clone();
    let mut log_density = point.log_density;

    momentum.scaled_add(0.5 * epsilon, &grad);
    for step in 0..n_steps {
        position.scaled_add(epsilon, &momentum);
        (log_density, grad) = target.logp_and_grad(&position);
        if !log_density.is_finite() {
            break;
        }
        let scale = if step + 1 < n_steps { 1.0 } else { 0.5 };
        momentum.scaled_add(scale * epsilon, &grad);
    }
    momentum.mapv_inplace(|p| -p);

    PhasePoint {
        position,
        momentum,
        grad,
        log_density,
    }
}
