//! Hamiltonian Monte Carlo with a fixed step size and trajectory length.
//!
//! Each transition draws a fresh momentum `p ~ N(0, I)`, integrates `n_leapfrog` leapfrog steps
//! of size `epsilon` from the current position and accepts the end point with probability
//! `min(1, exp(H(q, p) - H(q', p')))`. Trajectories whose energy is not finite are rejected.
//!
//! [`HamiltonianMC::tune_parameters`] picks `epsilon` from a log-spaced grid by running a short
//! chain for every candidate.

use log::{debug, info};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::core::{validate_initial_state, MarkovChain, RunPlan, Transition};
use crate::distributions::GradientTarget;
use crate::error::ConfigError;
use crate::integrator::{leapfrog, PhasePoint};

/// Log-spaced candidate step sizes for [`HamiltonianMC::tune_parameters_with_grid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningGrid {
    pub min: f64,
    pub max: f64,
    pub n_points: usize,
}

impl Default for TuningGrid {
    fn default() -> Self {
        Self {
            min: 0.01,
            max: 1.0,
            n_points: 10,
        }
    }
}

impl TuningGrid {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.min > 0.0 && self.min <= self.max && self.max.is_finite();
        if !ordered || self.n_points == 0 {
            return Err(ConfigError::InvalidTuningGrid {
                min: self.min,
                max: self.max,
                n_points: self.n_points,
            });
        }
        Ok(())
    }

    /// `n_points` values from `min` to `max` (both included), evenly spaced in log scale.
    pub fn points(&self) -> Vec<f64> {
        if self.n_points == 1 {
            return vec![self.min];
        }
        let (lo, hi) = (self.min.ln(), self.max.ln());
        let step = (hi - lo) / (self.n_points - 1) as f64;
        (0..self.n_points)
            .map(|i| (lo + step * i as f64).exp())
            .collect()
    }
}

/**
Hamiltonian Monte Carlo sampler over a differentiable target `D`.

# Examples

```rust
use mcmc_core::core::MarkovChain;
use mcmc_core::distributions::IsotropicGaussian;
use mcmc_core::hmc::HamiltonianMC;
use ndarray::arr1;

let mut hmc = HamiltonianMC::new(IsotropicGaussian::new(1.0), 0.3, 10)
    .unwrap()
    .set_seed(42);
let samples = hmc.sample(500, &arr1(&[1.0, -1.0, 0.5]), 100, 1).unwrap();
assert_eq!(samples.shape(), &[500, 3]);
assert!(hmc.acceptance_rate > 0.8);
```
*/
#[derive(Debug, Clone)]
pub struct HamiltonianMC<D> {
    pub target: D,
    /// Leapfrog step size.
    pub epsilon: f64,
    /// Leapfrog steps per transition.
    pub n_leapfrog: usize,
    pub acceptance_rate: f64,
    pub samples: Option<Array2<f64>>,
    pub seed: u64,
    rng: SmallRng,
    current_log_density: f64,
    current_grad: Array1<f64>,
}

impl<D: GradientTarget> HamiltonianMC<D> {
    pub fn new(target: D, epsilon: f64, n_leapfrog: usize) -> Result<Self, ConfigError> {
        check_trajectory(epsilon, n_leapfrog)?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            epsilon,
            n_leapfrog,
            acceptance_rate: 0.0,
            samples: None,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            current_log_density: f64::NAN,
            current_grad: Array1::zeros(0),
        })
    }

    /// Probability of accepting the end point of a trajectory that started at `start`.
    ///
    /// A trajectory whose energy is no longer finite is never accepted.
    pub fn acceptance_probability(start: &PhasePoint, end: &PhasePoint) -> f64 {
        let log_ratio = start.hamiltonian() - end.hamiltonian();
        if log_ratio.is_finite() {
            log_ratio.min(0.0).exp()
        } else {
            0.0
        }
    }

    /// Chooses `epsilon` from the default grid (10 values between 0.01 and 1.0).
    ///
    /// See [`tune_parameters_with_grid`](Self::tune_parameters_with_grid).
    pub fn tune_parameters(
        &mut self,
        initial_state: &Array1<f64>,
        n_tuning: usize,
        target_accept: f64,
    ) -> Result<f64, ConfigError> {
        self.tune_parameters_with_grid(initial_state, n_tuning, target_accept, &TuningGrid::default())
    }

    /// Runs `n_tuning` iterations without burn-in for every step size in `grid` and keeps the
    /// one whose acceptance rate is closest to `target_accept` (first one on ties).
    ///
    /// Returns the chosen step size, which is also stored in `self.epsilon`. Afterwards
    /// `acceptance_rate` holds the rate observed for it and `samples` is cleared.
    pub fn tune_parameters_with_grid(
        &mut self,
        initial_state: &Array1<f64>,
        n_tuning: usize,
        target_accept: f64,
        grid: &TuningGrid,
    ) -> Result<f64, ConfigError> {
        if !(target_accept > 0.0 && target_accept < 1.0) {
            return Err(ConfigError::InvalidTargetAccept(target_accept));
        }
        grid.validate()?;

        let mut best: Option<(f64, f64)> = None;
        for epsilon in grid.points() {
            self.epsilon = epsilon;
            self.sample(n_tuning, initial_state, 0, 1)?;
            let rate = self.acceptance_rate;
            debug!("tuning: epsilon={epsilon:.4} acceptance={rate:.3}");
            let closer = match best {
                Some((_, best_rate)) => {
                    (rate - target_accept).abs() < (best_rate - target_accept).abs()
                }
                None => true,
            };
            if closer {
                best = Some((epsilon, rate));
            }
        }

        let (epsilon, rate) = best.ok_or(ConfigError::InvalidTuningGrid {
            min: grid.min,
            max: grid.max,
            n_points: grid.n_points,
        })?;
        self.epsilon = epsilon;
        self.acceptance_rate = rate;
        self.samples = None;
        info!("tuned epsilon={epsilon:.4} (acceptance {rate:.3}, target {target_accept})");
        Ok(epsilon)
    }

    fn draw_momentum(&mut self, dim: usize) -> Array1<f64> {
        Array1::from_iter((0..dim).map(|_| self.rng.sample::<f64, _>(StandardNormal)))
    }
}

fn check_trajectory(epsilon: f64, n_leapfrog: usize) -> Result<(), ConfigError> {
    if !(epsilon > 0.0 && epsilon.is_finite()) {
        return Err(ConfigError::NonPositiveStepSize(epsilon));
    }
    if n_leapfrog == 0 {
        return Err(ConfigError::ZeroLeapfrogSteps);
    }
    Ok(())
}

/// Evaluates the target at the initial state and checks the dimensions it reports.
pub(crate) fn evaluate_initial_state<D: GradientTarget + ?Sized>(
    target: &D,
    initial_state: &Array1<f64>,
) -> Result<(f64, Array1<f64>), ConfigError> {
    validate_initial_state(initial_state)?;
    let dim = initial_state.len();
    if let Some(expected) = target.dim() {
        if expected != dim {
            return Err(ConfigError::DimensionMismatch {
                expected,
                found: dim,
            });
        }
    }
    let (log_density, grad) = target.logp_and_grad(initial_state);
    if !log_density.is_finite() {
        return Err(ConfigError::NonFiniteInitialLogDensity(log_density));
    }
    if grad.len() != dim {
        return Err(ConfigError::GradientDimensionMismatch {
            expected: dim,
            found: grad.len(),
        });
    }
    Ok((log_density, grad))
}

impl<D: GradientTarget> MarkovChain for HamiltonianMC<D> {
    fn prepare(&mut self, initial_state: &Array1<f64>, _plan: &RunPlan) -> Result<(), ConfigError> {
        check_trajectory(self.epsilon, self.n_leapfrog)?;
        let (log_density, grad) = evaluate_initial_state(&self.target, initial_state)?;
        self.current_log_density = log_density;
        self.current_grad = grad;
        self.samples = None;
        Ok(())
    }

    fn step(&mut self, _iteration: usize, current: &Array1<f64>) -> Transition {
        let momentum = self.draw_momentum(current.len());
        let start = PhasePoint {
            position: current.clone(),
            momentum,
            grad: self.current_grad.clone(),
            log_density: self.current_log_density,
        };
        let end = leapfrog(&self.target, &start, self.epsilon, self.n_leapfrog);

        let u: f64 = self.rng.gen();
        if u < Self::acceptance_probability(&start, &end) {
            self.current_log_density = end.log_density;
            self.current_grad = end.grad;
            Transition::accept(end.position)
        } else {
            Transition::reject(current)
        }
    }

    fn finish(&mut self, samples: &Array2<f64>, accepted: usize, total: usize) {
        self.acceptance_rate = accepted as f64 / total as f64;
        self.samples = Some(samples.clone());
    }

    fn acceptance_rate(&self) -> f64 {
        self.acceptance_rate
    }

    fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{GradientFn, IsotropicGaussian, Rosenbrock2D};
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Axis};

    #[test]
    fn rejects_invalid_trajectories() {
        let target = IsotropicGaussian::new(1.0);
        assert!(matches!(
            HamiltonianMC::new(target, 0.0, 10),
            Err(ConfigError::NonPositiveStepSize(_))
        ));
        assert!(matches!(
            HamiltonianMC::new(target, f64::NAN, 10),
            Err(ConfigError::NonPositiveStepSize(_))
        ));
        assert_eq!(
            HamiltonianMC::new(target, 0.1, 0).unwrap_err(),
            ConfigError::ZeroLeapfrogSteps
        );
    }

    #[test]
    fn default_grid_spans_two_decades() {
        let points = TuningGrid::default().points();
        assert_eq!(points.len(), 10);
        assert_abs_diff_eq!(points[0], 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(points[9], 1.0, epsilon = 1e-12);
        for pair in points.windows(2) {
            assert_abs_diff_eq!(pair[1] / pair[0], 100f64.powf(1.0 / 9.0), epsilon = 1e-9);
        }
        assert!(TuningGrid {
            min: 1.0,
            max: 0.1,
            n_points: 3
        }
        .validate()
        .is_err());
    }

    #[test]
    fn gradient_dimension_is_checked() {
        let target = GradientFn::new(
            |x: &Array1<f64>| -0.5 * x.dot(x),
            |_: &Array1<f64>| Array1::zeros(1),
        );
        let mut hmc = HamiltonianMC::new(target, 0.1, 5).unwrap();
        assert_eq!(
            hmc.sample(10, &arr1(&[0.0, 0.0]), 0, 1),
            Err(ConfigError::GradientDimensionMismatch {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn tiny_steps_are_almost_always_accepted() {
        let mut hmc = HamiltonianMC::new(IsotropicGaussian::new(1.0), 1e-3, 10)
            .unwrap()
            .set_seed(1);
        hmc.sample(500, &arr1(&[0.5, -0.5]), 0, 1).unwrap();
        assert!(hmc.acceptance_rate > 0.99);
    }

    #[test]
    fn divergent_trajectories_are_rejected() {
        let target = Rosenbrock2D { a: 1.0, b: 100.0 };
        let mut hmc = HamiltonianMC::new(target, 5.0, 20).unwrap().set_seed(2);
        let start = arr1(&[0.5, 0.5]);
        let samples = hmc.sample(200, &start, 0, 1).unwrap();
        assert!(hmc.acceptance_rate < 0.05);
        assert!(samples.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn acceptance_probability_handles_energy_changes() {
        type Hmc = HamiltonianMC<IsotropicGaussian>;
        let point = |log_density: f64, p: f64| PhasePoint {
            position: arr1(&[0.0]),
            momentum: arr1(&[p]),
            grad: arr1(&[0.0]),
            log_density,
        };
        let start = point(-1.0, 1.0);
        // Lower energy at the end point.
        assert_eq!(Hmc::acceptance_probability(&start, &point(-0.5, 1.0)), 1.0);
        assert_abs_diff_eq!(
            Hmc::acceptance_probability(&start, &point(-2.0, 1.0)),
            (-1.0_f64).exp(),
            epsilon = 1e-12
        );
        assert_eq!(Hmc::acceptance_probability(&start, &point(f64::NEG_INFINITY, 1.0)), 0.0);
        assert_eq!(Hmc::acceptance_probability(&start, &point(f64::NAN, 1.0)), 0.0);
        assert_eq!(Hmc::acceptance_probability(&start, &point(-1.0, f64::INFINITY)), 0.0);
    }

    #[test]
    fn infeasible_initial_state_is_rejected() {
        let half_normal = GradientFn::new(
            |x: &Array1<f64>| {
                if x[0] > 0.0 {
                    -0.5 * x[0] * x[0]
                } else {
                    f64::NEG_INFINITY
                }
            },
            |x: &Array1<f64>| -x,
        );
        let mut hmc = HamiltonianMC::new(half_normal, 0.3, 10).unwrap().set_seed(5);
        assert_eq!(
            hmc.sample(100, &arr1(&[-1.0]), 0, 1),
            Err(ConfigError::NonFiniteInitialLogDensity(f64::NEG_INFINITY))
        );
        assert!(hmc.samples.is_none());

        let samples = hmc.sample(100, &arr1(&[1.0]), 0, 1).unwrap();
        assert!(samples.iter().all(|&x| x > 0.0));
        assert!(hmc.acceptance_rate > 0.0);
    }

    #[test]
    fn same_seed_same_chain() {
        let run = |seed| {
            let mut hmc = HamiltonianMC::new(IsotropicGaussian::new(2.0), 0.2, 15)
                .unwrap()
                .set_seed(seed);
            hmc.sample(100, &arr1(&[1.0]), 10, 2).unwrap()
        };
        assert_eq!(run(5), run(5));
        assert_ne!(run(5), run(6));
    }

    #[test]
    fn tuning_moves_towards_target_acceptance() {
        let target = IsotropicGaussian::new(1.0);
        let mut hmc = HamiltonianMC::new(target, 0.5, 20).unwrap().set_seed(42);
        let start = Array1::zeros(10);
        let epsilon = hmc.tune_parameters(&start, 300, 0.65).unwrap();
        assert!(TuningGrid::default()
            .points()
            .iter()
            .any(|&p| (p - epsilon).abs() < 1e-12));
        assert_eq!(hmc.epsilon, epsilon);
        assert!(hmc.samples.is_none());
        // The chosen step should land reasonably close to the requested rate.
        assert!(
            (hmc.acceptance_rate - 0.65).abs() < 0.3,
            "acceptance {}",
            hmc.acceptance_rate
        );

        let samples = hmc.sample(2000, &start, 200, 1).unwrap();
        let mean = samples.mean_axis(Axis(0)).unwrap();
        assert!(mean.iter().all(|m| m.abs() < 0.25), "mean {mean}");
    }

    #[test]
    fn tuning_validates_arguments() {
        let mut hmc = HamiltonianMC::new(IsotropicGaussian::new(1.0), 0.5, 5).unwrap();
        let start = arr1(&[0.0]);
        assert_eq!(
            hmc.tune_parameters(&start, 100, 1.0),
            Err(ConfigError::InvalidTargetAccept(1.0))
        );
        assert_eq!(
            hmc.tune_parameters(&start, 0, 0.65),
            Err(ConfigError::ZeroSamples)
        );
    }
}
