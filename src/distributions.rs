/*!
Target densities and proposal kernels consumed by the samplers.

A sampler never looks inside a target: it only evaluates the unnormalized log-density
(and, for the gradient-based samplers, its gradient) at the points it visits. Two adapters
turn plain closures into targets, and a handful of reference distributions are provided
for tests and demos.

# Examples

### Closures as targets

```rust
use mcmc_core::distributions::{GradientFn, GradientTarget, LogDensityFn, Target};
use ndarray::{arr1, Array1};

// Unnormalized standard normal, log-density only (enough for Metropolis-Hastings).
let logp = LogDensityFn::new(|x: &Array1<f64>| -0.5 * x.dot(x));
assert_eq!(logp.log_density(&arr1(&[0.0, 0.0])), 0.0);

// The same density with its gradient (needed by HMC and NUTS).
let target = GradientFn::new(
    |x: &Array1<f64>| -0.5 * x.dot(x),
    |x: &Array1<f64>| -x.clone(),
)
.with_dim(2);
assert_eq!(target.dim(), Some(2));
assert_eq!(target.grad_log_density(&arr1(&[1.0, -2.0])), arr1(&[-1.0, 2.0]));
```

### Reference distributions

```rust
use mcmc_core::distributions::{Gaussian2D, IsotropicGaussian, Normalized, Proposal, Target};
use ndarray::{arr1, arr2};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let gauss = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
};
let logp = gauss.log_prob(&arr1(&[0.5, -0.5]));
println!("Normalized log-probability: {}", logp);

// The isotropic Gaussian doubles as the random-walk proposal of Metropolis-Hastings.
let proposal = IsotropicGaussian::new(1.0);
let mut rng = SmallRng::seed_from_u64(42);
let candidate = proposal.sample(&arr1(&[0.0, 0.0]), &mut rng);
assert_eq!(candidate.len(), 2);
```
*/

use ndarray::{arr1, Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use std::f64::consts::PI;

/// A continuous target distribution known up to a normalizing constant.
pub trait Target {
    /// Returns the log of the unnormalized density at `position`.
    ///
    /// May return `f64::NEG_INFINITY` or `NaN` at infeasible points; samplers treat such
    /// points as certain rejections.
    fn log_density(&self, position: &Array1<f64>) -> f64;

    /// The dimension this target is defined on, if it is fixed.
    ///
    /// Samplers use it to reject an `initial_state` of the wrong length before running.
    fn dim(&self) -> Option<usize> {
        None
    }
}

/// A target whose log-density gradient is available, as required by HMC and NUTS.
pub trait GradientTarget: Target {
    /// Returns the gradient of [`Target::log_density`] at `position`.
    fn grad_log_density(&self, position: &Array1<f64>) -> Array1<f64>;

    /// Returns the log-density and its gradient at `position`.
    ///
    /// Override when both can share intermediate work.
    fn logp_and_grad(&self, position: &Array1<f64>) -> (f64, Array1<f64>) {
        (
            self.log_density(position),
            self.grad_log_density(position),
        )
    }
}

/// A trait for distributions that provide a normalized log-density (e.g., for diagnostics).
pub trait Normalized {
    /// Returns the normalized log-density at `position`.
    fn log_prob(&self, position: &Array1<f64>) -> f64;
}

/// A proposal kernel q(x' | x) for Metropolis-Hastings.
///
/// The random number generator belongs to the sampler and is passed in, so a proposal holds
/// no mutable state and can be shared between chains.
pub trait Proposal {
    /// Draws a candidate x' ~ q(· | current).
    fn sample<R: Rng + ?Sized>(&self, current: &Array1<f64>, rng: &mut R) -> Array1<f64>;

    /// Evaluates log q(to | from), up to a constant shared by all pairs.
    fn log_prob(&self, from: &Array1<f64>, to: &Array1<f64>) -> f64;
}

/// Wraps a log-density closure as a [`Target`].
#[derive(Clone)]
pub struct LogDensityFn<F> {
    log_density: F,
    dim: Option<usize>,
}

impl<F> LogDensityFn<F>
where
    F: Fn(&Array1<f64>) -> f64,
{
    pub fn new(log_density: F) -> Self {
        Self {
            log_density,
            dim: None,
        }
    }

    /// Declares the dimension the closure expects.
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }
}

impl<F> Target for LogDensityFn<F>
where
    F: Fn(&Array1<f64>) -> f64,
{
    fn log_density(&self, position: &Array1<f64>) -> f64 {
        (self.log_density)(position)
    }

    fn dim(&self) -> Option<usize> {
        self.dim
    }
}

/// Wraps a log-density closure and its gradient closure as a [`GradientTarget`].
#[derive(Clone)]
pub struct GradientFn<F, G> {
    log_density: F,
    gradient: G,
    dim: Option<usize>,
}

impl<F, G> GradientFn<F, G>
where
    F: Fn(&Array1<f64>) -> f64,
    G: Fn(&Array1<f64>) -> Array1<f64>,
{
    pub fn new(log_density: F, gradient: G) -> Self {
        Self {
            log_density,
            gradient,
            dim: None,
        }
    }

    /// Declares the dimension the closures expect.
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }
}

impl<F, G> Target for GradientFn<F, G>
where
    F: Fn(&Array1<f64>) -> f64,
    G: Fn(&Array1<f64>) -> Array1<f64>,
{
    fn log_density(&self, position: &Array1<f64>) -> f64 {
        (self.log_density)(position)
    }

    fn dim(&self) -> Option<usize> {
        self.dim
    }
}

impl<F, G> GradientTarget for GradientFn<F, G>
where
    F: Fn(&Array1<f64>) -> f64,
    G: Fn(&Array1<f64>) -> Array1<f64>,
{
    fn grad_log_density(&self, position: &Array1<f64>) -> Array1<f64> {
        (self.gradient)(position)
    }
}

/**
A 2D Gaussian distribution parameterized by a mean vector and a 2×2 covariance matrix.

# Examples

```rust
use mcmc_core::distributions::{Gaussian2D, GradientTarget, Target};
use ndarray::{arr1, arr2};

let gauss = Gaussian2D {
    mean: arr1(&[1.0, 2.0]),
    cov: arr2(&[[1.0, 0.8], [0.8, 1.0]]),
};
assert_eq!(gauss.log_density(&arr1(&[1.0, 2.0])), 0.0);
assert_eq!(gauss.grad_log_density(&arr1(&[1.0, 2.0])), arr1(&[0.0, 0.0]));
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian2D {
    pub mean: Array1<f64>,
    pub cov: Array2<f64>,
}

impl Gaussian2D {
    fn det(&self) -> f64 {
        self.cov[(0, 0)] * self.cov[(1, 1)] - self.cov[(0, 1)] * self.cov[(1, 0)]
    }

    /// Returns `Σ⁻¹ (x - μ)`.
    fn precision_times_diff(&self, position: &Array1<f64>) -> Array1<f64> {
        let (a, b, c, d) = (
            self.cov[(0, 0)],
            self.cov[(0, 1)],
            self.cov[(1, 0)],
            self.cov[(1, 1)],
        );
        let det = self.det();
        let dx = position[0] - self.mean[0];
        let dy = position[1] - self.mean[1];
        arr1(&[(d * dx - b * dy) / det, (-c * dx + a * dy) / det])
    }

    fn quadratic_form(&self, position: &Array1<f64>) -> f64 {
        let diff = position - &self.mean;
        diff.dot(&self.precision_times_diff(position))
    }
}

impl Normalized for Gaussian2D {
    /// Computes the fully normalized log-density of a 2D Gaussian.
    fn log_prob(&self, position: &Array1<f64>) -> f64 {
        let term_1 = -(2.0 * PI).ln();
        let term_2 = -0.5 * self.det().abs().ln();
        let term_3 = -0.5 * self.quadratic_form(position);
        term_1 + term_2 + term_3
    }
}

impl Target for Gaussian2D {
    fn log_density(&self, position: &Array1<f64>) -> f64 {
        -0.5 * self.quadratic_form(position)
    }

    fn dim(&self) -> Option<usize> {
        Some(2)
    }
}

impl GradientTarget for Gaussian2D {
    fn grad_log_density(&self, position: &Array1<f64>) -> Array1<f64> {
        -self.precision_times_diff(position)
    }
}

/**
An isotropic zero-mean Gaussian `N(0, std² I)` of any dimension.

As a [`Target`] it is the standard test density; as a [`Proposal`] it is the symmetric
random walk `x' = x + N(0, std² I)`.

# Examples

```rust
use mcmc_core::distributions::{IsotropicGaussian, Proposal};
use ndarray::arr1;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let proposal = IsotropicGaussian::new(1.0);
let mut rng = SmallRng::seed_from_u64(7);
let current = arr1(&[0.0, 0.0]);
let candidate = proposal.sample(&current, &mut rng);
// Symmetric kernel: forward and backward densities agree.
assert_eq!(
    proposal.log_prob(&current, &candidate),
    proposal.log_prob(&candidate, &current)
);
```
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsotropicGaussian {
    pub std: f64,
}

impl IsotropicGaussian {
    /// Creates a new isotropic Gaussian with the specified standard deviation.
    pub fn new(std: f64) -> Self {
        Self { std }
    }
}

impl Proposal for IsotropicGaussian {
    fn sample<R: Rng + ?Sized>(&self, current: &Array1<f64>, rng: &mut R) -> Array1<f64> {
        current.mapv(|x| {
            let z: f64 = StandardNormal.sample(rng);
            x + self.std * z
        })
    }

    fn log_prob(&self, from: &Array1<f64>, to: &Array1<f64>) -> f64 {
        let var = self.std * self.std;
        let d = from.len() as f64;
        let sq: f64 = from.iter().zip(to.iter()).map(|(f, t)| (t - f).powi(2)).sum();
        -sq / (2.0 * var) - 0.5 * d * (2.0 * PI * var).ln()
    }
}

impl Target for IsotropicGaussian {
    fn log_density(&self, position: &Array1<f64>) -> f64 {
        -0.5 * position.dot(position) / (self.std * self.std)
    }
}

impl GradientTarget for IsotropicGaussian {
    fn grad_log_density(&self, position: &Array1<f64>) -> Array1<f64> {
        position.mapv(|x| -x / (self.std * self.std))
    }
}

/// The Rosenbrock "banana" density `log p(x, y) = -[(a - x)² + b (y - x²)²]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rosenbrock2D {
    pub a: f64,
    pub b: f64,
}

impl Target for Rosenbrock2D {
    fn log_density(&self, position: &Array1<f64>) -> f64 {
        let (x, y) = (position[0], position[1]);
        -((self.a - x).powi(2) + self.b * (y - x * x).powi(2))
    }

    fn dim(&self) -> Option<usize> {
        Some(2)
    }
}

impl GradientTarget for Rosenbrock2D {
    fn grad_log_density(&self, position: &Array1<f64>) -> Array1<f64> {
        let (x, y) = (position[0], position[1]);
        let r = y - x * x;
        arr1(&[
            2.0 * (self.a - x) + 4.0 * self.b * x * r,
            -2.0 * self.b * r,
        ])
    }
}

/// Neal's funnel: `v ~ N(0, 3²)` and `x_i | v ~ N(0, e^v)` for the remaining `dim - 1`
/// coordinates. Position layout is `[v, x_1, ..., x_{dim-1}]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NealFunnel {
    pub dim: usize,
}

impl Target for NealFunnel {
    fn log_density(&self, position: &Array1<f64>) -> f64 {
        let v = position[0];
        let scale = (-v).exp();
        let rest: f64 = position
            .iter()
            .skip(1)
            .map(|x| -0.5 * x * x * scale - 0.5 * v)
            .sum();
        -v * v / 18.0 + rest
    }

    fn dim(&self) -> Option<usize> {
        Some(self.dim)
    }
}

impl GradientTarget for NealFunnel {
    fn grad_log_density(&self, position: &Array1<f64>) -> Array1<f64> {
        let v = position[0];
        let scale = (-v).exp();
        let mut grad = position.mapv(|x| -x * scale);
        grad[0] = -v / 9.0
            + 0.5
                * position
                    .iter()
                    .skip(1)
                    .map(|x| x * x * scale - 1.0)
                    .sum::<f64>();
        grad
    }
}

/// A one-dimensional mixture `Σ_k w_k N(μ_k, σ_k²)`, evaluated with log-sum-exp.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture1D {
    pub weights: Vec<f64>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl GaussianMixture1D {
    /// Weighted component log-densities at `x`.
    fn component_logps(&self, x: f64) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.means)
            .zip(&self.stds)
            .map(|((w, m), s)| {
                w.ln() - s.ln() - 0.5 * (2.0 * PI).ln() - 0.5 * ((x - m) / s).powi(2)
            })
            .collect()
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

impl Target for GaussianMixture1D {
    fn log_density(&self, position: &Array1<f64>) -> f64 {
        log_sum_exp(&self.component_logps(position[0]))
    }

    fn dim(&self) -> Option<usize> {
        Some(1)
    }
}

impl Normalized for GaussianMixture1D {
    fn log_prob(&self, position: &Array1<f64>) -> f64 {
        let total: f64 = self.weights.iter().sum();
        self.log_density(position) - total.ln()
    }
}

impl GradientTarget for GaussianMixture1D {
    fn grad_log_density(&self, position: &Array1<f64>) -> Array1<f64> {
        let x = position[0];
        let logps = self.component_logps(x);
        let norm = log_sum_exp(&logps);
        // Responsibility-weighted sum of the component scores.
        let grad = logps
            .iter()
            .zip(&self.means)
            .zip(&self.stds)
            .map(|((lp, m), s)| (lp - norm).exp() * -(x - m) / (s * s))
            .sum::<f64>();
        arr1(&[grad])
    }
}
