/*!
# No-U-Turn Sampler

NUTS replaces the fixed trajectory length of HMC by a balanced binary tree of leapfrog steps
that doubles in a random direction until the trajectory turns back on itself, the energy
diverges, or the tree reaches `max_tree_depth`. The next state is drawn uniformly from the
tree's states that lie inside the slice `log_u < -H(q, p)`.

During the first `adapt_steps` iterations the step size is tuned by dual averaging towards the
target acceptance statistic `delta`. After that it is frozen at the averaged value `ε̄`.

The tree is built by [`build_tree`], a pure recursive function returning a [`Subtree`]; the
sampler owns only the random number generator and the adaptation state.

## Example

```rust
use mcmc_core::core::MarkovChain;
use mcmc_core::distributions::Gaussian2D;
use mcmc_core::nuts::NUTS;
use ndarray::{arr1, arr2};

let target = Gaussian2D {
    mean: arr1(&[1.0, 2.0]),
    cov: arr2(&[[1.0, 0.9], [0.9, 1.0]]),
};
let mut nuts = NUTS::new(target, 0.65).unwrap().set_seed(42);
let samples = nuts.sample(500, &arr1(&[0.0, 0.0]), 200, 1).unwrap();

assert_eq!(samples.shape(), &[500, 2]);
// Initial step size plus one entry per adaptation step.
assert_eq!(nuts.epsilon_history.len(), 201);
```
*/

use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_distr::{Exp1, StandardNormal};

use crate::core::{MarkovChain, RunPlan, Transition};
use crate::distributions::GradientTarget;
use crate::error::ConfigError;
use crate::hmc::evaluate_initial_state;
use crate::integrator::{leapfrog_step, PhasePoint};

/// Safety cap on the doubling/halving loop of [`find_reasonable_epsilon`].
const MAX_EPSILON_SEARCH_STEPS: usize = 100;

/// Tuning knobs of [`NUTS`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NutsSettings {
    /// Maximum number of tree doublings per iteration.
    pub max_tree_depth: usize,
    /// Iterations of step-size adaptation. `None` adapts during burn-in.
    pub adapt_steps: Option<usize>,
    /// Starting step size. `None` runs [`find_reasonable_epsilon`] at the initial state.
    pub initial_step_size: Option<f64>,
    /// A leaf stops the tree when its energy exceeds the slice level by more than this.
    pub divergence_threshold: f64,
    /// Dual averaging: iteration offset that damps early updates.
    pub t0: f64,
    /// Dual averaging: shrinkage towards `μ = log(10 ε₀)`.
    pub gamma: f64,
    /// Dual averaging: decay exponent of the averaged iterate weights.
    pub kappa: f64,
}

impl Default for NutsSettings {
    fn default() -> Self {
        Self {
            max_tree_depth: 10,
            adapt_steps: None,
            initial_step_size: None,
            divergence_threshold: 1000.0,
            t0: 10.0,
            gamma: 0.05,
            kappa: 0.75,
        }
    }
}

impl NutsSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tree_depth == 0 {
            return Err(ConfigError::ZeroTreeDepth);
        }
        if let Some(eps) = self.initial_step_size {
            if !(eps > 0.0 && eps.is_finite()) {
                return Err(ConfigError::NonPositiveStepSize(eps));
            }
        }
        Ok(())
    }
}

/// Per-run tree statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NutsDiagnostics {
    /// Number of doublings of every iteration.
    pub tree_depths: Vec<usize>,
    /// Iterations stopped by `max_tree_depth` rather than by a U-turn or divergence.
    pub max_depth_hits: usize,
    /// Iterations in which at least one leaf diverged.
    pub divergences: usize,
    /// The part of `divergences` that happened while the step size was still adapting.
    pub warmup_divergences: usize,
}

impl NutsDiagnostics {
    /// Divergent iterations after step-size adaptation ended.
    pub fn sampling_divergences(&self) -> usize {
        self.divergences - self.warmup_divergences
    }
}

/// Integration direction of a tree doubling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

impl Direction {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.gen::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    /// `+1` forward, `-1` backward.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

/// Quantities shared by every leaf of one iteration's tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeContext {
    /// Log of the slice variable.
    pub log_u: f64,
    /// Energy of the starting point of the iteration.
    pub h0: f64,
    pub epsilon: f64,
    pub divergence_threshold: f64,
}

/// A subtree of `2^depth` leapfrog steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Subtree {
    /// Leaf furthest back in time.
    pub backward: PhasePoint,
    /// Leaf furthest forward in time.
    pub forward: PhasePoint,
    /// Candidate state, uniform over the valid leaves.
    pub proposal: PhasePoint,
    /// Leaves inside the slice.
    pub n_valid: usize,
    /// False once the subtree made a U-turn or diverged.
    pub keep_going: bool,
    /// Sum of `min(1, exp(H0 - H))` over the leaves.
    pub alpha_sum: f64,
    /// Number of leaves contributing to `alpha_sum`.
    pub n_alpha: usize,
    /// Whether any leaf crossed the divergence threshold.
    pub diverged: bool,
}

/// The trajectory from `backward` to `forward` is still extending in both directions.
pub fn no_u_turn(backward: &PhasePoint, forward: &PhasePoint) -> bool {
    let delta = &forward.position - &backward.position;
    delta.dot(&backward.momentum) >= 0.0 && delta.dot(&forward.momentum) >= 0.0
}

/// Builds a subtree of `2^depth` leapfrog steps starting next to `start` in `direction`.
///
/// `start` is the current endpoint of the tree on that side; it is not part of the subtree.
pub fn build_tree<D, R>(
    target: &D,
    start: &PhasePoint,
    direction: Direction,
    depth: usize,
    ctx: &TreeContext,
    rng: &mut R,
) -> Subtree
where
    D: GradientTarget + ?Sized,
    R: Rng + ?Sized,
{
    if depth == 0 {
        let leaf = leapfrog_step(target, start, direction.sign() * ctx.epsilon);
        let h = leaf.hamiltonian();
        // NaN energies fail both comparisons.
        let valid = ctx.log_u < -h;
        let keep_going = ctx.log_u - ctx.divergence_threshold < -h;
        let log_alpha = ctx.h0 - h;
        let alpha = if log_alpha.is_nan() {
            0.0
        } else {
            log_alpha.min(0.0).exp()
        };
        return Subtree {
            backward: leaf.clone(),
            forward: leaf.clone(),
            proposal: leaf,
            n_valid: valid as usize,
            keep_going,
            alpha_sum: alpha,
            n_alpha: 1,
            diverged: !keep_going,
        };
    }

    let mut tree = build_tree(target, start, direction, depth - 1, ctx, rng);
    if !tree.keep_going {
        return tree;
    }

    let edge = match direction {
        Direction::Backward => &tree.backward,
        Direction::Forward => &tree.forward,
    };
    let second = build_tree(target, edge, direction, depth - 1, ctx, rng);

    let n_total = tree.n_valid + second.n_valid;
    if rng.gen::<f64>() < second.n_valid as f64 / n_total.max(1) as f64 {
        tree.proposal = second.proposal;
    }
    match direction {
        Direction::Backward => tree.backward = second.backward,
        Direction::Forward => tree.forward = second.forward,
    }
    tree.n_valid = n_total;
    tree.alpha_sum += second.alpha_sum;
    tree.n_alpha += second.n_alpha;
    tree.diverged |= second.diverged;
    tree.keep_going = second.keep_going && no_u_turn(&tree.backward, &tree.forward);
    tree
}

/**
Heuristic starting step size.

Starting from `ε = 1`, takes one leapfrog step from `point` and compares the energy change
with `log(0.5)`. The step size is then doubled (if the step was accepted more often than half
the time) or halved until the acceptance ratio crosses `0.5`. Step sizes whose first step
produces a non-finite energy are halved before the search starts.

# Examples

```rust
use mcmc_core::distributions::IsotropicGaussian;
use mcmc_core::integrator::PhasePoint;
use mcmc_core::nuts::find_reasonable_epsilon;
use ndarray::arr1;

let target = IsotropicGaussian::new(1.0);
let point = PhasePoint::new(&target, arr1(&[0.0, 1.0]), arr1(&[1.0, 0.0]));
assert_eq!(find_reasonable_epsilon(&target, &point), 2.0);
```
*/
pub fn find_reasonable_epsilon<D: GradientTarget + ?Sized>(target: &D, point: &PhasePoint) -> f64 {
    let h0 = point.hamiltonian();
    let log_ratio = |epsilon: f64| h0 - leapfrog_step(target, point, epsilon).hamiltonian();

    let mut epsilon = 1.0;
    let mut ratio = log_ratio(epsilon);
    let mut searches = 0;
    while !ratio.is_finite() && searches < MAX_EPSILON_SEARCH_STEPS {
        epsilon *= 0.5;
        ratio = log_ratio(epsilon);
        searches += 1;
    }

    let half = 0.5_f64.ln();
    let a = if ratio > half { 1.0 } else { -1.0 };
    while a * ratio > a * half && searches < MAX_EPSILON_SEARCH_STEPS {
        let next = epsilon * 2.0_f64.powf(a);
        let next_ratio = log_ratio(next);
        if !next_ratio.is_finite() {
            break;
        }
        epsilon = next;
        ratio = next_ratio;
        searches += 1;
    }
    epsilon
}

/// Dual-averaging step-size controller.
#[derive(Debug, Clone, PartialEq)]
pub struct DualAveraging {
    delta: f64,
    mu: f64,
    t0: f64,
    gamma: f64,
    kappa: f64,
    h_bar: f64,
    log_epsilon: f64,
    log_epsilon_bar: f64,
    m: usize,
}

impl DualAveraging {
    pub fn new(initial_epsilon: f64, delta: f64, settings: &NutsSettings) -> Self {
        Self {
            delta,
            mu: (10.0 * initial_epsilon).ln(),
            t0: settings.t0,
            gamma: settings.gamma,
            kappa: settings.kappa,
            h_bar: 0.0,
            log_epsilon: initial_epsilon.ln(),
            log_epsilon_bar: 0.0,
            m: 0,
        }
    }

    /// Feeds one iteration's mean acceptance statistic and returns the next step size.
    pub fn update(&mut self, accept_stat: f64) -> f64 {
        self.m += 1;
        let m = self.m as f64;
        let w = 1.0 / (m + self.t0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.delta - accept_stat);
        self.log_epsilon = self.mu - m.sqrt() / self.gamma * self.h_bar;
        let eta = m.powf(-self.kappa);
        self.log_epsilon_bar = eta * self.log_epsilon + (1.0 - eta) * self.log_epsilon_bar;
        self.epsilon()
    }

    /// Current (noisy) step size.
    pub fn epsilon(&self) -> f64 {
        self.log_epsilon.exp()
    }

    /// Averaged step size `ε̄`, used once adaptation ends.
    pub fn epsilon_bar(&self) -> f64 {
        self.log_epsilon_bar.exp()
    }

    /// Number of updates so far.
    pub fn iterations(&self) -> usize {
        self.m
    }
}

/// No-U-Turn Sampler with dual-averaging step-size adaptation.
#[derive(Debug, Clone)]
pub struct NUTS<D> {
    pub target: D,
    /// Target acceptance statistic for adaptation.
    pub delta: f64,
    pub settings: NutsSettings,
    /// Current step size; `ε̄` after a run that adapted.
    pub epsilon: f64,
    /// Initial step size followed by every adapted value.
    pub epsilon_history: Vec<f64>,
    pub diagnostics: NutsDiagnostics,
    /// Fraction of iterations that moved to a new state.
    pub acceptance_rate: f64,
    pub samples: Option<Array2<f64>>,
    pub seed: u64,
    rng: SmallRng,
    adapt_steps: usize,
    dual: Option<DualAveraging>,
    current_log_density: f64,
    current_grad: Array1<f64>,
}

impl<D: GradientTarget> NUTS<D> {
    /// Sampler with default settings adapting towards acceptance statistic `delta`.
    pub fn new(target: D, delta: f64) -> Result<Self, ConfigError> {
        if !(delta > 0.0 && delta < 1.0) {
            return Err(ConfigError::InvalidTargetAccept(delta));
        }
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            delta,
            settings: NutsSettings::default(),
            epsilon: f64::NAN,
            epsilon_history: Vec::new(),
            diagnostics: NutsDiagnostics::default(),
            acceptance_rate: 0.0,
            samples: None,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            adapt_steps: 0,
            dual: None,
            current_log_density: f64::NAN,
            current_grad: Array1::zeros(0),
        })
    }

    pub fn with_settings(mut self, settings: NutsSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    fn draw_momentum(&mut self, dim: usize) -> Array1<f64> {
        Array1::from_iter((0..dim).map(|_| self.rng.sample::<f64, _>(StandardNormal)))
    }
}

impl<D: GradientTarget> MarkovChain for NUTS<D> {
    fn prepare(&mut self, initial_state: &Array1<f64>, plan: &RunPlan) -> Result<(), ConfigError> {
        self.settings.validate()?;
        let (log_density, grad) = evaluate_initial_state(&self.target, initial_state)?;

        let epsilon = match self.settings.initial_step_size {
            Some(eps) => eps,
            None => {
                let momentum = self.draw_momentum(initial_state.len());
                let point = PhasePoint {
                    position: initial_state.clone(),
                    momentum,
                    grad: grad.clone(),
                    log_density,
                };
                find_reasonable_epsilon(&self.target, &point)
            }
        };
        debug!("NUTS initial epsilon: {epsilon:.4}");

        self.epsilon = epsilon;
        self.epsilon_history = vec![epsilon];
        self.adapt_steps = self.settings.adapt_steps.unwrap_or(plan.burn_in);
        self.dual = (self.adapt_steps > 0)
            .then(|| DualAveraging::new(epsilon, self.delta, &self.settings));
        self.diagnostics = NutsDiagnostics::default();
        self.samples = None;
        self.current_log_density = log_density;
        self.current_grad = grad;
        Ok(())
    }

    fn step(&mut self, iteration: usize, current: &Array1<f64>) -> Transition {
        let momentum = self.draw_momentum(current.len());
        let start = PhasePoint {
            position: current.clone(),
            momentum,
            grad: self.current_grad.clone(),
            log_density: self.current_log_density,
        };
        let h0 = start.hamiltonian();
        let ctx = TreeContext {
            log_u: -h0 - self.rng.sample::<f64, _>(Exp1),
            h0,
            epsilon: self.epsilon,
            divergence_threshold: self.settings.divergence_threshold,
        };

        let mut backward = start.clone();
        let mut forward = start;
        let mut proposal: Option<PhasePoint> = None;
        let mut n_valid = 1;
        let mut keep_going = true;
        let mut depth = 0;
        let mut diverged = false;
        let mut accept_stat = 0.0;

        while keep_going && depth < self.settings.max_tree_depth {
            let direction = Direction::random(&mut self.rng);
            let edge = match direction {
                Direction::Backward => &backward,
                Direction::Forward => &forward,
            };
            let tree = build_tree(&self.target, edge, direction, depth, &ctx, &mut self.rng);

            if tree.keep_going
                && self.rng.gen::<f64>() < (tree.n_valid as f64 / n_valid as f64).min(1.0)
            {
                proposal = Some(tree.proposal);
            }
            match direction {
                Direction::Backward => backward = tree.backward,
                Direction::Forward => forward = tree.forward,
            }
            n_valid += tree.n_valid;
            keep_going = tree.keep_going && no_u_turn(&backward, &forward);
            accept_stat = tree.alpha_sum / tree.n_alpha as f64;
            diverged |= tree.diverged;
            depth += 1;
        }

        self.diagnostics.tree_depths.push(depth);
        if keep_going {
            self.diagnostics.max_depth_hits += 1;
        }
        if diverged {
            self.diagnostics.divergences += 1;
            if self.dual.is_some() && iteration <= self.adapt_steps {
                self.diagnostics.warmup_divergences += 1;
            }
        }

        if let Some(dual) = self.dual.as_mut() {
            if iteration <= self.adapt_steps {
                self.epsilon = dual.update(accept_stat);
                self.epsilon_history.push(self.epsilon);
            } else if iteration == self.adapt_steps + 1 {
                self.epsilon = dual.epsilon_bar();
                debug!("NUTS adaptation finished, epsilon frozen at {:.4}", self.epsilon);
            }
        }

        match proposal {
            Some(point) => {
                self.current_log_density = point.log_density;
                self.current_grad = point.grad;
                Transition::accept(point.position)
            }
            None => Transition::reject(current),
        }
    }

    fn finish(&mut self, samples: &Array2<f64>, accepted: usize, total: usize) {
        self.acceptance_rate = accepted as f64 / total as f64;
        self.samples = Some(samples.clone());
        if let Some(dual) = &self.dual {
            if dual.iterations() > 0 {
                self.epsilon = dual.epsilon_bar();
            }
        }

        info!(
            "NUTS finished: epsilon={:.4}, acceptance rate={:.3}",
            self.epsilon, self.acceptance_rate
        );
        if self.diagnostics.divergences > 0 {
            warn!(
                "{} of {} iterations diverged ({} during adaptation)",
                self.diagnostics.divergences,
                self.diagnostics.tree_depths.len(),
                self.diagnostics.warmup_divergences
            );
        }
        if self.diagnostics.max_depth_hits > 0 {
            warn!(
                "{} iterations reached the maximum tree depth {}",
                self.diagnostics.max_depth_hits, self.settings.max_tree_depth
            );
        }
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
