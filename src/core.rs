/*!
# Chain driver

Every sampler in this crate implements [`MarkovChain`]: it knows how to take one transition
from a given state. This module owns everything around that step: the iteration schedule
(burn-in and thinning, described by a [`RunPlan`]), acceptance bookkeeping, progress bars, and
fanning independent chains out over a rayon thread pool.

A run of `burn_in + n_samples * thin` iterations records one row per iteration, starting with
the initial state as row 0. Rejected proposals repeat the previous row. The returned samples
are the rows `burn_in, burn_in + thin, ...`, exactly `n_samples` of them.

## Example

```rust
use mcmc_core::core::{run_chains, MarkovChain, RunPlan};
use mcmc_core::distributions::IsotropicGaussian;
use mcmc_core::metropolis_hastings::MetropolisHastings;
use ndarray::arr1;

let sampler = MetropolisHastings::new(IsotropicGaussian::new(1.0), 1.0).unwrap();
let starts = vec![arr1(&[0.0, 0.0]); 3];
let plan = RunPlan::new(200, 50, 1);
let run = run_chains(&sampler, &starts, &plan, 42).unwrap();
assert_eq!(run.samples.shape(), &[3, 200, 2]);
assert_eq!(run.chains.len(), 3);
```
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info};
use ndarray::{Array1, Array2, Array3, Axis};
use rand::Rng;
use rand_distr::Uniform;
use rayon::prelude::*;
use std::error::Error;

use crate::error::ConfigError;
use crate::stats::ChainTracker;

const PROGRESS_TEMPLATE: &str = "{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

/// Iteration schedule of a single chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    /// Rows returned to the caller.
    pub n_samples: usize,
    /// Leading iterations that are discarded.
    pub burn_in: usize,
    /// Keep every `thin`-th row after burn-in.
    pub thin: usize,
}

impl RunPlan {
    pub fn new(n_samples: usize, burn_in: usize, thin: usize) -> Self {
        Self {
            n_samples,
            burn_in,
            thin,
        }
    }

    /// Total number of recorded rows, `burn_in + n_samples * thin`.
    pub fn total(&self) -> usize {
        self.burn_in + self.n_samples * self.thin
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_samples == 0 {
            return Err(ConfigError::ZeroSamples);
        }
        if self.thin == 0 {
            return Err(ConfigError::ZeroThin);
        }
        Ok(())
    }

    /// Output row for chain row `iteration`, if that row is kept.
    fn output_row(&self, iteration: usize) -> Option<usize> {
        if iteration < self.burn_in {
            return None;
        }
        let offset = iteration - self.burn_in;
        (offset % self.thin == 0).then_some(offset / self.thin)
    }
}

/// Result of a single transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The next state of the chain. Equal to the current state after a rejection.
    pub state: Array1<f64>,
    pub accepted: bool,
}

impl Transition {
    pub fn accept(state: Array1<f64>) -> Self {
        Self {
            state,
            accepted: true,
        }
    }

    pub fn reject(current: &Array1<f64>) -> Self {
        Self {
            state: current.clone(),
            accepted: false,
        }
    }
}

/// A sampler that can advance a chain one transition at a time.
///
/// [`run_chain`] calls [`prepare`](MarkovChain::prepare) once, then
/// [`step`](MarkovChain::step) for every iteration, then [`finish`](MarkovChain::finish)
/// with the kept rows.
pub trait MarkovChain {
    /// Validates the run against this sampler and resets per-run state.
    fn prepare(&mut self, initial_state: &Array1<f64>, plan: &RunPlan) -> Result<(), ConfigError>;

    /// Performs transition number `iteration` (starting at 1) from `current`.
    fn step(&mut self, iteration: usize, current: &Array1<f64>) -> Transition;

    /// Receives the kept rows and the acceptance count once the run is over.
    fn finish(&mut self, samples: &Array2<f64>, accepted: usize, total: usize);

    /// Fraction of accepted transitions in the last run.
    fn acceptance_rate(&self) -> f64;

    /// Reseeds the sampler's random number generator.
    fn set_seed(self, seed: u64) -> Self
    where
        Self: Sized;

    /// Runs `burn_in + n_samples * thin` iterations from `initial_state` and returns the
    /// `(n_samples, dim)` matrix of kept states.
    fn sample(
        &mut self,
        n_samples: usize,
        initial_state: &Array1<f64>,
        burn_in: usize,
        thin: usize,
    ) -> Result<Array2<f64>, ConfigError> {
        let plan = RunPlan::new(n_samples, burn_in, thin);
        run_chain(self, initial_state, &plan, None)
    }

    /// Like [`sample`](MarkovChain::sample), drawing a progress bar with a running
    /// acceptance rate on the terminal.
    fn sample_progress(
        &mut self,
        n_samples: usize,
        initial_state: &Array1<f64>,
        burn_in: usize,
        thin: usize,
    ) -> Result<Array2<f64>, Box<dyn Error + Send + Sync>> {
        let plan = RunPlan::new(n_samples, burn_in, thin);
        let pb = ProgressBar::new(plan.total() as u64);
        pb.set_style(progress_style()?);
        pb.set_prefix("Chain");
        let samples = run_chain(self, initial_state, &plan, Some(&pb))?;
        pb.finish_with_message(format!("Done! p(accept)={:.3}", self.acceptance_rate()));
        Ok(samples)
    }
}

fn progress_style() -> Result<ProgressStyle, Box<dyn Error + Send + Sync>> {
    Ok(ProgressStyle::default_bar()
        .template(PROGRESS_TEMPLATE)?
        .progress_chars("##-"))
}

/// Checks that a starting point is non-empty and finite.
pub fn validate_initial_state(initial_state: &Array1<f64>) -> Result<(), ConfigError> {
    if initial_state.is_empty() {
        return Err(ConfigError::EmptyInitialState);
    }
    match initial_state.iter().position(|x| !x.is_finite()) {
        Some(index) => Err(ConfigError::NonFiniteInitialState { index }),
        None => Ok(()),
    }
}

/// Runs one chain according to `plan`, optionally ticking a progress bar.
pub fn run_chain<M>(
    chain: &mut M,
    initial_state: &Array1<f64>,
    plan: &RunPlan,
    progress: Option<&ProgressBar>,
) -> Result<Array2<f64>, ConfigError>
where
    M: MarkovChain + ?Sized,
{
    plan.validate()?;
    validate_initial_state(initial_state)?;
    chain.prepare(initial_state, plan)?;

    let dim = initial_state.len();
    let total = plan.total();
    let mut samples = Array2::<f64>::zeros((plan.n_samples, dim));
    if let Some(row) = plan.output_row(0) {
        samples.row_mut(row).assign(initial_state);
    }

    let mut tracker = ChainTracker::new(dim);
    let tick = (total / 100).max(1);
    let mut current = initial_state.clone();
    let mut accepted = 0;

    for iteration in 1..total {
        let transition = chain.step(iteration, &current);
        accepted += transition.accepted as usize;
        current = transition.state;
        if let Some(row) = plan.output_row(iteration) {
            samples.row_mut(row).assign(&current);
        }
        if let Some(pb) = progress {
            tracker.step(current.view(), transition.accepted);
            if iteration % tick == 0 {
                pb.set_position(iteration as u64);
                pb.set_message(format!("p(accept)≈{:.2}", tracker.p_accept()));
            }
        }
    }
    if let Some(pb) = progress {
        pb.set_position(total as u64);
    }

    chain.finish(&samples, accepted, total);
    debug!(
        "chain finished: {total} iterations, {accepted} accepted, rate {:.3}",
        chain.acceptance_rate()
    );
    Ok(samples)
}

/// Output of [`run_chains`]: the stacked samples and the samplers after their runs.
#[derive(Debug, Clone)]
pub struct ChainsRun<M> {
    /// Shape `(n_chains, n_samples, dim)`.
    pub samples: Array3<f64>,
    pub chains: Vec<M>,
}

impl<M: MarkovChain> ChainsRun<M> {
    pub fn acceptance_rates(&self) -> Vec<f64> {
        self.chains.iter().map(|c| c.acceptance_rate()).collect()
    }
}

fn check_initial_states(initial_states: &[Array1<f64>]) -> Result<usize, ConfigError> {
    let first = initial_states.first().ok_or(ConfigError::NoChains)?.len();
    if let Some(other) = initial_states.iter().map(|s| s.len()).find(|&d| d != first) {
        return Err(ConfigError::RaggedInitialStates { first, other });
    }
    Ok(first)
}

fn stack_chains<M>(
    results: Vec<(M, Array2<f64>)>,
    plan: &RunPlan,
    dim: usize,
) -> ChainsRun<M> {
    let mut samples = Array3::<f64>::zeros((results.len(), plan.n_samples, dim));
    let mut chains = Vec::with_capacity(results.len());
    for (i, (chain, chain_samples)) in results.into_iter().enumerate() {
        samples.index_axis_mut(Axis(0), i).assign(&chain_samples);
        chains.push(chain);
    }
    ChainsRun { samples, chains }
}

/// Runs one independent chain per entry of `initial_states` in parallel.
///
/// Each chain is a clone of `sampler` seeded with `seed + i`.
pub fn run_chains<M>(
    sampler: &M,
    initial_states: &[Array1<f64>],
    plan: &RunPlan,
    seed: u64,
) -> Result<ChainsRun<M>, ConfigError>
where
    M: MarkovChain + Clone + Send + Sync,
{
    let dim = check_initial_states(initial_states)?;
    plan.validate()?;

    let results = initial_states
        .par_iter()
        .enumerate()
        .map(|(i, start)| {
            let mut chain = sampler.clone().set_seed(seed + i as u64);
            let samples = run_chain(&mut chain, start, plan, None)?;
            Ok((chain, samples))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    info!(
        "{} chains finished, {} samples each",
        results.len(),
        plan.n_samples
    );
    Ok(stack_chains(results, plan, dim))
}

/// [`run_chains`] with one progress bar per chain.
pub fn run_chains_progress<M>(
    sampler: &M,
    initial_states: &[Array1<f64>],
    plan: &RunPlan,
    seed: u64,
) -> Result<ChainsRun<M>, Box<dyn Error + Send + Sync>>
where
    M: MarkovChain + Clone + Send + Sync,
{
    let dim = check_initial_states(initial_states)?;
    plan.validate()?;

    let multi = MultiProgress::new();
    let style = progress_style()?;

    let results = initial_states
        .par_iter()
        .enumerate()
        .map(|(i, start)| {
            let pb = multi.add(ProgressBar::new(plan.total() as u64));
            pb.set_prefix(format!("Chain {i}"));
            pb.set_style(style.clone());

            let mut chain = sampler.clone().set_seed(seed + i as u64);
            let samples = run_chain(&mut chain, start, plan, Some(&pb))?;
            pb.finish_with_message(format!("Done! p(accept)={:.3}", chain.acceptance_rate()));
            Ok((chain, samples))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(stack_chains(results, plan, dim))
}

/// `n_chains` random starting points with coordinates drawn uniformly from `[-2, 2)`.
pub fn init(n_chains: usize, dim: usize) -> Vec<Array1<f64>> {
    let mut rng = rand::thread_rng();
    let uniform = Uniform::new(-2.0, 2.0);
    (0..n_chains)
        .map(|_| Array1::from_iter((0..dim).map(|_| rng.sample(uniform))))
        .collect()
}

/// `n_chains` deterministic starting points spread evenly over `[-1, 1]` in every coordinate.
pub fn init_det(n_chains: usize, dim: usize) -> Vec<Array1<f64>> {
    (0..n_chains)
        .map(|i| {
            let x = if n_chains > 1 {
                -1.0 + 2.0 * i as f64 / (n_chains - 1) as f64
            } else {
                0.0
            };
            Array1::from_elem(dim, x)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    /// Moves by +1 and accepts on even iterations, stays put on odd ones.
    #[derive(Debug, Clone)]
    struct Counter {
        prepared: bool,
        steps: Vec<usize>,
        finished_rows: usize,
        acceptance_rate: f64,
        seed: u64,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                prepared: false,
                steps: Vec::new(),
                finished_rows: 0,
                acceptance_rate: 0.0,
                seed: 0,
            }
        }
    }

    impl MarkovChain for Counter {
        fn prepare(&mut self, _: &Array1<f64>, _: &RunPlan) -> Result<(), ConfigError> {
            self.prepared = true;
            self.steps.clear();
            Ok(())
        }

        fn step(&mut self, iteration: usize, current: &Array1<f64>) -> Transition {
            self.steps.push(iteration);
            if iteration % 2 == 0 {
                Transition::accept(current + 1.0)
            } else {
                Transition::reject(current)
            }
        }

        fn finish(&mut self, samples: &Array2<f64>, accepted: usize, total: usize) {
            self.finished_rows = samples.nrows();
            self.acceptance_rate = accepted as f64 / total as f64;
        }

        fn acceptance_rate(&self) -> f64 {
            self.acceptance_rate
        }

        fn set_seed(mut self, seed: u64) -> Self {
            self.seed = seed;
            self
        }
    }

    /// Random walk whose output depends on the seed.
    #[derive(Debug, Clone)]
    struct Walk {
        rng: SmallRng,
    }

    impl MarkovChain for Walk {
        fn prepare(&mut self, _: &Array1<f64>, _: &RunPlan) -> Result<(), ConfigError> {
            Ok(())
        }

        fn step(&mut self, _: usize, current: &Array1<f64>) -> Transition {
            let jump: f64 = self.rng.gen_range(-1.0..1.0);
            Transition::accept(current + jump)
        }

        fn finish(&mut self, _: &Array2<f64>, _: usize, _: usize) {}

        fn acceptance_rate(&self) -> f64 {
            1.0
        }

        fn set_seed(mut self, seed: u64) -> Self {
            self.rng = SmallRng::seed_from_u64(seed);
            self
        }
    }

    #[test]
    fn total_iterations() {
        assert_eq!(RunPlan::new(10, 5, 3).total(), 35);
        assert_eq!(RunPlan::new(1, 0, 1).total(), 1);
    }

    #[test]
    fn plan_validation() {
        assert_eq!(RunPlan::new(0, 5, 1).validate(), Err(ConfigError::ZeroSamples));
        assert_eq!(RunPlan::new(5, 5, 0).validate(), Err(ConfigError::ZeroThin));
        assert!(RunPlan::new(5, 0, 1).validate().is_ok());
    }

    #[test]
    fn kept_rows_follow_burn_in_and_thinning() {
        let plan = RunPlan::new(3, 4, 2);
        let kept: Vec<usize> = (0..plan.total())
            .filter_map(|i| plan.output_row(i).map(|_| i))
            .collect();
        assert_eq!(kept, vec![4, 6, 8]);
    }

    #[test]
    fn run_chain_records_every_iteration() {
        let mut chain = Counter::new();
        let samples = chain.sample(4, &arr1(&[0.0]), 2, 3).unwrap();
        assert!(chain.prepared);
        // Row 0 is the initial state, so a run of 14 rows takes 13 steps.
        assert_eq!(chain.steps, (1..14).collect::<Vec<_>>());
        assert_eq!(chain.finished_rows, 4);
        assert_eq!(samples.shape(), &[4, 1]);
        // Row i holds floor(i / 2): kept rows are 2, 5, 8, 11.
        assert_eq!(samples.column(0).to_vec(), vec![1.0, 2.0, 4.0, 5.0]);
        assert!((chain.acceptance_rate() - 6.0 / 14.0).abs() < 1e-12);
    }

    #[test]
    fn zero_burn_in_keeps_initial_state() {
        let mut chain = Counter::new();
        let samples = chain.sample(2, &arr1(&[7.0, -1.0]), 0, 1).unwrap();
        assert_eq!(samples.row(0).to_vec(), vec![7.0, -1.0]);
        assert_eq!(samples.row(1).to_vec(), vec![7.0, -1.0]);
    }

    #[test]
    fn invalid_runs_are_rejected_before_prepare() {
        let mut chain = Counter::new();
        assert_eq!(
            chain.sample(0, &arr1(&[0.0]), 0, 1),
            Err(ConfigError::ZeroSamples)
        );
        assert_eq!(
            chain.sample(5, &arr1(&[0.0, f64::NAN]), 0, 1),
            Err(ConfigError::NonFiniteInitialState { index: 1 })
        );
        assert_eq!(
            chain.sample(5, &Array1::zeros(0), 0, 1),
            Err(ConfigError::EmptyInitialState)
        );
        assert!(!chain.prepared);
    }

    #[test]
    fn run_chains_seeds_each_chain() {
        let sampler = Counter::new();
        let starts = init_det(3, 2);
        let run = run_chains(&sampler, &starts, &RunPlan::new(5, 5, 1), 100).unwrap();
        let seeds: Vec<u64> = run.chains.iter().map(|c| c.seed).collect();
        assert_eq!(seeds, vec![100, 101, 102]);
        assert_eq!(run.samples.shape(), &[3, 5, 2]);
        assert_eq!(run.acceptance_rates().len(), 3);
    }

    #[test]
    fn run_chains_is_reproducible() {
        let sampler = Walk {
            rng: SmallRng::seed_from_u64(0),
        };
        let starts = init_det(4, 1);
        let plan = RunPlan::new(20, 10, 2);
        let a = run_chains(&sampler, &starts, &plan, 7).unwrap();
        let b = run_chains(&sampler, &starts, &plan, 7).unwrap();
        assert_eq!(a.samples, b.samples);
        let c = run_chains(&sampler, &starts, &plan, 8).unwrap();
        assert_ne!(a.samples, c.samples);
    }

    #[test]
    fn run_chains_rejects_bad_initial_states() {
        let sampler = Counter::new();
        let plan = RunPlan::new(5, 0, 1);
        assert_eq!(
            run_chains(&sampler, &[], &plan, 0).unwrap_err(),
            ConfigError::NoChains
        );
        let ragged = vec![arr1(&[0.0, 0.0]), arr1(&[0.0])];
        assert_eq!(
            run_chains(&sampler, &ragged, &plan, 0).unwrap_err(),
            ConfigError::RaggedInitialStates { first: 2, other: 1 }
        );
    }

    #[test]
    fn progress_variants_return_the_same_shapes() {
        let mut chain = Counter::new();
        let samples = chain.sample_progress(10, &arr1(&[0.0]), 5, 2).unwrap();
        assert_eq!(samples.shape(), &[10, 1]);

        let run =
            run_chains_progress(&Counter::new(), &init_det(2, 3), &RunPlan::new(8, 2, 1), 1)
                .unwrap();
        assert_eq!(run.samples.shape(), &[2, 8, 3]);
    }

    #[test]
    fn initial_positions() {
        let random = init(5, 3);
        assert_eq!(random.len(), 5);
        assert!(random
            .iter()
            .flat_map(|s| s.iter())
            .all(|&x| (-2.0..2.0).contains(&x)));

        let det = init_det(3, 2);
        assert_eq!(det, vec![arr1(&[-1.0, -1.0]), arr1(&[0.0, 0.0]), arr1(&[1.0, 1.0])]);
        assert_eq!(init_det(1, 2), vec![arr1(&[0.0, 0.0])]);
    }
}
