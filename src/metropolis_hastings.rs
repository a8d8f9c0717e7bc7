/*!
# Metropolis–Hastings Sampler

A random-walk Metropolis–Hastings sampler for any target implementing [`Target`]. Candidates
come from a [`Proposal`], by default an isotropic Gaussian centered on the current state, and
are accepted with probability

```text
min(1, p(x') q(x | x') / (p(x) q(x' | x)))
```

evaluated in log space. A candidate whose log-density is `NaN` or `-∞` is always rejected.

## Example Usage

```rust
use mcmc_core::core::MarkovChain;
use mcmc_core::distributions::{Gaussian2D, IsotropicGaussian};
use mcmc_core::metropolis_hastings::MetropolisHastings;
use ndarray::{arr1, arr2};

let target = Gaussian2D {
    mean: arr1(&[0.0, 0.0]),
    cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
};
let mut mh = MetropolisHastings::new(target, 1.0).unwrap().set_seed(42);
let samples = mh.sample(1000, &arr1(&[0.0, 0.0]), 100, 1).unwrap();

assert_eq!(samples.shape(), &[1000, 2]);
assert!(mh.acceptance_rate > 0.0 && mh.acceptance_rate < 1.0);
```
*/

use ndarray::{Array1, Array2};
use rand::prelude::*;

use crate::core::{MarkovChain, RunPlan, Transition};
use crate::distributions::{IsotropicGaussian, Proposal, Target};
use crate::error::ConfigError;

/// Metropolis–Hastings sampler over target `D` with proposal `Q`.
#[derive(Debug, Clone)]
pub struct MetropolisHastings<D, Q = IsotropicGaussian> {
    /// The (unnormalized) density to sample from.
    pub target: D,
    /// Generates candidate states.
    pub proposal: Q,
    /// Accepted fraction of the iterations of the last run.
    pub acceptance_rate: f64,
    /// Kept rows of the last run.
    pub samples: Option<Array2<f64>>,
    pub seed: u64,
    rng: SmallRng,
    current_log_density: f64,
}

impl<D: Target> MetropolisHastings<D, IsotropicGaussian> {
    /// Random-walk sampler with Gaussian proposals of standard deviation `proposal_std`.
    pub fn new(target: D, proposal_std: f64) -> Result<Self, ConfigError> {
        if !(proposal_std > 0.0 && proposal_std.is_finite()) {
            return Err(ConfigError::NonPositiveProposalStd(proposal_std));
        }
        Ok(Self::with_proposal(target, IsotropicGaussian::new(proposal_std)))
    }
}

impl<D: Target, Q: Proposal> MetropolisHastings<D, Q> {
    /// Sampler with an arbitrary proposal. Asymmetric proposals are corrected for through
    /// [`Proposal::log_prob`].
    pub fn with_proposal(target: D, proposal: Q) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            target,
            proposal,
            acceptance_rate: 0.0,
            samples: None,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            current_log_density: f64::NAN,
        }
    }

    /// Draws a candidate state from the proposal centered on `current`.
    pub fn propose(&mut self, current: &Array1<f64>) -> Array1<f64> {
        self.proposal.sample(current, &mut self.rng)
    }

    /// Probability of moving from `current` to `proposed`, in `[0, 1]`.
    ///
    /// Returns 0 whenever the ratio cannot be evaluated (non-finite proposed density).
    pub fn acceptance_probability(&self, current: &Array1<f64>, proposed: &Array1<f64>) -> f64 {
        let log_current = self.target.log_density(current);
        let log_proposed = self.target.log_density(proposed);
        self.log_acceptance_ratio(current, log_current, proposed, log_proposed)
            .min(0.0)
            .exp()
    }

    fn log_acceptance_ratio(
        &self,
        current: &Array1<f64>,
        log_current: f64,
        proposed: &Array1<f64>,
        log_proposed: f64,
    ) -> f64 {
        if log_proposed.is_nan() || log_proposed == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        let ratio = log_proposed - log_current + self.proposal.log_prob(proposed, current)
            - self.proposal.log_prob(current, proposed);
        if ratio.is_nan() {
            f64::NEG_INFINITY
        } else {
            ratio
        }
    }
}

impl<D, Q> MarkovChain for MetropolisHastings<D, Q>
where
    D: Target,
    Q: Proposal,
{
    fn prepare(&mut self, initial_state: &Array1<f64>, _plan: &RunPlan) -> Result<(), ConfigError> {
        if let Some(expected) = self.target.dim() {
            if expected != initial_state.len() {
                return Err(ConfigError::DimensionMismatch {
                    expected,
                    found: initial_state.len(),
                });
            }
        }
        let log_density = self.target.log_density(initial_state);
        if !log_density.is_finite() {
            return Err(ConfigError::NonFiniteInitialLogDensity(log_density));
        }
        self.current_log_density = log_density;
        self.samples = None;
        Ok(())
    }

    fn step(&mut self, _iteration: usize, current: &Array1<f64>) -> Transition {
        let proposed = self.propose(current);
        let log_proposed = self.target.log_density(&proposed);
        let log_ratio =
            self.log_acceptance_ratio(current, self.current_log_density, &proposed, log_proposed);
        let u: f64 = self.rng.gen();
        if u < log_ratio.min(0.0).exp() {
            self.current_log_density = log_proposed;
            Transition::accept(proposed)
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

    /**
    Reseeds the sampler. Two samplers with the same seed produce identical runs.

    ```rust
    use mcmc_core::core::MarkovChain;
    use mcmc_core::distributions::IsotropicGaussian;
    use mcmc_core::metropolis_hastings::MetropolisHastings;
    use ndarray::arr1;

    let mut a = MetropolisHastings::new(IsotropicGaussian::new(1.0), 0.5).unwrap().set_seed(7);
    let mut b = MetropolisHastings::new(IsotropicGaussian::new(1.0), 0.5).unwrap().set_seed(7);
    let start = arr1(&[0.0]);
    assert_eq!(a.sample(50, &start, 0, 1).unwrap(), b.sample(50, &start, 0, 1).unwrap());
    ```
    */
    fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }
}
