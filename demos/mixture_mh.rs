//! Metropolis-Hastings on a bimodal 1D Gaussian mixture; wide proposals are needed to hop
//! between the modes.

use mcmc_core::core::MarkovChain;
use mcmc_core::distributions::GaussianMixture1D;
use mcmc_core::metropolis_hastings::MetropolisHastings;

use ndarray::arr1;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let target = GaussianMixture1D {
        weights: vec![0.3, 0.7],
        means: vec![-3.0, 3.0],
        stds: vec![1.0, 1.0],
    };

    for proposal_std in [0.5, 2.0, 5.0] {
        let mut mh = MetropolisHastings::new(target.clone(), proposal_std)?.set_seed(7);
        let samples = mh.sample(50_000, &arr1(&[0.0]), 5_000, 1)?;
        let right = samples.iter().filter(|&&x| x > 0.0).count() as f64 / samples.len() as f64;
        println!(
            "proposal std {proposal_std:>3}: acceptance {:.2}, mass right of 0: {right:.3} (expected 0.7)",
            mh.acceptance_rate
        );
    }
    Ok(())
}
