//! Metropolis-Hastings on a Rosenbrock "banana" given as a plain closure.

use mcmc_core::core::{init, run_chains, RunPlan};
use mcmc_core::distributions::LogDensityFn;
use mcmc_core::metropolis_hastings::MetropolisHastings;
use mcmc_core::stats::RunStats;

use ndarray::{Array1, Axis};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    const N_CHAINS: usize = 8;
    const SAMPLE_SIZE: usize = 20_000;
    const BURNIN: usize = 5_000;
    const THIN: usize = 5;

    // a = 1, b = 20: a curved valley along y = x².
    let banana = LogDensityFn::new(|theta: &Array1<f64>| {
        let (x, y) = (theta[0], theta[1]);
        -((1.0 - x).powi(2) + 20.0 * (y - x * x).powi(2))
    })
    .with_dim(2);

    // Small steps: the valley is narrow.
    let mh = MetropolisHastings::new(banana, 0.3)?;
    let plan = RunPlan::new(SAMPLE_SIZE, BURNIN, THIN);
    let run = run_chains(&mh, &init(N_CHAINS, 2), &plan, 42)?;

    let rates = run.acceptance_rates();
    println!(
        "Mean acceptance rate: {:.3}",
        rates.iter().sum::<f64>() / rates.len() as f64
    );
    let means = run.samples.mean_axis(Axis(1)).ok_or("no samples")?;
    println!("Per-chain means:\n{means:.3}");
    println!("{}", RunStats::from_chains(run.samples.view())?);
    Ok(())
}
