use mcmc_core::core::{init, run_chains, RunPlan};
use mcmc_core::distributions::Rosenbrock2D;
use mcmc_core::nuts::NUTS;
use mcmc_core::stats::{effective_sample_size_per_dim, split_gelman_rubin};
use ndarray::Axis;
use ndarray_stats::QuantileExt;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Create the 2D Rosenbrock target (a = 1, b = 100).
    let target = Rosenbrock2D { a: 1.0, b: 100.0 };

    // Configure the NUTS sampler with target acceptance 0.95.
    let sampler = NUTS::new(target, 0.95)?;

    // Number of samples to collect and to discard (burn-in).
    let plan = RunPlan::new(400, 400, 1);
    let run = run_chains(&sampler, &init(4, 2), &plan, 42)?;
    println!(
        "NUTS sampler: generated {} observations.",
        run.samples.shape()[0..2].iter().product::<usize>()
    );

    // Verify dimensions: [n_chains, n_collect, dim]
    assert_eq!(run.samples.shape(), &[4, 400, 2]);

    for (d, coord) in run.samples.axis_iter(Axis(2)).enumerate() {
        println!("dim {d}: split R-hat {:.3}", split_gelman_rubin(coord)?);
    }
    let ess = run
        .samples
        .axis_iter(Axis(0))
        .map(effective_sample_size_per_dim)
        .fold(ndarray::Array1::<f64>::zeros(2), |acc, e| acc + e);
    println!("MIN ESS: {:.1}", ess.min()?);
    for chain in &run.chains {
        println!(
            "epsilon {:.4}, max-depth hits {}",
            chain.epsilon, chain.diagnostics.max_depth_hits
        );
    }
    Ok(())
}
