//! Neal's funnel: HMC with a fixed step size struggles in the neck, NUTS adapts.

use mcmc_core::core::MarkovChain;
use mcmc_core::distributions::NealFunnel;
use mcmc_core::hmc::HamiltonianMC;
use mcmc_core::nuts::NUTS;
use mcmc_core::stats::effective_sample_size;

use ndarray::Array1;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    const SAMPLE_SIZE: usize = 4_000;
    const BURNIN: usize = 1_000;
    let target = NealFunnel { dim: 5 };
    let initial_state = Array1::from_elem(5, 0.5);

    let mut hmc = HamiltonianMC::new(target, 0.2, 25)?.set_seed(1);
    let hmc_samples = hmc.sample_progress(SAMPLE_SIZE, &initial_state, BURNIN, 1)?;

    let mut nuts = NUTS::new(target, 0.9)?.set_seed(1);
    let nuts_samples = nuts.sample_progress(SAMPLE_SIZE, &initial_state, BURNIN, 1)?;

    // The log-scale coordinate v is the hard one.
    let v_hmc = hmc_samples.column(0);
    let v_nuts = nuts_samples.column(0);
    println!(
        "HMC : acceptance {:.2}, v in [{:.2}, {:.2}], ESS(v) {:.0}",
        hmc.acceptance_rate,
        v_hmc.fold(f64::INFINITY, |a, &b| a.min(b)),
        v_hmc.fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
        effective_sample_size(v_hmc)
    );
    println!(
        "NUTS: epsilon {:.3}, v in [{:.2}, {:.2}], ESS(v) {:.0}, divergences {}",
        nuts.epsilon,
        v_nuts.fold(f64::INFINITY, |a, &b| a.min(b)),
        v_nuts.fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
        effective_sample_size(v_nuts),
        nuts.diagnostics.divergences
    );
    Ok(())
}
