//! End-to-end checks that each sampler recovers a known 2D Gaussian.
//!
//! 1. HMC with a fixed trajectory matches the mean and covariance.
//! 2. Metropolis-Hastings draws pass a two-sample KS test against exact draws, and a
//!    sampler aimed at the wrong covariance fails it.
//! 3. NUTS with adaptation matches the mean and covariance.

use mcmc_core::core::MarkovChain;
use mcmc_core::distributions::{Gaussian2D, Normalized};
use mcmc_core::hmc::HamiltonianMC;
use mcmc_core::metropolis_hastings::MetropolisHastings;
use mcmc_core::nuts::NUTS;
use ndarray::{arr1, arr2, Array1, Array2, Axis};
use ndarray_stats::CorrelationExt;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const SEED: u64 = 42;

fn correlated_target() -> Gaussian2D {
    Gaussian2D {
        mean: arr1(&[1.0, 2.0]),
        cov: arr2(&[[1.0, 0.8], [0.8, 1.0]]),
    }
}

fn assert_moments(samples: &Array2<f64>, target: &Gaussian2D, mean_tol: f64, cov_tol: f64) {
    let mean = samples.mean_axis(Axis(0)).unwrap();
    let cov = samples.t().cov(1.0).unwrap();
    for i in 0..2 {
        assert!(
            (mean[i] - target.mean[i]).abs() < mean_tol,
            "mean {mean} too far from {}",
            target.mean
        );
        for j in 0..2 {
            assert!(
                (cov[[i, j]] - target.cov[[i, j]]).abs() < cov_tol,
                "covariance {cov} too far from {}",
                target.cov
            );
        }
    }
}

/// Exact draws from a 2D Gaussian via its Cholesky factor.
fn exact_draws(target: &Gaussian2D, n: usize, seed: u64) -> Array2<f64> {
    let c = &target.cov;
    let l11 = c[[0, 0]].sqrt();
    let l21 = c[[1, 0]] / l11;
    let l22 = (c[[1, 1]] - l21 * l21).sqrt();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut out = Array2::<f64>::zeros((n, 2));
    for mut row in out.rows_mut() {
        let z1: f64 = rng.sample(StandardNormal);
        let z2: f64 = rng.sample(StandardNormal);
        row[0] = target.mean[0] + l11 * z1;
        row[1] = target.mean[1] + l21 * z1 + l22 * z2;
    }
    out
}

fn log_probs(target: &Gaussian2D, samples: &Array2<f64>) -> Vec<f64> {
    samples
        .rows()
        .into_iter()
        .map(|row| target.log_prob(&row.to_owned()))
        .collect()
}

#[test]
fn hmc_recovers_correlated_gaussian() {
    let target = correlated_target();
    let mut hmc = HamiltonianMC::new(target.clone(), 0.2, 20)
        .unwrap()
        .set_seed(SEED);
    let samples = hmc.sample(5000, &arr1(&[0.0, 0.0]), 1000, 1).unwrap();

    assert_eq!(samples.shape(), &[5000, 2]);
    assert!(hmc.acceptance_rate > 0.5);
    assert_moments(&samples, &target, 0.1, 0.15);
}

#[test]
fn nuts_recovers_correlated_gaussian() {
    let target = correlated_target();
    let mut nuts = NUTS::new(target.clone(), 0.65).unwrap().set_seed(SEED);
    let samples = nuts.sample(4000, &arr1(&[0.0, 0.0]), 1000, 1).unwrap();

    assert_moments(&samples, &target, 0.1, 0.15);
    assert_eq!(nuts.epsilon_history.len(), 1001);
    assert!(nuts.epsilon > 0.0 && nuts.epsilon.is_finite());
    assert!(nuts.diagnostics.tree_depths.iter().all(|&d| d <= 10));
}

#[test]
fn metropolis_hastings_passes_ks_test() {
    const SUBSAMPLE_SIZE: usize = 1000;
    const THIN: usize = 25;

    let target = Gaussian2D {
        mean: arr1(&[0.0, 0.0]),
        cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
    };
    let mut mh = MetropolisHastings::new(target.clone(), 1.5)
        .unwrap()
        .set_seed(SEED);
    let samples = mh
        .sample(SUBSAMPLE_SIZE, &arr1(&[10.0, 12.0]), 2500, THIN)
        .unwrap();
    let reference = exact_draws(&target, SUBSAMPLE_SIZE, SEED);

    let log_prob_mcmc = log_probs(&target, &samples);
    let log_prob_target = log_probs(&target, &reference);
    assert!(
        !log_prob_mcmc
            .iter()
            .chain(log_prob_target.iter())
            .any(|x| !x.is_finite()),
        "Found infinite/NaN in log probabilities."
    );

    let result = kolmogorov_smirnov::test_f64(&log_prob_mcmc, &log_prob_target, 0.99);
    assert!(
        !result.is_rejected,
        "KS test rejected MH samples (statistic {})",
        result.statistic
    );
    assert_moments(&samples, &target, 0.5, 0.5);
}

#[test]
fn ks_test_rejects_wrong_target() {
    const SUBSAMPLE_SIZE: usize = 1000;

    let target = Gaussian2D {
        mean: arr1(&[0.0, 0.0]),
        cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
    };
    let false_target = Gaussian2D {
        mean: arr1(&[0.0, 0.0]),
        cov: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
    };
    let mut mh = MetropolisHastings::new(false_target, 1.0)
        .unwrap()
        .set_seed(SEED);
    let samples = mh
        .sample(SUBSAMPLE_SIZE, &Array1::zeros(2), 2500, 10)
        .unwrap();
    let reference = exact_draws(&target, SUBSAMPLE_SIZE, SEED);

    let result = kolmogorov_smirnov::test_f64(
        &log_probs(&target, &samples),
        &log_probs(&target, &reference),
        0.95,
    );
    assert!(result.is_rejected, "KS test failed to reject the wrong target");
}
