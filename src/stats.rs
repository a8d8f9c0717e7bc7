//! Convergence diagnostics and running statistics for MCMC output.
//!
//! - [`effective_sample_size`]: autocorrelation-adjusted sample size of one scalar chain.
//! - [`gelman_rubin`]: the potential scale reduction factor R̂ across several chains.
//! - [`ChainTracker`]: running mean and windowed acceptance rate, fed one draw at a time
//!   while a chain is being produced (used by the progress bars).
//! - [`RunStats`]: per-dimension summary of a multi-chain run.

use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_stats::QuantileExt;
use rustfft::{num_complex::Complex, FftPlanner};
use std::collections::VecDeque;
use std::fmt;

use crate::error::StatsError;

/// Normalized autocorrelation `ρ_0 = 1, ρ_1, ..., ρ_{n-1}` of a scalar series.
///
/// The autocovariance of the centered series is computed through a zero-padded FFT, so the
/// cost is `O(n log n)`. A constant series has no defined correlation; it is reported as
/// perfectly correlated at every lag.
pub fn autocorrelation(samples: ArrayView1<f64>) -> Array1<f64> {
    let n = samples.len();
    if n == 0 {
        return Array1::zeros(0);
    }
    let mean = samples.sum() / n as f64;
    let padded_len = (2 * n).next_power_of_two();

    let mut buffer: Vec<Complex<f64>> = samples
        .iter()
        .map(|&x| Complex::new(x - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(padded_len)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(padded_len).process(&mut buffer);
    buffer
        .iter_mut()
        .for_each(|c| *c = Complex::new(c.norm_sqr(), 0.0));
    planner.plan_fft_inverse(padded_len).process(&mut buffer);

    let acov0 = buffer[0].re;
    if acov0 <= 0.0 || !acov0.is_finite() {
        return Array1::ones(n);
    }
    Array1::from_iter(buffer.iter().take(n).map(|c| c.re / acov0))
}

/**
Effective sample size of a scalar chain.

`ESS = n / (1 + 2 Σ ρ_k)`, where the sum runs over the initial run of positive
autocorrelations `ρ_1, ρ_2, ...` and stops at the first lag that is not positive.
The result is floored at 1 for any non-empty chain. An empty chain has an ESS of 0.

# Examples

```rust
use mcmc_core::stats::effective_sample_size;
use ndarray::Array1;

// A strongly alternating series has negative lag-1 correlation, so nothing is subtracted.
let x = Array1::from_iter((0..1000).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }));
assert_eq!(effective_sample_size(x.view()), 1000.0);
```
*/
pub fn effective_sample_size(samples: ArrayView1<f64>) -> f64 {
    let n = samples.len();
    if n < 2 {
        return n as f64;
    }
    let rho = autocorrelation(samples);
    let positive_run: f64 = rho
        .iter()
        .skip(1)
        .take_while(|&&r| r > 0.0)
        .sum();
    let tau = 1.0 + 2.0 * positive_run;
    (n as f64 / tau).max(1.0)
}

/// [`effective_sample_size`] of every column of a `(n_draws, dim)` chain.
pub fn effective_sample_size_per_dim(samples: ArrayView2<f64>) -> Array1<f64> {
    samples
        .axis_iter(Axis(1))
        .map(effective_sample_size)
        .collect()
}

/**
Gelman-Rubin potential scale reduction factor for `m` scalar chains of equal length `n`,
given as an `(m, n)` array.

With `W` the mean within-chain variance and `B = n · Var(chain means)`,
`R̂ = sqrt(((n - 1) W + B) / n / W)`. Values below 1.1 are conventionally taken as
converged.

# Examples

```rust
use mcmc_core::stats::gelman_rubin;
use ndarray::arr2;

// Two chains that explore the same values.
let chains = arr2(&[[0.0, 1.0, 0.0, 1.0], [1.0, 0.0, 1.0, 0.0]]);
let rhat = gelman_rubin(chains.view()).unwrap();
assert!(rhat < 1.0);
```
*/
pub fn gelman_rubin(chains: ArrayView2<f64>) -> Result<f64, StatsError> {
    let (m, n) = chains.dim();
    if m < 2 {
        return Err(StatsError::TooFewChains { needed: 2, found: m });
    }
    if n < 2 {
        return Err(StatsError::TooFewDraws { needed: 2, found: n });
    }
    let n_f = n as f64;

    let within = chains
        .axis_iter(Axis(0))
        .map(|chain| chain.var(1.0))
        .sum::<f64>()
        / m as f64;
    if within <= 0.0 {
        return Err(StatsError::ZeroWithinChainVariance);
    }
    let chain_means: Array1<f64> = chains.axis_iter(Axis(0)).map(|c| c.sum() / n_f).collect();
    let between = n_f * chain_means.var(1.0);

    let var_plus = ((n_f - 1.0) * within + between) / n_f;
    Ok((var_plus / within).sqrt())
}

/// [`gelman_rubin`] after splitting every chain into a first and a second half.
///
/// Splitting turns a trend within a chain into disagreement between chains, which the
/// plain statistic cannot see. A middle draw of odd-length chains is dropped.
pub fn split_gelman_rubin(chains: ArrayView2<f64>) -> Result<f64, StatsError> {
    let (m, n) = chains.dim();
    if n < 4 {
        return Err(StatsError::TooFewDraws { needed: 4, found: n });
    }
    let half = n / 2;
    let first = chains.slice(s![.., ..half]);
    let second = chains.slice(s![.., n - half..]);
    let split = ndarray::concatenate(Axis(0), &[first, second])
        .map_err(|_| StatsError::TooFewChains { needed: 1, found: m })?;
    gelman_rubin(split.view())
}

/// [`gelman_rubin`] for every dimension of an `(n_chains, n_draws, dim)` array.
pub fn gelman_rubin_per_dim(chains: ArrayView3<f64>) -> Result<Array1<f64>, StatsError> {
    chains
        .axis_iter(Axis(2))
        .map(gelman_rubin)
        .collect::<Result<Vec<f64>, StatsError>>()
        .map(Array1::from)
}

/// Running statistics of a single chain, updated one draw at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTracker {
    n: u64,
    window: usize,
    mean: Array1<f64>,
    mean_sq: Array1<f64>,
    accept_queue: VecDeque<bool>,
    n_accepted_total: u64,
}

impl ChainTracker {
    /// Acceptance is averaged over this many most recent steps.
    pub const DEFAULT_WINDOW: usize = 100;

    pub fn new(n_params: usize) -> Self {
        Self::with_window(n_params, Self::DEFAULT_WINDOW)
    }

    pub fn with_window(n_params: usize, window: usize) -> Self {
        Self {
            n: 0,
            window: window.max(1),
            mean: Array1::zeros(n_params),
            mean_sq: Array1::zeros(n_params),
            accept_queue: VecDeque::with_capacity(window.max(1)),
            n_accepted_total: 0,
        }
    }

    /// Records one transition: the resulting state and whether its proposal was accepted.
    pub fn step(&mut self, x: ArrayView1<f64>, accepted: bool) {
        self.n += 1;
        let n = self.n as f64;

        self.accept_queue.push_back(accepted);
        if self.accept_queue.len() > self.window {
            self.accept_queue.pop_front();
        }
        self.n_accepted_total += accepted as u64;

        Zip::from(&mut self.mean)
            .and(&mut self.mean_sq)
            .and(&x)
            .for_each(|m, m2, &xi| {
                *m += (xi - *m) / n;
                *m2 += (xi * xi - *m2) / n;
            });
    }

    /// Number of recorded transitions.
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Acceptance rate over the sliding window.
    pub fn p_accept(&self) -> f64 {
        if self.accept_queue.is_empty() {
            return 0.0;
        }
        self.accept_queue.iter().filter(|&&a| a).count() as f64 / self.accept_queue.len() as f64
    }

    /// Acceptance rate over all recorded transitions.
    pub fn p_accept_total(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.n_accepted_total as f64 / self.n as f64
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Unbiased running variance of each parameter.
    pub fn sm2(&self) -> Array1<f64> {
        let n = self.n as f64;
        if self.n < 2 {
            return Array1::zeros(self.mean.len());
        }
        (&self.mean_sq - &self.mean.mapv(|m| m * m)) * n / (n - 1.0)
    }
}

/// Per-dimension summary of a multi-chain run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub n_chains: usize,
    pub n_draws: usize,
    pub mean: Array1<f64>,
    pub sd: Array1<f64>,
    /// Effective sample size summed over chains.
    pub ess: Array1<f64>,
    /// `None` for single-chain runs.
    pub rhat: Option<Array1<f64>>,
}

impl RunStats {
    /// Summarizes an `(n_chains, n_draws, dim)` array.
    pub fn from_chains(chains: ArrayView3<f64>) -> Result<Self, StatsError> {
        let (n_chains, n_draws, dim) = chains.dim();
        if n_chains == 0 {
            return Err(StatsError::TooFewChains { needed: 1, found: 0 });
        }
        if n_draws < 2 {
            return Err(StatsError::TooFewDraws {
                needed: 2,
                found: n_draws,
            });
        }
        let pooled = chains
            .to_shape((n_chains * n_draws, dim))
            .map_err(|_| StatsError::TooFewDraws {
                needed: 2,
                found: n_draws,
            })?;
        let mean = pooled.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(dim));
        let sd = pooled.var_axis(Axis(0), 1.0).mapv(f64::sqrt);
        let ess = chains
            .axis_iter(Axis(0))
            .map(effective_sample_size_per_dim)
            .fold(Array1::<f64>::zeros(dim), |acc, e| acc + e);
        let rhat = if n_chains >= 2 {
            Some(gelman_rubin_per_dim(chains)?)
        } else {
            None
        };
        Ok(Self {
            n_chains,
            n_draws,
            mean,
            sd,
            ess,
            rhat,
        })
    }

    /// Largest R̂ across dimensions; `None` for single-chain runs or when a value is `NaN`.
    pub fn max_rhat(&self) -> Option<f64> {
        self.rhat.as_ref().and_then(|r| r.max().ok().copied())
    }

    /// Smallest effective sample size across dimensions.
    pub fn min_ess(&self) -> Option<f64> {
        self.ess.min().ok().copied()
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} chain(s) x {} draws",
            self.n_chains, self.n_draws
        )?;
        writeln!(
            f,
            "{:>6} {:>10} {:>10} {:>10} {:>8}",
            "dim", "mean", "sd", "ess", "rhat"
        )?;
        for d in 0..self.mean.len() {
            let rhat = self
                .rhat
                .as_ref()
                .map(|r| format!("{:.3}", r[d]))
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "{:>6} {:>10.4} {:>10.4} {:>10.1} {:>8}",
                d, self.mean[d], self.sd[d], self.ess[d], rhat
            )?;
        }
        Ok(())
    }
}
