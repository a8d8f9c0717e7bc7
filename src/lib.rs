//! Metropolis-Hastings, Hamiltonian Monte Carlo and NUTS samplers for user-supplied
//! log-densities, plus the convergence diagnostics to check their output.

pub mod core;
pub mod distributions;
pub mod error;
pub mod hmc;
pub mod integrator;
pub mod metropolis_hastings;
pub mod nuts;
pub mod stats;

pub use crate::core::{run_chain, run_chains, MarkovChain, RunPlan};
pub use crate::error::{ConfigError, StatsError};
