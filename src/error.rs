//! Error types for sampler configuration and convergence diagnostics.
//!
//! Numerical trouble inside a trajectory (overflowing energies, `NaN` densities) is never an
//! error: the affected proposal is rejected and the chain advances. Only mistakes a caller can
//! fix before a run starts end up here.

use thiserror::Error;

/// Invalid sampler or run configuration, reported before any transition is taken.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("proposal standard deviation must be positive and finite, got {0}")]
    NonPositiveProposalStd(f64),
    #[error("step size must be positive and finite, got {0}")]
    NonPositiveStepSize(f64),
    #[error("number of leapfrog steps must be positive")]
    ZeroLeapfrogSteps,
    #[error("target acceptance probability must lie in (0, 1), got {0}")]
    InvalidTargetAccept(f64),
    #[error("maximum tree depth must be positive")]
    ZeroTreeDepth,
    #[error("number of requested samples must be positive")]
    ZeroSamples,
    #[error("thinning interval must be positive")]
    ZeroThin,
    #[error("initial state must have at least one dimension")]
    EmptyInitialState,
    #[error("initial state contains a non-finite value at index {index}")]
    NonFiniteInitialState { index: usize },
    #[error("log-density at the initial state is {0}; start inside the support of the target")]
    NonFiniteInitialLogDensity(f64),
    #[error("initial state has dimension {found} but the target expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("gradient has dimension {found} but the state has dimension {expected}")]
    GradientDimensionMismatch { expected: usize, found: usize },
    #[error("tuning grid needs 0 < min <= max and at least one point, got [{min}, {max}] x {n_points}")]
    InvalidTuningGrid { min: f64, max: f64, n_points: usize },
    #[error("expected at least one chain")]
    NoChains,
    #[error("initial states have mixed dimensions ({first} and {other})")]
    RaggedInitialStates { first: usize, other: usize },
}

/// Inputs that convergence diagnostics cannot be computed from.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatsError {
    #[error("need at least {needed} chains, got {found}")]
    TooFewChains { needed: usize, found: usize },
    #[error("need at least {needed} draws per chain, got {found}")]
    TooFewDraws { needed: usize, found: usize },
    #[error("within-chain variance is zero; R-hat is undefined")]
    ZeroWithinChainVariance,
}
