use thiserror::Error;

/// Configuration errors for a funnel definition.
/// These are raised before any event is looked at and are never recovered from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FunnelError {
    #[error("a funnel needs at least 2 steps, got {0}")]
    TooFewSteps(usize),
    #[error("step {0:?} appears more than once in the funnel")]
    DuplicateStep(String),
    /// Carries the offending window in milliseconds
    #[error("conversion window must be positive, got {0}ms")]
    NonPositiveWindow(i64),
    #[error("{0:?} is not a valid conversion window")]
    InvalidWindow(String),
}
