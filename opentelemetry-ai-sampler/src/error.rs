use thiserror::Error;

/// A specialized `Result` type for sampler configuration.
pub type SamplerResult<T> = Result<T, SamplerError>;

/// Errors returned while configuring the sampler or updating trace state.
///
/// None of these are raised on the sampling path itself: a decision is always
/// produced.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SamplerError {
    /// The sampling percentage is not a number in `[0, 100]`.
    #[error("sampling percentage must be a number between 0 and 100, got {0}")]
    InvalidPercentage(f64),

    /// The sampling percentage could not be written into the trace state.
    #[error("failed to record the sampling percentage in trace state: {0}")]
    TraceState(String),
}

/// Validates a user supplied sampling percentage.
pub(crate) fn check_percentage(percentage: f64) -> SamplerResult<f64> {
    if (0.0..=100.0).contains(&percentage) {
        Ok(percentage)
    } else {
        Err(SamplerError::InvalidPercentage(percentage))
    }
}
