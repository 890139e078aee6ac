use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("admission.max_concurrent must be at least 1")]
    NoConcurrency,

    #[error("admission.max_concurrent should not exceed 10 (system safety)")]
    ExcessiveConcurrency,

    #[error("admission.max_queue_size ({queue}) must not be below max_concurrent ({concurrent})")]
    QueueSmallerThanLimit { queue: u32, concurrent: u32 },

    #[error("stream.poll_interval_ms must be at least 10")]
    PollTooFast,

    #[error("stream.stall_ticks must be at least 1")]
    NoStallBudget,

    #[error("store.job_ttl_secs must be at least 60")]
    TtlTooShort,
}

/// Validate cross-field constraints the type system cannot express.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.admission.max_concurrent < 1 {
        return Err(ValidationError::NoConcurrency);
    }
    if config.admission.max_concurrent > 10 {
        return Err(ValidationError::ExcessiveConcurrency);
    }
    if config.admission.max_queue_size < config.admission.max_concurrent {
        return Err(ValidationError::QueueSmallerThanLimit {
            queue: config.admission.max_queue_size,
            concurrent: config.admission.max_concurrent,
        });
    }
    if config.stream.poll_interval_ms < 10 {
        return Err(ValidationError::PollTooFast);
    }
    if config.stream.stall_ticks < 1 {
        return Err(ValidationError::NoStallBudget);
    }
    if config.store.job_ttl_secs < 60 {
        return Err(ValidationError::TtlTooShort);
    }
    Ok(())
}
