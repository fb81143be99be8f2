use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    /// A signal/sentiment provider could not answer. Recoverable: the
    /// combiner drops the provider and renormalizes remaining weights.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// No real data exists for the request. Recoverable at batch level:
    /// skip the symbol and continue. Never substituted with synthetic data.
    #[error("No data available: {0}")]
    NoDataAvailable(String),

    /// Outcome validation requested before the record's target time.
    /// Expected during normal operation, not a failure.
    #[error("Validation pending: target time not yet reached")]
    ValidationPending,

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// A write conflicted with an existing record. Fatal for that key only.
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    StoreError(String),
}
