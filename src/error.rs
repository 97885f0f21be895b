use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("Goal is unreachable ({function}): {details}")]
    UnreachableGoal {
        function: &'static str,
        details: String,
    },

    #[error("Invalid number of periods {0}: must be positive")]
    InvalidPeriods(i64),

    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("Invalid month {month} in year {year}: must be between 1 and 12")]
    InvalidMonth { year: i32, month: u32 },

    #[error("No micro investment plans provided")]
    NoMicroPlans,

    #[error("Validation error for {entity}: {details}")]
    ValidationError { entity: String, details: String },

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Rate provider error: {0}")]
    RateProviderError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlanningError>;
