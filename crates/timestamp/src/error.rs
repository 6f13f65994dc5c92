#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("Overflow in adding/subtracting a Duration")]
    Overflow,
    #[cfg(feature = "now")]
    #[error("Could not parse timestamp: {0}")]
    Parse(String),
}

pub type TimestampResult<T> = Result<T, TimestampError>;
