use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated codec input at bit {0}")]
    Truncated(usize),
    #[error("invalid codec input: {0}")]
    Invalid(String),
}
