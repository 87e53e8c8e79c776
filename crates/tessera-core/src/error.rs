use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("value out of field range: {0}")]
    FieldOutOfRange(String),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("hash error: {0}")]
    Hash(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid did: {0}")]
    InvalidDid(String),

    #[error("unsupported did type: {0}")]
    UnsupportedDidType(String),

    #[error("invalid curve point")]
    InvalidPoint,

    #[error("unknown circuit: {0}")]
    UnknownCircuit(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
