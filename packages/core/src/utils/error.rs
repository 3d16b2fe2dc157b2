// Типы ошибок

use crate::error::CryptoError;
use crate::transfer::status::FileStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("Cryptography error: {0}")]
    CryptoError(#[from] CryptoError),

    /// Чанк пришёл вне допустимого окна переупорядочивания
    #[error("Chunk {got} outside accepted window (next expected {expected}, window {window})")]
    SequenceError { expected: u64, got: u64, window: u32 },

    #[error("Declared size {declared} bytes exceeds configured maximum {max} bytes")]
    SizeExceededError { declared: u64, max: u64 },

    /// Отправитель объявил конец, а данных меньше заявленного
    #[error("Transfer incomplete: received {received} of {declared} bytes")]
    IncompleteTransfer { received: u64, declared: u64 },

    #[error("Transfer cancelled")]
    CancelledError,

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: FileStatus, to: FileStatus },

    /// Запрос не имеет смысла для этой записи (не та сторона, дубликат)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<tokio::task::JoinError> for ShareError {
    fn from(err: tokio::task::JoinError) -> Self {
        ShareError::InternalError(format!("Blocking crypto task failed: {}", err))
    }
}

impl From<rmp_serde::encode::Error> for ShareError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ShareError::SerializationError(format!("MessagePack pack error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for ShareError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ShareError::SerializationError(format!("MessagePack unpack error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;
