//! Ошибки движка KVS.
//!
//! Таксономия статусов:
//! - NotFound          : ключа нет или он удалён (tombstone);
//! - DataLoss          : чексумма не сошлась, запись нечитаема, коллизия при скане;
//! - ResourceExhausted : мал буфер, переполнен индекс, нет места на flash;
//! - FailedPrecondition: store не инициализирован / нет запаса свободного сектора;
//! - InvalidArgument   : некорректные размеры ключа/значения, конфигурация;
//! - AlreadyExists     : 32-битный hash ключа совпал с другим ключом;
//! - Storage           : ошибки flash-коллаборатора, пробрасываются без изменений.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("data loss: {0}")]
    DataLoss(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("key hash collides with a different stored key")]
    AlreadyExists,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn data_loss(msg: impl Into<String>) -> Self {
        Error::DataLoss(msg.into())
    }

    pub(crate) fn exhausted(msg: impl Into<String>) -> Self {
        Error::ResourceExhausted(msg.into())
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Error::FailedPrecondition(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    #[inline]
    pub fn is_data_loss(&self) -> bool {
        matches!(self, Error::DataLoss(_))
    }

    #[inline]
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Error::ResourceExhausted(_))
    }
}
