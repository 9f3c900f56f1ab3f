//! Client error type.

use freqadmin_shared::{ApiError, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invalid page request: page {page}, page size {page_size}")]
    InvalidPage { page: u32, page_size: u32 },
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
