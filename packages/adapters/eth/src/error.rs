use alloy::transports::{RpcError, TransportErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error: {msg}, recoverable: {recoverable}")]
    Network { msg: String, recoverable: bool },
    #[error("transaction rejected: {0}")]
    TxExecution(String),
    #[error("other error: {0}")]
    Other(String),
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        match err {
            RpcError::ErrorResp(err) if err.code >= -32613 && err.code <= -32000 => {
                Self::TxExecution(err.message.to_string())
            }
            RpcError::Transport(
                TransportErrorKind::BackendGone | TransportErrorKind::PubsubUnavailable,
            ) => Self::Network {
                msg: err.to_string(),
                recoverable: false,
            },
            _ => Self::Network {
                msg: err.to_string(),
                recoverable: true,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// The node is the only thing behind this adapter, so every failure is a provider failure.
impl From<Error> for services::Error {
    fn from(err: Error) -> Self {
        Self::Provider(err.to_string())
    }
}
