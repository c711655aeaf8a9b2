//! Bridge error model.

use thiserror::Error;

use crate::invoker::RemoteError;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// The remote side rejected the call.
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// More than one trailing options argument was supplied.
    #[error("options must be an array with zero or one elements, got {0}")]
    InvalidOptionsOrCallback(usize),

    #[error("splitLongArray: bad params (max per chunk must be positive)")]
    InvalidChunkParams,

    #[error("bad params given to reduceCallbacks: {0}")]
    InvalidReduceParams(&'static str),

    #[error("callback invoked more than requested {expected} times")]
    CallbackOveruse { expected: usize },

    #[error("unexpected response from {method}: {detail}")]
    UnexpectedResponse { method: String, detail: String },

    /// The callback side of a spawned call went away before answering.
    #[error("remote call was dropped before completing")]
    Dropped,
}

impl RpcError {
    pub fn unexpected(method: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            method: method.into(),
            detail: detail.into(),
        }
    }
}
