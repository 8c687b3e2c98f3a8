use crate::backend::LocalForkId;
use alloy_primitives::Address;

/// Result alias with `BackendError` as error
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can happen when working with the [`Backend`](crate::backend::Backend)
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Message(String),
    #[error(
        "new nonce ({requested}) must be strictly equal to or higher than the account's current nonce ({current}) for {address}"
    )]
    InvalidNonce { address: Address, current: u64, requested: u64 },
    #[error("nonce of {0} cannot be incremented past {max}", max = u64::MAX)]
    NonceOverflow(Address),
    #[error("no matching fork found for {0}")]
    UnknownEnvironment(LocalForkId),
    #[error("`{0}` is neither a registered fork URL nor an alias")]
    UnknownSource(String),
    #[error(transparent)]
    Provider(#[from] eyre::Report),
}

impl BackendError {
    /// Create a new error with a message
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

impl From<String> for BackendError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for BackendError {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}
