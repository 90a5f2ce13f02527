//! Tree view errors.

use exthost_rpc::RpcError;
use thiserror::Error;

/// Failure raised by a tree data provider or a drop controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl From<&str> for ProviderError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for ProviderError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeViewError {
    #[error("No tree view with id '{0}' registered.")]
    NotRegistered(String),

    /// Two elements of one fetch carried the same explicit id.
    #[error("Element with id {0} is already registered")]
    DuplicateElement(String),

    #[error("Required registered TreeDataProvider to implement 'getParent' method to access 'reveal' method")]
    GetParentRequired,

    #[error("Cannot resolve tree item for element {0}")]
    CannotResolve(String),

    #[error("invalid drag and drop payload: {0}")]
    InvalidTransfer(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl From<serde_json::Error> for TreeViewError {
    fn from(err: serde_json::Error) -> Self {
        Self::Rpc(err.into())
    }
}

impl From<TreeViewError> for RpcError {
    fn from(err: TreeViewError) -> Self {
        match err {
            TreeViewError::Rpc(err) => err,
            other => RpcError::remote(other.to_string()),
        }
    }
}
