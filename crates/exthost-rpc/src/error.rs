//! RPC errors.

use thiserror::Error;

use crate::protocol::RpcErrorPayload;

/// Errors produced by the RPC layer.
///
/// Cloneable so a single failure can be handed to every caller awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The protocol was disposed before a reply arrived.
    #[error("RPC protocol is disposed")]
    Disposed,

    /// The caller cancelled the request.
    #[error("request canceled")]
    Canceled,

    /// The underlying transport stopped accepting messages.
    #[error("transport closed")]
    TransportClosed,

    /// Identifiers expected by one side that the other side never registered.
    #[error("missing actors: {}", .0.join(", "))]
    MissingIdentifiers(Vec<String>),

    /// A request targeted a numeric id that is not part of the known set.
    #[error("unknown actor with rpc id {0}")]
    UnknownRpcId(u32),

    /// A request targeted a known identifier that has no local instance.
    #[error("no instance registered for actor '{0}'")]
    NotRegistered(String),

    /// The handler does not implement the requested method.
    #[error("unknown method '{method}' on actor '{actor}'")]
    UnknownMethod { actor: String, method: String },

    /// Arguments could not be decoded into the expected shape.
    #[error("invalid arguments for '{method}': {message}")]
    InvalidArguments { method: String, message: String },

    /// The remote side answered with a structured error.
    #[error("{}", .0.message)]
    Remote(RpcErrorPayload),

    /// A payload that is not a valid envelope, or a result of the wrong shape.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl RpcError {
    /// Converts the error into the wire shape sent with `replyErr`.
    #[must_use]
    pub fn to_payload(&self) -> RpcErrorPayload {
        match self {
            Self::Remote(payload) => payload.clone(),
            Self::Canceled => RpcErrorPayload::new("Canceled", "Canceled"),
            other => RpcErrorPayload::new("Error", other.to_string()),
        }
    }

    /// Maps a `replyErr` payload back to an error value.
    #[must_use]
    pub fn from_payload(payload: RpcErrorPayload) -> Self {
        if payload.name == "Canceled" {
            return Self::Canceled;
        }
        Self::Remote(payload)
    }

    /// Remote-side failure with an arbitrary message.
    #[must_use]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(RpcErrorPayload::new("Error", message))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
