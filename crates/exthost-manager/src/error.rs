//! Error types for extension hosts and their managers.

use std::time::Duration;

use exthost_rpc::RpcError;
use thiserror::Error;

/// Failures of a remote execution context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The host process could not be spawned.
    #[error("failed to spawn extension host: {0}")]
    Spawn(String),

    /// The host answered the startup handshake with something unexpected.
    #[error("extension host handshake failed: {0}")]
    Handshake(String),

    /// The host did not send a handshake message in time.
    #[error("the extension host took longer than {}s to send its {phase} message", .timeout.as_secs())]
    HandshakeTimeout {
        phase: &'static str,
        timeout: Duration,
    },

    /// `start` was called on a host that was already started.
    #[error("extension host was already started")]
    AlreadyStarted,

    /// The host was disposed before or during startup.
    #[error("extension host is disposed")]
    Disposed,

    /// Setting up the remote side of an in-process worker failed.
    #[error("worker setup failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl HostError {
    /// Stable name reported with startup telemetry.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "SpawnError",
            Self::Handshake(_) => "HandshakeError",
            Self::HandshakeTimeout { .. } => "HandshakeTimeout",
            Self::AlreadyStarted => "AlreadyStarted",
            Self::Disposed => "Disposed",
            Self::Worker(_) => "WorkerError",
            Self::Rpc(_) => "RpcError",
        }
    }
}

/// Failures surfaced by extension host managers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    /// A main-side identifier has no registered customer. Fatal for the channel.
    #[error("extension host wiring defect: {0}")]
    Wiring(RpcError),

    /// The host never started, so no canonical URI can be computed.
    #[error("Cannot resolve canonical URI")]
    CannotResolveCanonicalUri,

    /// The host never started, so there is no proxy to call.
    #[error("Could not obtain Extension Host Proxy")]
    NoProxy,

    #[error(transparent)]
    Rpc(#[from] RpcError),
}
