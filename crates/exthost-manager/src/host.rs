//! Remote execution contexts.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use exthost_rpc::MessagePassingProtocol;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::HostError;
use crate::extensions::ExtensionHostExtensions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtensionHostKind {
    LocalProcess,
    LocalWebWorker,
    Remote,
}

impl fmt::Display for ExtensionHostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LocalProcess => "LocalProcess",
            Self::LocalWebWorker => "LocalWebWorker",
            Self::Remote => "Remote",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionHostStartup {
    /// Started as soon as the workbench starts.
    EagerAutoStart,
    /// Started by the workbench when it decides to.
    EagerManualStart,
    /// Started only once an extension needs to run in it.
    Lazy,
}

/// Where a set of extensions runs: host kind plus an affinity slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionRunningLocation {
    pub kind: ExtensionHostKind,
    pub affinity: u32,
}

impl ExtensionRunningLocation {
    #[must_use]
    pub const fn new(kind: ExtensionHostKind, affinity: u32) -> Self {
        Self { kind, affinity }
    }
}

impl fmt::Display for ExtensionRunningLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.affinity)
    }
}

/// How a host went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    pub code: i32,
    pub signal: Option<String>,
}

/// A separate execution context running extension code.
#[async_trait]
pub trait ExtensionHost: Send + Sync {
    fn running_location(&self) -> ExtensionRunningLocation;

    fn startup(&self) -> ExtensionHostStartup;

    fn remote_authority(&self) -> Option<String> {
        None
    }

    /// Extension bookkeeping for this host.
    fn extensions(&self) -> &Mutex<ExtensionHostExtensions>;

    /// Launches the context and returns the channel to it once it is ready.
    async fn start(&self) -> Result<Arc<dyn MessagePassingProtocol>, HostError>;

    /// Carries `Some` once the context exited on its own.
    fn subscribe_exit(&self) -> watch::Receiver<Option<ExitEvent>>;

    async fn enable_inspect_port(&self) -> bool {
        false
    }

    fn inspect_port(&self) -> Option<u16> {
        None
    }

    fn dispose(&self);
}
