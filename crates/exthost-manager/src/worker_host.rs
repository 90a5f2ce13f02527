//! In-process extension host connected through an in-memory channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use exthost_rpc::{in_memory_pair, ChannelTransport, MessagePassingProtocol, RpcProtocol};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::HostError;
use crate::extensions::ExtensionHostExtensions;
use crate::host::{
    ExitEvent, ExtensionHost, ExtensionHostKind, ExtensionHostStartup, ExtensionRunningLocation,
};

/// Builds the remote side on the far end of the channel.
pub type WorkerSetup = Arc<dyn Fn(ChannelTransport) -> Result<RpcProtocol, HostError> + Send + Sync>;

pub struct WorkerExtensionHost {
    location: ExtensionRunningLocation,
    startup: ExtensionHostStartup,
    setup: WorkerSetup,
    extensions: Mutex<ExtensionHostExtensions>,
    remote: Mutex<Option<RpcProtocol>>,
    started: AtomicBool,
    disposed: AtomicBool,
    exit: watch::Sender<Option<ExitEvent>>,
}

impl WorkerExtensionHost {
    pub fn new(startup: ExtensionHostStartup, affinity: u32, setup: WorkerSetup) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            location: ExtensionRunningLocation::new(ExtensionHostKind::LocalWebWorker, affinity),
            startup,
            setup,
            extensions: Mutex::new(ExtensionHostExtensions::new()),
            remote: Mutex::new(None),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            exit,
        }
    }

    /// Ends the worker as if it crashed with `code`.
    pub fn terminate(&self, code: i32) {
        if let Some(remote) = self.remote.lock().take() {
            remote.dispose();
        }
        self.exit.send_replace(Some(ExitEvent { code, signal: None }));
    }
}

#[async_trait]
impl ExtensionHost for WorkerExtensionHost {
    fn running_location(&self) -> ExtensionRunningLocation {
        self.location
    }

    fn startup(&self) -> ExtensionHostStartup {
        self.startup
    }

    fn extensions(&self) -> &Mutex<ExtensionHostExtensions> {
        &self.extensions
    }

    async fn start(&self) -> Result<Arc<dyn MessagePassingProtocol>, HostError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(HostError::Disposed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HostError::AlreadyStarted);
        }
        let (local, remote) = in_memory_pair();
        let remote = (self.setup)(remote)?;
        *self.remote.lock() = Some(remote);
        debug!("worker extension host started");
        Ok(Arc::new(local))
    }

    fn subscribe_exit(&self) -> watch::Receiver<Option<ExitEvent>> {
        self.exit.subscribe()
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(remote) = self.remote.lock().take() {
            remote.dispose();
        }
    }
}
