//! Manager that only builds an eager manager once the host has work to do.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use exthost_rpc::ResponsiveState;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ManagerError;
use crate::extensions::{
    ExtensionDescription, ExtensionDescriptionDelta, ExtensionHostExtensions, ExtensionIdentifier,
};
use crate::host::{
    ExitEvent, ExtensionHost, ExtensionHostKind, ExtensionHostStartup, ExtensionRunningLocation,
};
use crate::manager::{ExtensionHostManager, HostManager, LatencyMeasurement, ManagerDeps};
use crate::proxy::{ActivationKind, ExtensionActivationReason, ResolveAuthorityResult};

/// Opens once and stays open.
struct Barrier {
    open: watch::Sender<bool>,
}

impl Barrier {
    fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self { open }
    }

    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    fn open(&self) {
        self.open.send_replace(true);
    }

    async fn wait(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }
}

fn join_ids(ids: &[ExtensionIdentifier]) -> String {
    ids.iter()
        .map(ExtensionIdentifier::value)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Defers starting its host until `start` or a later delta assigns it an extension.
///
/// Operations that depend on the start decision wait until `start` was called.
pub struct LazyExtensionHostManager {
    host: Arc<dyn ExtensionHost>,
    deps: ManagerDeps,
    start_called: Barrier,
    // Lock order: `actual` before `lazy_start_extensions`.
    actual: Mutex<Option<ExtensionHostManager>>,
    lazy_start_extensions: Mutex<Option<ExtensionHostExtensions>>,
    responsive: Arc<watch::Sender<ResponsiveState>>,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl LazyExtensionHostManager {
    pub fn new(host: Arc<dyn ExtensionHost>, deps: ManagerDeps) -> Self {
        let (responsive, _) = watch::channel(ResponsiveState::Responsive);
        Self {
            host,
            deps,
            start_called: Barrier::new(),
            actual: Mutex::new(None),
            lazy_start_extensions: Mutex::new(None),
            responsive: Arc::new(responsive),
            shutdown: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// The eager manager, once one was created.
    #[must_use]
    pub fn actual(&self) -> Option<ExtensionHostManager> {
        self.actual.lock().clone()
    }

    /// Must be called with the `actual` slot locked and empty.
    fn create_actual(
        &self,
        slot: &mut Option<ExtensionHostManager>,
        reason: &str,
    ) -> ExtensionHostManager {
        info!("Creating lazy extension host: {reason}");
        let actual = ExtensionHostManager::new(self.host.clone(), Vec::new(), self.deps.clone());
        if self.disposed.load(Ordering::SeqCst) {
            actual.dispose();
        }

        let mut source = actual.subscribe_responsive_state();
        let target = self.responsive.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    changed = source.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *source.borrow_and_update();
                        target.send_replace(state);
                    }
                }
            }
        });

        *slot = Some(actual.clone());
        actual
    }

    async fn actual_after_start(&self) -> Option<ExtensionHostManager> {
        self.start_called.wait().await;
        self.actual()
    }
}

#[async_trait]
impl HostManager for LazyExtensionHostManager {
    fn kind(&self) -> ExtensionHostKind {
        self.host.running_location().kind
    }

    fn startup(&self) -> ExtensionHostStartup {
        self.host.startup()
    }

    fn represents_running_location(&self, location: &ExtensionRunningLocation) -> bool {
        self.host.running_location() == *location
    }

    fn subscribe_exit(&self) -> watch::Receiver<Option<ExitEvent>> {
        self.host.subscribe_exit()
    }

    fn subscribe_responsive_state(&self) -> watch::Receiver<ResponsiveState> {
        self.responsive.subscribe()
    }

    async fn ready(&self) -> Result<(), ManagerError> {
        match self.actual_after_start().await {
            Some(actual) => actual.ready().await,
            None => Ok(()),
        }
    }

    async fn start(
        &self,
        all: Vec<ExtensionDescription>,
        mine: Vec<ExtensionIdentifier>,
    ) -> Result<(), ManagerError> {
        if mine.is_empty() {
            let mut extensions = ExtensionHostExtensions::new();
            extensions.set(all, mine);
            *self.lazy_start_extensions.lock() = Some(extensions);
            self.start_called.open();
            return Ok(());
        }

        let actual = {
            let mut slot = self.actual.lock();
            match slot.as_ref() {
                Some(actual) => actual.clone(),
                None => {
                    let reason =
                        format!("contains {} extension(s): {}.", mine.len(), join_ids(&mine));
                    self.create_actual(&mut slot, &reason)
                }
            }
        };
        self.start_called.open();
        actual.start(all, mine).await
    }

    async fn delta_extensions(&self, delta: ExtensionDescriptionDelta) -> Result<(), ManagerError> {
        self.start_called.wait().await;
        let (actual, initial) = {
            let mut slot = self.actual.lock();
            if let Some(actual) = slot.as_ref() {
                (actual.clone(), None)
            } else {
                let mut lazy = self.lazy_start_extensions.lock();
                let extensions = lazy.get_or_insert_with(ExtensionHostExtensions::new);
                extensions.delta(&delta);
                if delta.my_to_add.is_empty() {
                    return Ok(());
                }
                let reason = format!(
                    "contains {} new extension(s) (installed or enabled): {}",
                    delta.my_to_add.len(),
                    join_ids(&delta.my_to_add)
                );
                let initial = extensions.to_delta();
                (self.create_actual(&mut slot, &reason), Some(initial))
            }
        };
        match initial {
            Some(initial) => actual.start(initial.to_add, initial.my_to_add).await,
            None => actual.delta_extensions(delta).await,
        }
    }

    fn contains_extension(&self, id: &ExtensionIdentifier) -> bool {
        self.host.extensions().lock().contains_extension(id)
    }

    async fn activate(
        &self,
        extension: &ExtensionIdentifier,
        reason: &ExtensionActivationReason,
    ) -> Result<bool, ManagerError> {
        match self.actual_after_start().await {
            Some(actual) => actual.activate(extension, reason).await,
            None => Ok(false),
        }
    }

    async fn activate_by_event(
        &self,
        activation_event: &str,
        kind: ActivationKind,
    ) -> Result<(), ManagerError> {
        let actual = if kind == ActivationKind::Immediate {
            self.actual()
        } else {
            self.actual_after_start().await
        };
        match actual {
            Some(actual) => actual.activate_by_event(activation_event, kind).await,
            None => Ok(()),
        }
    }

    fn activation_event_is_done(&self, activation_event: &str) -> bool {
        if !self.start_called.is_open() {
            return false;
        }
        self.actual()
            .is_none_or(|actual| actual.activation_event_is_done(activation_event))
    }

    async fn get_inspect_port(&self, try_enable_inspector: bool) -> u16 {
        match self.actual_after_start().await {
            Some(actual) => actual.get_inspect_port(try_enable_inspector).await,
            None => 0,
        }
    }

    async fn resolve_authority(
        &self,
        remote_authority: &str,
        resolve_attempt: u32,
    ) -> ResolveAuthorityResult {
        match self.actual_after_start().await {
            Some(actual) => {
                actual
                    .resolve_authority(remote_authority, resolve_attempt)
                    .await
            }
            None => ResolveAuthorityResult::unknown("Cannot resolve authority", None),
        }
    }

    async fn get_canonical_uri(
        &self,
        remote_authority: &str,
        uri: &str,
    ) -> Result<Option<String>, ManagerError> {
        match self.actual_after_start().await {
            Some(actual) => actual.get_canonical_uri(remote_authority, uri).await,
            None => Err(ManagerError::CannotResolveCanonicalUri),
        }
    }

    async fn extension_tests_execute(&self) -> Result<i32, ManagerError> {
        self.start_called.wait().await;
        let (actual, created) = {
            let mut slot = self.actual.lock();
            match slot.as_ref() {
                Some(actual) => (actual.clone(), false),
                None => (self.create_actual(&mut slot, "execute tests."), true),
            }
        };
        if created {
            actual.start(Vec::new(), Vec::new()).await?;
        }
        actual.extension_tests_execute().await
    }

    async fn set_remote_environment(
        &self,
        env: BTreeMap<String, Option<String>>,
    ) -> Result<(), ManagerError> {
        match self.actual_after_start().await {
            Some(actual) => actual.set_remote_environment(env).await,
            None => Ok(()),
        }
    }

    async fn measure(&self) -> Result<Option<LatencyMeasurement>, ManagerError> {
        match self.actual() {
            Some(actual) => actual.measure().await,
            None => Ok(None),
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        match self.actual() {
            Some(actual) => actual.dispose(),
            None => self.host.dispose(),
        }
    }
}

/// Picks the lazy manager for lazy hosts that have nothing to activate yet.
pub fn create_extension_host_manager(
    host: Arc<dyn ExtensionHost>,
    initial_activation_events: Vec<String>,
    deps: ManagerDeps,
) -> Arc<dyn HostManager> {
    if host.startup() == ExtensionHostStartup::Lazy && initial_activation_events.is_empty() {
        Arc::new(LazyExtensionHostManager::new(host, deps))
    } else {
        Arc::new(ExtensionHostManager::new(
            host,
            initial_activation_events,
            deps,
        ))
    }
}
