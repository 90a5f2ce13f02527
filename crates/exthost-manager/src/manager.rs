//! Eager extension host manager.
//!
//! Construction starts the host at once. Every operation waits for the start
//! to settle and degrades to a no-op when the host never came up.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use exthost_rpc::{
    dispose_all, main_context, Customer, CustomerContext, CustomerRegistry, MessagePassingProtocol,
    ResponsiveState, RpcError, RpcLogger, RpcProtocol, TelemetryRpcLogger, TelemetryService,
    TracingRpcLogger,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ManagerConfig;
use crate::error::{HostError, ManagerError};
use crate::extensions::{ExtensionDescription, ExtensionDescriptionDelta, ExtensionIdentifier};
use crate::host::{
    ExitEvent, ExtensionHost, ExtensionHostKind, ExtensionHostStartup, ExtensionRunningLocation,
};
use crate::proxy::{
    error_detail, remote_authority_prefix, ActivationKind, ExtensionActivationReason,
    ExtensionHostProxy, ResolveAuthorityResult,
};

const STARTUP_EVENT: &str = "extensionHostStartup";

/// What a manager needs besides the host itself.
#[derive(Clone)]
pub struct ManagerDeps {
    pub customers: CustomerRegistry,
    pub telemetry: Arc<dyn TelemetryService>,
    pub config: ManagerConfig,
}

/// Uniform surface of the eager and lazy managers.
#[async_trait]
pub trait HostManager: Send + Sync {
    fn kind(&self) -> ExtensionHostKind;

    fn startup(&self) -> ExtensionHostStartup;

    fn represents_running_location(&self, location: &ExtensionRunningLocation) -> bool;

    fn subscribe_exit(&self) -> watch::Receiver<Option<ExitEvent>>;

    fn subscribe_responsive_state(&self) -> watch::Receiver<ResponsiveState>;

    /// Resolves once the host started or failed to start.
    async fn ready(&self) -> Result<(), ManagerError>;

    async fn start(
        &self,
        all: Vec<ExtensionDescription>,
        mine: Vec<ExtensionIdentifier>,
    ) -> Result<(), ManagerError>;

    async fn delta_extensions(&self, delta: ExtensionDescriptionDelta) -> Result<(), ManagerError>;

    /// Answered from local bookkeeping; never waits for the host.
    fn contains_extension(&self, id: &ExtensionIdentifier) -> bool;

    /// `false` when the host never started.
    async fn activate(
        &self,
        extension: &ExtensionIdentifier,
        reason: &ExtensionActivationReason,
    ) -> Result<bool, ManagerError>;

    async fn activate_by_event(
        &self,
        activation_event: &str,
        kind: ActivationKind,
    ) -> Result<(), ManagerError>;

    fn activation_event_is_done(&self, activation_event: &str) -> bool;

    /// `0` when no inspector is available.
    async fn get_inspect_port(&self, try_enable_inspector: bool) -> u16;

    async fn resolve_authority(
        &self,
        remote_authority: &str,
        resolve_attempt: u32,
    ) -> ResolveAuthorityResult;

    async fn get_canonical_uri(
        &self,
        remote_authority: &str,
        uri: &str,
    ) -> Result<Option<String>, ManagerError>;

    async fn extension_tests_execute(&self) -> Result<i32, ManagerError>;

    async fn set_remote_environment(
        &self,
        env: BTreeMap<String, Option<String>>,
    ) -> Result<(), ManagerError>;

    async fn measure(&self) -> Result<Option<LatencyMeasurement>, ManagerError>;

    fn dispose(&self);
}

/// Round trip and bandwidth to one host.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyMeasurement {
    pub remote_authority: Option<String>,
    pub latency_ms: f64,
    pub up_bps: f64,
    pub down_bps: f64,
}

impl fmt::Display for LatencyMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(authority) = &self.remote_authority {
            writeln!(f, "Authority: {authority}")?;
        }
        writeln!(f, "Roundtrip latency: {:.3}ms", self.latency_ms)?;
        writeln!(f, "Up: {}", format_speed(self.up_bps))?;
        writeln!(f, "Down: {}", format_speed(self.down_bps))
    }
}

fn format_speed(bps: f64) -> String {
    if bps <= 1024.0 {
        format!("{bps} bps")
    } else if bps < 1024.0 * 1024.0 {
        format!("{:.1} kbps", bps / 1024.0)
    } else {
        format!("{:.1} Mbps", bps / 1024.0 / 1024.0)
    }
}

/// Bits per second for `bytes` transferred in `elapsed`.
fn bits_per_second(bytes: usize, elapsed: Duration) -> f64 {
    let millis = (elapsed.as_secs_f64() * 1000.0).max(1e-3);
    (bytes as f64 * 1000.0 * 8.0) / millis
}

#[derive(Clone)]
enum StartState {
    Starting,
    Started(ExtensionHostProxy),
    Failed,
    /// The channel came up but a main-side identifier has no customer.
    WiringDefect(RpcError),
    Disposed,
}

type ActivationFuture = Shared<BoxFuture<'static, Result<(), ManagerError>>>;

struct ManagerInner {
    host: Arc<dyn ExtensionHost>,
    deps: ManagerDeps,
    state: watch::Sender<StartState>,
    rpc: Mutex<Option<RpcProtocol>>,
    customers: Mutex<Vec<Arc<dyn Customer>>>,
    activations: Mutex<FxHashMap<String, ActivationFuture>>,
    resolved: Mutex<FxHashSet<String>>,
    responsive: Arc<watch::Sender<ResponsiveState>>,
    start_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl ManagerInner {
    fn location(&self) -> ExtensionRunningLocation {
        self.host.running_location()
    }

    fn log_startup(&self, action: &str, err: Option<&HostError>) {
        let mut data = json!({
            "time": now_millis(),
            "action": action,
            "kind": self.location().kind.to_string(),
        });
        if let Some(err) = err {
            data["errorName"] = Value::from(err.name());
            data["errorMessage"] = Value::from(err.to_string());
        }
        self.deps.telemetry.public_log(STARTUP_EVENT, data);
    }

    /// Builds the channel and its customers; fails on a wiring defect.
    fn create_customers(
        &self,
        transport: Arc<dyn MessagePassingProtocol>,
    ) -> Result<ExtensionHostProxy, RpcError> {
        let settings = &self.deps.config.rpc;
        let logger: Option<Arc<dyn RpcLogger>> = if settings.log_communication {
            Some(Arc::new(TracingRpcLogger::new()))
        } else if TelemetryRpcLogger::is_enabled(settings.telemetry_sample_rate) {
            Some(Arc::new(TelemetryRpcLogger::new(
                self.deps.telemetry.clone(),
            )))
        } else {
            None
        };

        let rpc = RpcProtocol::new(transport, settings.options(), logger);
        *self.rpc.lock() = Some(rpc.clone());
        self.forward_responsive_state(&rpc);

        let context = CustomerContext::new(
            rpc.clone(),
            self.host.remote_authority(),
            self.location().kind.to_string(),
        );
        let customers = self.deps.customers.instantiate(&context);
        self.customers.lock().extend(customers);

        rpc.assert_registered(main_context::ALL)?;
        Ok(ExtensionHostProxy::new(&rpc))
    }

    fn forward_responsive_state(&self, rpc: &RpcProtocol) {
        let mut source = rpc.subscribe_responsive_state();
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
    }

    /// Disposes the channel and the customers bound to it.
    fn release_channel(&self) {
        if let Some(rpc) = self.rpc.lock().take() {
            rpc.dispose();
        }
        let customers = std::mem::take(&mut *self.customers.lock());
        dispose_all(&customers);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

async fn run_start(
    weak: Weak<ManagerInner>,
    host: Arc<dyn ExtensionHost>,
    initial_activation_events: Vec<String>,
) {
    let started = host.start().await;
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if inner.disposed.load(Ordering::SeqCst) {
        return;
    }
    let location = inner.location();
    let transport = match started {
        Ok(transport) => transport,
        Err(err) => {
            error!("Error received from starting extension host (kind: {location}): {err}");
            inner.log_startup("error", Some(&err));
            inner.state.send_replace(StartState::Failed);
            return;
        }
    };
    inner.log_startup("success", None);

    let state = match inner.create_customers(transport) {
        Ok(proxy) => StartState::Started(proxy),
        Err(err) => {
            error!("extension host {location} is missing main-side customers: {err}");
            StartState::WiringDefect(err)
        }
    };
    if inner.disposed.load(Ordering::SeqCst) {
        inner.release_channel();
        return;
    }
    inner.state.send_replace(state);

    let manager = ExtensionHostManager { inner };
    for event in initial_activation_events {
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(err) = manager.activate_by_event(&event, ActivationKind::Normal).await {
                error!("activating '{event}' failed: {err}");
            }
        });
    }
}

/// Owns one extension host, its channel and its customers.
#[derive(Clone)]
pub struct ExtensionHostManager {
    inner: Arc<ManagerInner>,
}

impl ExtensionHostManager {
    /// Starts `host` on the current runtime.
    ///
    /// `initial_activation_events` are activated once the host is up.
    pub fn new(
        host: Arc<dyn ExtensionHost>,
        initial_activation_events: Vec<String>,
        deps: ManagerDeps,
    ) -> Self {
        let (state, _) = watch::channel(StartState::Starting);
        let (responsive, _) = watch::channel(ResponsiveState::Responsive);
        let inner = Arc::new(ManagerInner {
            host: host.clone(),
            deps,
            state,
            rpc: Mutex::new(None),
            customers: Mutex::new(Vec::new()),
            activations: Mutex::new(FxHashMap::default()),
            resolved: Mutex::new(FxHashSet::default()),
            responsive: Arc::new(responsive),
            start_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        });
        inner.log_startup("starting", None);

        let task = tokio::spawn(run_start(
            Arc::downgrade(&inner),
            host,
            initial_activation_events,
        ));
        *inner.start_task.lock() = Some(task);
        Self { inner }
    }

    /// Whether the host itself came up, regardless of customer wiring.
    #[must_use]
    pub fn has_started(&self) -> bool {
        matches!(
            *self.inner.state.borrow(),
            StartState::Started(_) | StartState::WiringDefect(_)
        )
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Waits for the start to settle. `None` when the host never started.
    async fn proxy(&self) -> Result<Option<ExtensionHostProxy>, ManagerError> {
        let mut state = self.inner.state.subscribe();
        let settled = match state.wait_for(|state| !matches!(state, StartState::Starting)).await {
            Ok(settled) => settled.clone(),
            Err(_) => StartState::Disposed,
        };
        match settled {
            StartState::Started(proxy) => Ok(Some(proxy)),
            StartState::WiringDefect(err) => Err(ManagerError::Wiring(err)),
            StartState::Starting | StartState::Failed | StartState::Disposed => Ok(None),
        }
    }

    fn activation_future(&self, activation_event: &str, kind: ActivationKind) -> ActivationFuture {
        let weak = Arc::downgrade(&self.inner);
        let activation_event = activation_event.to_string();
        async move {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let manager = ExtensionHostManager { inner };
            let Some(proxy) = manager.proxy().await? else {
                return Ok(());
            };
            proxy.activate_by_event(&activation_event, kind).await?;
            manager.inner.resolved.lock().insert(activation_event);
            Ok(())
        }
        .boxed()
        .shared()
    }

    async fn measure_latency(&self, proxy: &ExtensionHostProxy) -> Result<f64, ManagerError> {
        let rounds = self.inner.deps.config.host.latency_probe_rounds.max(1);
        let mut total = Duration::ZERO;
        for round in 0..rounds {
            let started = Instant::now();
            proxy.test_latency(round).await?;
            total += started.elapsed();
        }
        Ok(total.as_secs_f64() * 1000.0 / f64::from(rounds))
    }

    async fn measure_up(&self, proxy: &ExtensionHostProxy) -> Result<f64, ManagerError> {
        let size = self.inner.deps.config.host.latency_probe_bytes;
        let fill = char::from(b'a' + rand::random::<u8>() % 26);
        let payload: String = std::iter::repeat_n(fill, size).collect();
        let started = Instant::now();
        proxy.test_up(payload).await?;
        Ok(bits_per_second(size, started.elapsed()))
    }

    async fn measure_down(&self, proxy: &ExtensionHostProxy) -> Result<f64, ManagerError> {
        let size = self.inner.deps.config.host.latency_probe_bytes;
        let started = Instant::now();
        proxy.test_down(size).await?;
        Ok(bits_per_second(size, started.elapsed()))
    }
}

#[async_trait]
impl HostManager for ExtensionHostManager {
    fn kind(&self) -> ExtensionHostKind {
        self.inner.location().kind
    }

    fn startup(&self) -> ExtensionHostStartup {
        self.inner.host.startup()
    }

    fn represents_running_location(&self, location: &ExtensionRunningLocation) -> bool {
        self.inner.location() == *location
    }

    fn subscribe_exit(&self) -> watch::Receiver<Option<ExitEvent>> {
        self.inner.host.subscribe_exit()
    }

    fn subscribe_responsive_state(&self) -> watch::Receiver<ResponsiveState> {
        self.inner.responsive.subscribe()
    }

    async fn ready(&self) -> Result<(), ManagerError> {
        self.proxy().await.map(drop)
    }

    async fn start(
        &self,
        all: Vec<ExtensionDescription>,
        mine: Vec<ExtensionIdentifier>,
    ) -> Result<(), ManagerError> {
        let Some(proxy) = self.proxy().await? else {
            return Ok(());
        };
        let delta = self.inner.host.extensions().lock().set(all, mine);
        proxy.start_extension_host(&delta).await?;
        Ok(())
    }

    async fn delta_extensions(&self, delta: ExtensionDescriptionDelta) -> Result<(), ManagerError> {
        let Some(proxy) = self.proxy().await? else {
            return Ok(());
        };
        self.inner.host.extensions().lock().delta(&delta);
        proxy.delta_extensions(&delta).await?;
        Ok(())
    }

    fn contains_extension(&self, id: &ExtensionIdentifier) -> bool {
        self.inner.host.extensions().lock().contains_extension(id)
    }

    async fn activate(
        &self,
        extension: &ExtensionIdentifier,
        reason: &ExtensionActivationReason,
    ) -> Result<bool, ManagerError> {
        let Some(proxy) = self.proxy().await? else {
            return Ok(false);
        };
        Ok(proxy.activate(extension, reason).await?)
    }

    async fn activate_by_event(
        &self,
        activation_event: &str,
        kind: ActivationKind,
    ) -> Result<(), ManagerError> {
        if kind == ActivationKind::Immediate && !self.has_started() {
            return Ok(());
        }
        let activation = {
            let mut activations = self.inner.activations.lock();
            activations
                .entry(activation_event.to_string())
                .or_insert_with(|| self.activation_future(activation_event, kind))
                .clone()
        };
        activation.await
    }

    fn activation_event_is_done(&self, activation_event: &str) -> bool {
        self.inner.resolved.lock().contains(activation_event)
    }

    async fn get_inspect_port(&self, try_enable_inspector: bool) -> u16 {
        if try_enable_inspector {
            self.inner.host.enable_inspect_port().await;
        }
        self.inner.host.inspect_port().unwrap_or(0)
    }

    async fn resolve_authority(
        &self,
        remote_authority: &str,
        resolve_attempt: u32,
    ) -> ResolveAuthorityResult {
        let started = Instant::now();
        let prefix = format!(
            "[{}][resolveAuthority({},{resolve_attempt})]",
            self.inner.location(),
            remote_authority_prefix(remote_authority),
        );
        let log_info = |message: &str| {
            info!("{prefix}[{}ms] {message}", started.elapsed().as_millis());
        };
        let log_error = |message: &str| {
            error!("{prefix}[{}ms] {message}", started.elapsed().as_millis());
        };

        log_info("obtaining proxy...");
        let proxy = match self.proxy().await {
            Ok(Some(proxy)) => proxy,
            Ok(None) => {
                log_error("no proxy");
                return ResolveAuthorityResult::unknown("Cannot resolve authority", None);
            }
            Err(err) => {
                log_error(&format!("no proxy: {err}"));
                return ResolveAuthorityResult::unknown(err.to_string(), None);
            }
        };

        log_info("invoking...");
        let heartbeat = self.inner.deps.config.host.resolve_heartbeat;
        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        let call = proxy.resolve_authority(remote_authority, resolve_attempt);
        tokio::pin!(call);
        let result = loop {
            tokio::select! {
                result = &mut call => break result,
                _ = ticker.tick() => log_info("waiting..."),
            }
        };

        match result {
            Ok(result) => {
                match &result {
                    ResolveAuthorityResult::Ok { value } => {
                        log_info(&format!("returned {}", value.authority.connect_to));
                    }
                    ResolveAuthorityResult::Error { error } => {
                        log_error(&format!("returned an error: {error:?}"));
                    }
                }
                result
            }
            Err(err) => {
                log_error(&format!("returned an error: {err}"));
                ResolveAuthorityResult::unknown(err.to_string(), Some(error_detail(&err)))
            }
        }
    }

    async fn get_canonical_uri(
        &self,
        remote_authority: &str,
        uri: &str,
    ) -> Result<Option<String>, ManagerError> {
        let Some(proxy) = self.proxy().await? else {
            return Err(ManagerError::CannotResolveCanonicalUri);
        };
        Ok(proxy.get_canonical_uri(remote_authority, uri).await?)
    }

    async fn extension_tests_execute(&self) -> Result<i32, ManagerError> {
        let Some(proxy) = self.proxy().await? else {
            return Err(ManagerError::NoProxy);
        };
        Ok(proxy.extension_tests_execute().await?)
    }

    async fn set_remote_environment(
        &self,
        env: BTreeMap<String, Option<String>>,
    ) -> Result<(), ManagerError> {
        let Some(proxy) = self.proxy().await? else {
            return Ok(());
        };
        Ok(proxy.set_remote_environment(&env).await?)
    }

    async fn measure(&self) -> Result<Option<LatencyMeasurement>, ManagerError> {
        let Some(proxy) = self.proxy().await? else {
            return Ok(None);
        };
        let latency_ms = self.measure_latency(&proxy).await?;
        let down_bps = self.measure_down(&proxy).await?;
        let up_bps = self.measure_up(&proxy).await?;
        Ok(Some(LatencyMeasurement {
            remote_authority: self.inner.host.remote_authority(),
            latency_ms,
            up_bps,
            down_bps,
        }))
    }

    fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = inner.start_task.lock().take() {
            task.abort();
        }
        inner.shutdown.cancel();
        inner.host.dispose();
        inner.release_channel();
        inner.activations.lock().clear();
        inner.state.send_replace(StartState::Disposed);
    }
}
