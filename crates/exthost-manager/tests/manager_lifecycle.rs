use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exthost_manager::{
    create_extension_host_manager, stub_worker_setup, workbench_customers, ActivationKind,
    ExitEvent, ExtensionDescription, ExtensionDescriptionDelta, ExtensionHost,
    ExtensionHostExtensions, ExtensionHostKind, ExtensionHostManager, ExtensionHostStartup,
    ExtensionIdentifier, ExtensionRunningLocation, HostError, HostManager,
    LazyExtensionHostManager, ManagerConfig, ManagerDeps, ManagerError,
    RemoteAuthorityResolverErrorCode, ResolveAuthorityResult, TracingExtensionService,
    WorkerExtensionHost,
};
use exthost_rpc::{
    arg, ext_host_context::EXT_HOST_EXTENSION_SERVICE, in_memory_pair, main_context,
    CancellationToken, Customer, CustomerError, CustomerRegistry, MemoryTelemetry,
    MessagePassingProtocol, RpcError, RpcHandler, RpcOptions, RpcProtocol,
};
use exthost_treeview::TracingTreeViewSink;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;

#[derive(Default)]
struct RecordingService {
    activations: AtomicUsize,
    started: Mutex<Vec<ExtensionDescriptionDelta>>,
    deltas: Mutex<Vec<ExtensionDescriptionDelta>>,
}

#[async_trait]
impl RpcHandler for RecordingService {
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        _token: CancellationToken,
    ) -> Result<Value, RpcError> {
        match method {
            "$activateByEvent" => {
                self.activations.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Value::Null)
            }
            "$startExtensionHost" => {
                self.started.lock().push(arg(method, &args, 0)?);
                Ok(Value::Null)
            }
            "$deltaExtensions" => {
                self.deltas.lock().push(arg(method, &args, 0)?);
                Ok(Value::Null)
            }
            "$activate" => Ok(json!(true)),
            "$resolveAuthority" => {
                let authority: String = arg(method, &args, 0)?;
                if authority.starts_with("broken") {
                    return Err(RpcError::remote("resolver crashed"));
                }
                tokio::time::sleep(Duration::from_millis(2500)).await;
                Ok(json!({
                    "type": "ok",
                    "value": {"authority": {"authority": authority, "connectTo": "localhost:8000"}}
                }))
            }
            other => Err(RpcError::UnknownMethod {
                actor: "RecordingService".to_string(),
                method: other.to_string(),
            }),
        }
    }
}

struct FakeHost {
    startup: ExtensionHostStartup,
    fail: bool,
    extensions: Mutex<ExtensionHostExtensions>,
    service: Arc<RecordingService>,
    remote: Mutex<Option<RpcProtocol>>,
    starts: AtomicUsize,
    disposals: AtomicUsize,
    exit: watch::Sender<Option<ExitEvent>>,
}

impl FakeHost {
    fn new(startup: ExtensionHostStartup, fail: bool) -> Arc<Self> {
        let (exit, _) = watch::channel(None);
        Arc::new(Self {
            startup,
            fail,
            extensions: Mutex::new(ExtensionHostExtensions::new()),
            service: Arc::new(RecordingService::default()),
            remote: Mutex::new(None),
            starts: AtomicUsize::new(0),
            disposals: AtomicUsize::new(0),
            exit,
        })
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtensionHost for FakeHost {
    fn running_location(&self) -> ExtensionRunningLocation {
        ExtensionRunningLocation::new(ExtensionHostKind::LocalProcess, 0)
    }

    fn startup(&self) -> ExtensionHostStartup {
        self.startup
    }

    fn extensions(&self) -> &Mutex<ExtensionHostExtensions> {
        &self.extensions
    }

    async fn start(&self) -> Result<Arc<dyn MessagePassingProtocol>, HostError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(HostError::Spawn("no such program".to_string()));
        }
        let (local, remote) = in_memory_pair();
        let remote = RpcProtocol::new(Arc::new(remote), RpcOptions::default(), None);
        remote.set(EXT_HOST_EXTENSION_SERVICE, self.service.clone());
        *self.remote.lock() = Some(remote);
        Ok(Arc::new(local))
    }

    fn subscribe_exit(&self) -> watch::Receiver<Option<ExitEvent>> {
        self.exit.subscribe()
    }

    fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        if let Some(remote) = self.remote.lock().take() {
            remote.dispose();
        }
    }
}

struct CountingCustomer {
    disposals: Arc<AtomicUsize>,
    fail: bool,
}

impl Customer for CountingCustomer {
    fn name(&self) -> &str {
        "CountingCustomer"
    }

    fn dispose(&self) -> Result<(), CustomerError> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CustomerError::new("CountingCustomer", "dispose exploded"));
        }
        Ok(())
    }
}

fn customers() -> CustomerRegistry {
    workbench_customers(
        Arc::new(TracingExtensionService::new()),
        Arc::new(TracingTreeViewSink),
    )
}

fn deps(customers: CustomerRegistry, telemetry: Arc<MemoryTelemetry>) -> ManagerDeps {
    ManagerDeps {
        customers,
        telemetry,
        config: ManagerConfig::default(),
    }
}

fn extension(id: &str) -> ExtensionDescription {
    ExtensionDescription::new(id, format!("file:///extensions/{id}"))
}

fn startup_actions(telemetry: &MemoryTelemetry) -> Vec<String> {
    telemetry
        .named("extensionHostStartup")
        .iter()
        .map(|event| event["action"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn concurrent_activations_share_one_remote_call() {
    let host = FakeHost::new(ExtensionHostStartup::EagerAutoStart, false);
    let telemetry = Arc::new(MemoryTelemetry::new());
    let manager = ExtensionHostManager::new(host.clone(), Vec::new(), deps(customers(), telemetry.clone()));

    let (first, second) = tokio::join!(
        manager.activate_by_event("onView:nodes", ActivationKind::Normal),
        manager.activate_by_event("onView:nodes", ActivationKind::Normal),
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(host.service.activations.load(Ordering::SeqCst), 1);
    assert!(manager.activation_event_is_done("onView:nodes"));

    manager
        .activate_by_event("onView:nodes", ActivationKind::Normal)
        .await
        .unwrap();
    assert_eq!(host.service.activations.load(Ordering::SeqCst), 1);
    assert_eq!(startup_actions(&telemetry), vec!["starting", "success"]);
    manager.dispose();
}

#[tokio::test(start_paused = true)]
async fn immediate_activation_does_not_wait_for_start() {
    let host = FakeHost::new(ExtensionHostStartup::EagerAutoStart, false);
    let manager = ExtensionHostManager::new(
        host.clone(),
        Vec::new(),
        deps(customers(), Arc::new(MemoryTelemetry::new())),
    );

    manager
        .activate_by_event("onStartupFinished", ActivationKind::Immediate)
        .await
        .unwrap();
    assert!(!manager.activation_event_is_done("onStartupFinished"));
    assert_eq!(host.service.activations.load(Ordering::SeqCst), 0);
    manager.dispose();
}

#[tokio::test(start_paused = true)]
async fn initial_activation_events_are_replayed_after_start() {
    let host = FakeHost::new(ExtensionHostStartup::EagerAutoStart, false);
    let manager = ExtensionHostManager::new(
        host.clone(),
        vec!["*".to_string()],
        deps(customers(), Arc::new(MemoryTelemetry::new())),
    );
    manager.ready().await.unwrap();
    while !manager.activation_event_is_done("*") {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(host.service.activations.load(Ordering::SeqCst), 1);
    manager.dispose();
}

#[tokio::test(start_paused = true)]
async fn failed_start_degrades_and_disposes_cleanly() {
    let host = FakeHost::new(ExtensionHostStartup::EagerAutoStart, true);
    let telemetry = Arc::new(MemoryTelemetry::new());
    let manager = ExtensionHostManager::new(host.clone(), Vec::new(), deps(customers(), telemetry.clone()));

    manager.ready().await.unwrap();
    let id = ExtensionIdentifier::new("pub.ext");
    let reason = exthost_manager::ExtensionActivationReason {
        startup: true,
        extension_id: id.clone(),
        activation_event: "*".to_string(),
    };
    assert!(!manager.activate(&id, &reason).await.unwrap());
    manager
        .activate_by_event("*", ActivationKind::Normal)
        .await
        .unwrap();
    manager
        .delta_extensions(ExtensionDescriptionDelta::default())
        .await
        .unwrap();
    assert_eq!(manager.get_inspect_port(true).await, 0);
    assert_eq!(manager.measure().await.unwrap(), None);
    assert_eq!(
        manager.get_canonical_uri("test+a", "file:///x").await,
        Err(ManagerError::CannotResolveCanonicalUri)
    );
    assert_eq!(
        manager.extension_tests_execute().await,
        Err(ManagerError::NoProxy)
    );
    assert_eq!(
        manager.resolve_authority("test+a", 1).await,
        ResolveAuthorityResult::unknown("Cannot resolve authority", None)
    );

    let events = telemetry.named("extensionHostStartup");
    assert_eq!(startup_actions(&telemetry), vec!["starting", "error"]);
    assert_eq!(events[1]["errorName"], "SpawnError");

    manager.dispose();
    manager.dispose();
    assert_eq!(host.disposals.load(Ordering::SeqCst), 1);
    assert_eq!(host.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn disposal_reaches_every_customer_once() {
    let host = FakeHost::new(ExtensionHostStartup::EagerAutoStart, false);
    let disposals = Arc::new(AtomicUsize::new(0));
    let failing = disposals.clone();
    let counting = disposals.clone();
    let registry = customers()
        .with_customer(move |_| {
            Ok(Arc::new(CountingCustomer {
                disposals: failing.clone(),
                fail: true,
            }))
        })
        .with_customer(move |_| {
            Ok(Arc::new(CountingCustomer {
                disposals: counting.clone(),
                fail: false,
            }))
        });
    let manager = ExtensionHostManager::new(
        host.clone(),
        Vec::new(),
        deps(registry, Arc::new(MemoryTelemetry::new())),
    );
    manager.ready().await.unwrap();

    manager.dispose();
    manager.dispose();
    assert_eq!(disposals.load(Ordering::SeqCst), 2);
    assert!(manager.is_disposed());
    assert_eq!(manager.activate_by_event("x", ActivationKind::Normal).await, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn missing_main_customer_is_a_wiring_defect() {
    let host = FakeHost::new(ExtensionHostStartup::EagerAutoStart, false);
    let registry = CustomerRegistry::new().with_named(
        main_context::MAIN_THREAD_EXTENSION_SERVICE,
        |context| {
            Ok(exthost_manager::MainThreadExtensionService::new(
                context,
                Arc::new(TracingExtensionService::new()),
            ))
        },
    );
    let manager = ExtensionHostManager::new(
        host.clone(),
        Vec::new(),
        deps(registry, Arc::new(MemoryTelemetry::new())),
    );

    let err = manager.ready().await.unwrap_err();
    assert_eq!(
        err,
        ManagerError::Wiring(RpcError::MissingIdentifiers(vec![
            main_context::MAIN_THREAD_TREE_VIEWS.sid.to_string()
        ]))
    );
    manager.dispose();
}

#[tokio::test(start_paused = true)]
async fn resolve_authority_uses_one_error_shape() {
    let host = FakeHost::new(ExtensionHostStartup::EagerAutoStart, false);
    let manager = ExtensionHostManager::new(
        host.clone(),
        Vec::new(),
        deps(customers(), Arc::new(MemoryTelemetry::new())),
    );

    match manager.resolve_authority("broken+box", 1).await {
        ResolveAuthorityResult::Error { error } => {
            assert_eq!(error.code, RemoteAuthorityResolverErrorCode::Unknown);
            assert_eq!(error.message.as_deref(), Some("resolver crashed"));
            assert!(error.detail.is_some());
        }
        ResolveAuthorityResult::Ok { .. } => panic!("broken resolver must fail"),
    }

    match manager.resolve_authority("slow+box", 2).await {
        ResolveAuthorityResult::Ok { value } => {
            assert_eq!(value.authority.connect_to, "localhost:8000");
        }
        ResolveAuthorityResult::Error { error } => panic!("unexpected error {error:?}"),
    }
    manager.dispose();
}

#[tokio::test(start_paused = true)]
async fn lazy_manager_without_assignments_never_starts_the_host() {
    let host = FakeHost::new(ExtensionHostStartup::Lazy, false);
    let lazy = LazyExtensionHostManager::new(host.clone(), deps(customers(), Arc::new(MemoryTelemetry::new())));
    assert!(!lazy.activation_event_is_done("*"));

    lazy.start(vec![extension("pub.a")], Vec::new()).await.unwrap();
    lazy.delta_extensions(ExtensionDescriptionDelta {
        to_add: vec![extension("pub.b")],
        ..ExtensionDescriptionDelta::default()
    })
    .await
    .unwrap();
    lazy.activate_by_event("*", ActivationKind::Normal)
        .await
        .unwrap();

    assert!(lazy.actual().is_none());
    assert_eq!(host.starts(), 0);
    assert!(lazy.activation_event_is_done("*"));
    assert_eq!(
        lazy.resolve_authority("test+a", 1).await,
        ResolveAuthorityResult::unknown("Cannot resolve authority", None)
    );
    lazy.dispose();
    assert_eq!(host.disposals.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn lazy_manager_starts_once_with_accumulated_extensions() {
    let host = FakeHost::new(ExtensionHostStartup::Lazy, false);
    let lazy = LazyExtensionHostManager::new(host.clone(), deps(customers(), Arc::new(MemoryTelemetry::new())));

    lazy.start(vec![extension("pub.a")], Vec::new()).await.unwrap();
    lazy.delta_extensions(ExtensionDescriptionDelta {
        to_add: vec![extension("pub.b")],
        ..ExtensionDescriptionDelta::default()
    })
    .await
    .unwrap();
    lazy.delta_extensions(ExtensionDescriptionDelta {
        my_to_add: vec![ExtensionIdentifier::new("pub.a")],
        ..ExtensionDescriptionDelta::default()
    })
    .await
    .unwrap();

    assert_eq!(host.starts(), 1);
    {
        let started = host.service.started.lock();
        assert_eq!(started.len(), 1);
        let ids: Vec<&str> = started[0]
            .to_add
            .iter()
            .map(|extension| extension.identifier.value())
            .collect();
        assert_eq!(ids, vec!["pub.a", "pub.b"]);
        assert_eq!(started[0].my_to_add, vec![ExtensionIdentifier::new("pub.a")]);
    }
    assert!(lazy.contains_extension(&ExtensionIdentifier::new("PUB.A")));

    lazy.delta_extensions(ExtensionDescriptionDelta {
        my_to_add: vec![ExtensionIdentifier::new("pub.b")],
        ..ExtensionDescriptionDelta::default()
    })
    .await
    .unwrap();
    assert_eq!(host.starts(), 1);
    assert_eq!(host.service.deltas.lock().len(), 1);
    lazy.dispose();
}

#[tokio::test(start_paused = true)]
async fn lazy_delta_waits_for_start() {
    let host = FakeHost::new(ExtensionHostStartup::Lazy, false);
    let lazy = Arc::new(LazyExtensionHostManager::new(
        host.clone(),
        deps(customers(), Arc::new(MemoryTelemetry::new())),
    ));

    let pending = {
        let lazy = lazy.clone();
        tokio::spawn(async move {
            lazy.delta_extensions(ExtensionDescriptionDelta {
                to_add: vec![extension("pub.c")],
                my_to_add: vec![ExtensionIdentifier::new("pub.c")],
                ..ExtensionDescriptionDelta::default()
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());
    assert_eq!(host.starts(), 0);

    lazy.start(Vec::new(), Vec::new()).await.unwrap();
    pending.await.unwrap().unwrap();
    assert_eq!(host.starts(), 1);
    lazy.dispose();
}

#[tokio::test(start_paused = true)]
async fn lazy_test_execution_forces_creation() {
    let host = FakeHost::new(ExtensionHostStartup::Lazy, false);
    let lazy = LazyExtensionHostManager::new(host.clone(), deps(customers(), Arc::new(MemoryTelemetry::new())));
    lazy.start(Vec::new(), Vec::new()).await.unwrap();

    // The recording service has no test runner.
    let err = lazy.extension_tests_execute().await.unwrap_err();
    assert!(matches!(err, ManagerError::Rpc(RpcError::Remote(_))));
    assert_eq!(host.starts(), 1);
    assert!(lazy.actual().is_some());
    lazy.dispose();
}

#[tokio::test(start_paused = true)]
async fn factory_picks_lazy_only_without_initial_events() {
    let lazy_host = FakeHost::new(ExtensionHostStartup::Lazy, false);
    let lazy = create_extension_host_manager(
        lazy_host.clone(),
        Vec::new(),
        deps(customers(), Arc::new(MemoryTelemetry::new())),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(lazy_host.starts(), 0);

    let eager_host = FakeHost::new(ExtensionHostStartup::Lazy, false);
    let eager = create_extension_host_manager(
        eager_host.clone(),
        vec!["onCommand:x".to_string()],
        deps(customers(), Arc::new(MemoryTelemetry::new())),
    );
    eager.ready().await.unwrap();
    assert_eq!(eager_host.starts(), 1);
    assert!(eager.represents_running_location(&ExtensionRunningLocation::new(
        ExtensionHostKind::LocalProcess,
        0
    )));

    lazy.dispose();
    eager.dispose();
}

#[tokio::test(start_paused = true)]
async fn worker_host_with_stub_answers_the_latency_probe() {
    let mut config = ManagerConfig::default();
    config.host.latency_probe_bytes = 4096;
    config.host.latency_probe_rounds = 3;
    let host = Arc::new(WorkerExtensionHost::new(
        ExtensionHostStartup::EagerAutoStart,
        1,
        stub_worker_setup(config.clone()),
    ));
    let manager = ExtensionHostManager::new(
        host.clone(),
        Vec::new(),
        ManagerDeps {
            customers: customers(),
            telemetry: Arc::new(MemoryTelemetry::new()),
            config,
        },
    );

    let measurement = manager.measure().await.unwrap().expect("worker started");
    assert_eq!(measurement.remote_authority, None);
    assert!(measurement.up_bps > 0.0);
    assert!(measurement.down_bps > 0.0);
    assert_eq!(manager.kind(), ExtensionHostKind::LocalWebWorker);

    manager
        .start(
            vec![extension("pub.a")],
            vec![ExtensionIdentifier::new("pub.a")],
        )
        .await
        .unwrap();
    assert!(manager.contains_extension(&ExtensionIdentifier::new("pub.a")));

    let mut exit = manager.subscribe_exit();
    host.terminate(3);
    exit.changed().await.unwrap();
    assert_eq!(
        *exit.borrow(),
        Some(ExitEvent {
            code: 3,
            signal: None
        })
    );
    manager.dispose();
}
