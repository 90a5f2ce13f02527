//! Extension host lifecycle for the workbench.
//! - host/process_host/worker_host: remote execution contexts
//! - manager/lazy: eager and lazily created managers over one host
//! - proxy: typed calls into the host's extension service
//! - main_thread: main-side extension service customer
//! - remote: stub extension host used by `exthost serve`

pub mod config;
pub mod error;
pub mod extensions;
pub mod handshake;
pub mod host;
pub mod lazy;
pub mod main_thread;
pub mod manager;
pub mod process_host;
pub mod proxy;
pub mod remote;
pub mod worker_host;

pub use config::{
    HostSettings, ManagerConfig, RpcSettings, TelemetryConfig, TreeSettings, CONFIG_FILES,
    LOG_RPC_ENV,
};
pub use error::{HostError, ManagerError};
pub use extensions::{
    ExtensionDescription, ExtensionDescriptionDelta, ExtensionHostExtensions, ExtensionIdentifier,
};
pub use handshake::{HandshakeMessage, TerminationAwareTransport};
pub use host::{
    ExitEvent, ExtensionHost, ExtensionHostKind, ExtensionHostStartup, ExtensionRunningLocation,
};
pub use lazy::{create_extension_host_manager, LazyExtensionHostManager};
pub use main_thread::{
    workbench_customers, ActivationTimes, InternalExtensionService, MainThreadExtensionService,
    TracingExtensionService,
};
pub use manager::{ExtensionHostManager, HostManager, LatencyMeasurement, ManagerDeps};
pub use process_host::{ProcessExtensionHost, ProcessHostOptions};
pub use proxy::{
    ActivationKind, ExtensionActivationReason, ExtensionHostProxy,
    RemoteAuthorityResolverErrorCode, ResolveAuthorityError, ResolveAuthorityResult,
    ResolvedAuthority, ResolvedAuthorityValue,
};
pub use remote::{bind_stub, serve, stub_worker_setup, StubExtensionHostService};
pub use worker_host::{WorkerExtensionHost, WorkerSetup};
