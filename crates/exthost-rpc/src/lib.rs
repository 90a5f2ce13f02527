//! RPC channel between a workbench and its extension hosts.
//! - protocol: wire envelope and the closed set of proxy identifiers
//! - framing/transport: Content-Length frames, in-memory and framed transports
//! - rpc: request/response correlation, cancellation, responsiveness
//! - logger/telemetry: traffic loggers and telemetry sinks
//! - customers: main-side objects instantiated per channel

pub mod customers;
pub mod error;
pub mod framing;
pub mod logger;
pub mod protocol;
pub mod responsive;
pub mod rpc;
pub mod telemetry;
pub mod transport;

pub use customers::{
    dispose_all, Customer, CustomerContext, CustomerError, CustomerRegistry, NamedCustomer,
};
pub use error::RpcError;
pub use framing::{encode_frame, FrameDecoder, FrameError};
pub use logger::{RpcLogEntry, RpcLogKind, RpcLogger, TelemetryRpcLogger, TracingRpcLogger};
pub use protocol::{
    ext_host_context, main_context, ProxyIdentifier, ProxyKind, RequestInitiator,
    RpcErrorPayload, RpcMessage,
};
pub use responsive::{LatencyStats, ResponsiveState};
pub use rpc::{arg, RpcHandler, RpcOptions, RpcProtocol, RpcProxy};
pub use telemetry::{JsonlTelemetry, MemoryTelemetry, NullTelemetry, TelemetryService};
pub use transport::{in_memory_pair, ChannelTransport, FramedTransport, MessagePassingProtocol};

pub use tokio_util::sync::CancellationToken;
