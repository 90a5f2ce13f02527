//! RPC traffic loggers.
//! - TracingRpcLogger: every message at debug level with running totals
//! - TelemetryRpcLogger: sampled request names and sizes, never payloads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tracing::debug;

use crate::protocol::RequestInitiator;
use crate::telemetry::TelemetryService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcLogKind {
    Request,
    Reply,
    ReplyErr,
    Acknowledged,
    Cancel,
}

/// One message as seen by a logger.
#[derive(Debug, Clone, Copy)]
pub struct RpcLogEntry<'a> {
    pub msg_len: usize,
    pub req: u32,
    pub initiator: RequestInitiator,
    pub kind: RpcLogKind,
    /// Short description such as `request: MainThreadTreeViews.$refresh(`.
    pub summary: &'a str,
    pub data: Option<&'a Value>,
}

pub trait RpcLogger: Send + Sync {
    fn log_incoming(&self, entry: &RpcLogEntry<'_>);
    fn log_outgoing(&self, entry: &RpcLogEntry<'_>);
}

#[derive(Debug, Default)]
pub struct TracingRpcLogger {
    total_incoming: AtomicUsize,
    total_outgoing: AtomicUsize,
}

impl TracingRpcLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn totals(&self) -> (usize, usize) {
        (
            self.total_incoming.load(Ordering::Relaxed),
            self.total_outgoing.load(Ordering::Relaxed),
        )
    }

    fn log(&self, arrow: &str, total: usize, entry: &RpcLogEntry<'_>) {
        let initiator = match entry.initiator {
            RequestInitiator::LocalSide => "Local",
            RequestInitiator::OtherSide => "Other",
        };
        let data = entry
            .data
            .map(|value| serde_json::to_string_pretty(value).unwrap_or_default())
            .unwrap_or_default();
        debug!(
            target: "exthost_rpc::traffic",
            "[{arrow}][{initiator}][{total:>10}]{:>8} req={} {} {data}",
            entry.msg_len,
            entry.req,
            entry.summary,
        );
    }
}

impl RpcLogger for TracingRpcLogger {
    fn log_incoming(&self, entry: &RpcLogEntry<'_>) {
        let total = self
            .total_incoming
            .fetch_add(entry.msg_len, Ordering::Relaxed)
            + entry.msg_len;
        self.log("Ext -> Win", total, entry);
    }

    fn log_outgoing(&self, entry: &RpcLogEntry<'_>) {
        let total = self
            .total_outgoing
            .fetch_add(entry.msg_len, Ordering::Relaxed)
            + entry.msg_len;
        self.log("Win -> Ext", total, entry);
    }
}

/// Records request names and message sizes, sampled per channel.
pub struct TelemetryRpcLogger {
    telemetry: Arc<dyn TelemetryService>,
    pending_requests: Mutex<FxHashMap<u32, String>>,
}

impl TelemetryRpcLogger {
    /// Whether a new channel should carry this logger, with probability `rate`.
    #[must_use]
    pub fn is_enabled(rate: f64) -> bool {
        rate > 0.0 && rand::random::<f64>() < rate
    }

    #[must_use]
    pub fn new(telemetry: Arc<dyn TelemetryService>) -> Self {
        Self {
            telemetry,
            pending_requests: Mutex::new(FxHashMap::default()),
        }
    }
}

impl RpcLogger for TelemetryRpcLogger {
    fn log_incoming(&self, entry: &RpcLogEntry<'_>) {
        match (entry.initiator, entry.kind) {
            (RequestInitiator::LocalSide, RpcLogKind::Reply | RpcLogKind::ReplyErr) => {
                let request = self
                    .pending_requests
                    .lock()
                    .remove(&entry.req)
                    .unwrap_or_else(|| "unknown_reply".to_string());
                self.telemetry.public_log(
                    "extensionhost.incoming",
                    json!({
                        "type": format!("{} {request}", entry.summary),
                        "length": entry.msg_len,
                    }),
                );
            }
            (RequestInitiator::OtherSide, RpcLogKind::Request) => {
                self.telemetry.public_log(
                    "extensionhost.incoming",
                    json!({ "type": entry.summary, "length": entry.msg_len }),
                );
            }
            _ => {}
        }
    }

    fn log_outgoing(&self, entry: &RpcLogEntry<'_>) {
        if entry.initiator == RequestInitiator::LocalSide && entry.kind == RpcLogKind::Request {
            self.pending_requests
                .lock()
                .insert(entry.req, entry.summary.to_string());
            self.telemetry.public_log(
                "extensionhost.outgoing",
                json!({ "type": entry.summary, "length": entry.msg_len }),
            );
        }
    }
}
