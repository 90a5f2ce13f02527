//! Correlated request/response protocol over a message transport.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::logger::{RpcLogEntry, RpcLogKind, RpcLogger};
use crate::protocol::{ProxyIdentifier, RequestInitiator, RpcMessage};
use crate::responsive::{LatencyStats, ResponsiveState, ResponsiveTracker};
use crate::transport::MessagePassingProtocol;

/// Answers requests addressed to one registered identifier.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(
        &self,
        method: &str,
        args: Vec<Value>,
        token: CancellationToken,
    ) -> Result<Value, RpcError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RpcOptions {
    /// An unacknowledged request older than this marks the channel unresponsive.
    pub unresponsive_after: Duration,
    /// Interval of the responsiveness check.
    pub responsiveness_check: Duration,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            unresponsive_after: Duration::from_secs(3),
            responsiveness_check: Duration::from_secs(1),
        }
    }
}

struct PendingReply {
    reply: oneshot::Sender<Result<Value, RpcError>>,
    sent_at: Instant,
}

struct RpcInner {
    transport: Arc<dyn MessagePassingProtocol>,
    logger: Option<Arc<dyn RpcLogger>>,
    next_req: AtomicU32,
    pending: Mutex<FxHashMap<u32, PendingReply>>,
    handlers: RwLock<FxHashMap<u32, Arc<dyn RpcHandler>>>,
    incoming: Mutex<FxHashMap<u32, CancellationToken>>,
    responsive: ResponsiveTracker,
    disposed: AtomicBool,
    shutdown: CancellationToken,
}

/// One side of an RPC channel.
///
/// Cloning is cheap; every clone shares the same channel state.
#[derive(Clone)]
pub struct RpcProtocol {
    inner: Arc<RpcInner>,
}

impl RpcProtocol {
    /// Starts the receive loop and the responsiveness check on the current runtime.
    pub fn new(
        transport: Arc<dyn MessagePassingProtocol>,
        options: RpcOptions,
        logger: Option<Arc<dyn RpcLogger>>,
    ) -> Self {
        let inner = Arc::new(RpcInner {
            transport: transport.clone(),
            logger,
            next_req: AtomicU32::new(1),
            pending: Mutex::new(FxHashMap::default()),
            handlers: RwLock::new(FxHashMap::default()),
            incoming: Mutex::new(FxHashMap::default()),
            responsive: ResponsiveTracker::new(options.unresponsive_after),
            disposed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(receive_loop(
            transport,
            Arc::downgrade(&inner),
            inner.shutdown.clone(),
        ));
        tokio::spawn(responsiveness_loop(
            Arc::downgrade(&inner),
            inner.shutdown.clone(),
            options.responsiveness_check,
        ));
        Self { inner }
    }

    #[must_use]
    pub fn get_proxy(&self, id: ProxyIdentifier) -> RpcProxy {
        RpcProxy {
            rpc: self.clone(),
            id,
        }
    }

    /// Registers the local object answering requests for `id`, replacing any previous one.
    pub fn set(&self, id: ProxyIdentifier, handler: Arc<dyn RpcHandler>) {
        self.inner.handlers.write().insert(id.nid, handler);
    }

    /// Fails with every identifier in `ids` that has no local handler.
    pub fn assert_registered(&self, ids: &[ProxyIdentifier]) -> Result<(), RpcError> {
        let handlers = self.inner.handlers.read();
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !handlers.contains_key(&id.nid))
            .map(|id| id.sid.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RpcError::MissingIdentifiers(missing))
        }
    }

    /// Waits until queued outgoing messages have been written.
    pub async fn drain(&self) {
        self.inner.transport.drain().await;
    }

    pub fn subscribe_responsive_state(&self) -> watch::Receiver<ResponsiveState> {
        self.inner.responsive.subscribe()
    }

    #[must_use]
    pub fn responsive_state(&self) -> ResponsiveState {
        self.inner.responsive.current()
    }

    #[must_use]
    pub fn latency(&self) -> LatencyStats {
        self.inner.responsive.latency()
    }

    /// Number of calls still waiting for a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Stops the channel and rejects every outstanding call with `Disposed`.
    ///
    /// Later calls fail immediately. Calling this more than once is a no-op.
    pub fn dispose(&self) {
        let drained: Vec<PendingReply> = {
            let mut pending = self.inner.pending.lock();
            if self.inner.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
            pending.drain().map(|(_, reply)| reply).collect()
        };
        self.inner.shutdown.cancel();
        for pending in drained {
            let _ = pending.reply.send(Err(RpcError::Disposed));
        }
        for (_, token) in self.inner.incoming.lock().drain() {
            token.cancel();
        }
        self.inner.handlers.write().clear();
        self.inner.responsive.clear();
        debug!("rpc protocol disposed");
    }

    async fn call(
        &self,
        id: ProxyIdentifier,
        method: &str,
        args: Vec<Value>,
        token: Option<CancellationToken>,
    ) -> Result<Value, RpcError> {
        if token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(RpcError::Canceled);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = {
            let mut pending = self.inner.pending.lock();
            if self.inner.disposed.load(Ordering::SeqCst) {
                return Err(RpcError::Disposed);
            }
            let req = self.inner.allocate_req(&pending);
            pending.insert(
                req,
                PendingReply {
                    reply: reply_tx,
                    sent_at: Instant::now(),
                },
            );
            req
        };

        let message = RpcMessage::Request {
            req,
            rpc_id: id.nid,
            method: method.to_string(),
            args,
        };
        let summary = format!("request: {}.{method}(", id.sid);
        // Tracked before sending so an ack racing the send cannot be lost.
        self.inner.responsive.request_sent(req);
        if let Err(err) =
            self.inner
                .send(&message, RequestInitiator::LocalSide, RpcLogKind::Request, &summary)
        {
            self.inner.pending.lock().remove(&req);
            self.inner.responsive.acknowledged(req);
            return Err(err);
        }

        let token = token.unwrap_or_default();
        tokio::select! {
            reply = reply_rx => reply.unwrap_or(Err(RpcError::Disposed)),
            () = token.cancelled() => {
                let removed = self.inner.pending.lock().remove(&req);
                self.inner.responsive.acknowledged(req);
                if removed.is_some() {
                    let cancel = RpcMessage::Cancel { req };
                    if let Err(err) = self.inner.send(
                        &cancel,
                        RequestInitiator::LocalSide,
                        RpcLogKind::Cancel,
                        "cancel:",
                    ) {
                        debug!("failed to send cancel for request {req}: {err}");
                    }
                }
                Err(RpcError::Canceled)
            }
        }
    }
}

impl RpcInner {
    /// Next request id that is non-zero and not currently in flight.
    fn allocate_req(&self, pending: &FxHashMap<u32, PendingReply>) -> u32 {
        loop {
            let req = self.next_req.fetch_add(1, Ordering::Relaxed);
            if req != 0 && !pending.contains_key(&req) {
                return req;
            }
        }
    }

    fn send(
        &self,
        message: &RpcMessage,
        initiator: RequestInitiator,
        kind: RpcLogKind,
        summary: &str,
    ) -> Result<(), RpcError> {
        let payload = serde_json::to_string(message)?;
        if let Some(logger) = &self.logger {
            let data = message_data(message);
            logger.log_outgoing(&RpcLogEntry {
                msg_len: payload.len(),
                req: message.req(),
                initiator,
                kind,
                summary,
                data,
            });
        }
        self.transport.send(payload)
    }

    fn log_incoming(
        &self,
        len: usize,
        message: &RpcMessage,
        initiator: RequestInitiator,
        kind: RpcLogKind,
        summary: &str,
    ) {
        if let Some(logger) = &self.logger {
            logger.log_incoming(&RpcLogEntry {
                msg_len: len,
                req: message.req(),
                initiator,
                kind,
                summary,
                data: message_data(message),
            });
        }
    }

    fn receive(self: &Arc<Self>, raw: &str) {
        let message: RpcMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping malformed rpc message: {err}");
                return;
            }
        };
        match &message {
            RpcMessage::Request {
                req,
                rpc_id,
                method,
                args,
            } => {
                let sid = ProxyIdentifier::from_nid(*rpc_id).map_or("unknown", |id| id.sid);
                let summary = format!("receiveRequest {sid}.{method}(");
                self.log_incoming(
                    raw.len(),
                    &message,
                    RequestInitiator::OtherSide,
                    RpcLogKind::Request,
                    &summary,
                );
                self.receive_request(*req, *rpc_id, method.clone(), args.clone());
            }
            RpcMessage::Acknowledged { req } => {
                self.log_incoming(
                    raw.len(),
                    &message,
                    RequestInitiator::LocalSide,
                    RpcLogKind::Acknowledged,
                    "receiveAck:",
                );
                self.responsive.acknowledged(*req);
            }
            RpcMessage::Cancel { req } => {
                self.log_incoming(
                    raw.len(),
                    &message,
                    RequestInitiator::OtherSide,
                    RpcLogKind::Cancel,
                    "receiveCancel:",
                );
                if let Some(token) = self.incoming.lock().get(req) {
                    token.cancel();
                }
            }
            RpcMessage::ReplyOk { req, result } => {
                self.log_incoming(
                    raw.len(),
                    &message,
                    RequestInitiator::LocalSide,
                    RpcLogKind::Reply,
                    "receiveReply:",
                );
                self.complete(*req, Ok(result.clone()));
            }
            RpcMessage::ReplyErr { req, error } => {
                self.log_incoming(
                    raw.len(),
                    &message,
                    RequestInitiator::LocalSide,
                    RpcLogKind::ReplyErr,
                    "receiveReplyErr:",
                );
                self.complete(*req, Err(RpcError::from_payload(error.clone())));
            }
        }
    }

    fn complete(&self, req: u32, result: Result<Value, RpcError>) {
        let Some(pending) = self.pending.lock().remove(&req) else {
            debug!("ignoring reply for unknown request {req}");
            return;
        };
        self.responsive.acknowledged(req);
        self.responsive.record_latency(pending.sent_at.elapsed());
        let _ = pending.reply.send(result);
    }

    fn receive_request(self: &Arc<Self>, req: u32, rpc_id: u32, method: String, args: Vec<Value>) {
        let ack = RpcMessage::Acknowledged { req };
        if let Err(err) = self.send(&ack, RequestInitiator::OtherSide, RpcLogKind::Acknowledged, "ack:")
        {
            debug!("failed to acknowledge request {req}: {err}");
            return;
        }

        let handler = self.handlers.read().get(&rpc_id).cloned();
        let Some(handler) = handler else {
            let err = match ProxyIdentifier::from_nid(rpc_id) {
                Some(id) => RpcError::NotRegistered(id.sid.to_string()),
                None => RpcError::UnknownRpcId(rpc_id),
            };
            self.reply(req, Err(err));
            return;
        };

        let token = self.shutdown.child_token();
        self.incoming.lock().insert(req, token.clone());
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = handler.handle(&method, args, token).await;
            inner.incoming.lock().remove(&req);
            if inner.disposed.load(Ordering::SeqCst) {
                return;
            }
            inner.reply(req, result);
        });
    }

    fn reply(&self, req: u32, result: Result<Value, RpcError>) {
        let (message, kind, summary) = match result {
            Ok(result) => (RpcMessage::ReplyOk { req, result }, RpcLogKind::Reply, "reply:"),
            Err(err) => (
                RpcMessage::ReplyErr {
                    req,
                    error: err.to_payload(),
                },
                RpcLogKind::ReplyErr,
                "replyErr:",
            ),
        };
        if let Err(err) = self.send(&message, RequestInitiator::OtherSide, kind, summary) {
            debug!("failed to reply to request {req}: {err}");
        }
    }
}

fn message_data(message: &RpcMessage) -> Option<&Value> {
    match message {
        RpcMessage::Request { args, .. } => args.first(),
        RpcMessage::ReplyOk { result, .. } => Some(result),
        _ => None,
    }
}

async fn receive_loop(
    transport: Arc<dyn MessagePassingProtocol>,
    inner: Weak<RpcInner>,
    shutdown: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            () = shutdown.cancelled() => return,
            raw = transport.recv() => raw,
        };
        let Some(raw) = raw else {
            debug!("rpc transport closed");
            return;
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.receive(&raw);
    }
}

async fn responsiveness_loop(inner: Weak<RpcInner>, shutdown: CancellationToken, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.responsive.check();
    }
}

/// Callable stub for one remote identifier.
#[derive(Clone)]
pub struct RpcProxy {
    rpc: RpcProtocol,
    id: ProxyIdentifier,
}

impl RpcProxy {
    #[must_use]
    pub fn id(&self) -> ProxyIdentifier {
        self.id
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.rpc.call(self.id, method, args, None).await
    }

    /// Like [`RpcProxy::call`]; cancelling `token` sends `cancel` and resolves with `Canceled`.
    pub async fn call_with_cancellation(
        &self,
        method: &str,
        args: Vec<Value>,
        token: CancellationToken,
    ) -> Result<Value, RpcError> {
        self.rpc.call(self.id, method, args, Some(token)).await
    }

    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.call(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Decodes argument `index` of `method`, treating a missing argument as `null`.
pub fn arg<T: DeserializeOwned>(method: &str, args: &[Value], index: usize) -> Result<T, RpcError> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|err| RpcError::InvalidArguments {
        method: method.to_string(),
        message: format!("argument {index}: {err}"),
    })
}
