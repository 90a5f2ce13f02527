//! Startup handshake and termination for process extension hosts.
//!
//! The host writes `ready`, receives `init`, answers `initialized`, and only
//! then starts exchanging RPC envelopes. `terminate` asks it to exit.

use std::time::Duration;

use async_trait::async_trait;
use exthost_rpc::{MessagePassingProtocol, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::HostError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HandshakeMessage {
    Ready,
    Init {
        #[serde(default)]
        data: Value,
    },
    Initialized,
    Terminate,
}

impl HandshakeMessage {
    fn encode(&self) -> Result<String, HostError> {
        serde_json::to_string(self).map_err(|err| HostError::Handshake(err.to_string()))
    }
}

async fn expect(
    transport: &dyn MessagePassingProtocol,
    phase: &'static str,
    timeout: Duration,
) -> Result<HandshakeMessage, HostError> {
    let raw = tokio::time::timeout(timeout, transport.recv())
        .await
        .map_err(|_| HostError::HandshakeTimeout { phase, timeout })?
        .ok_or_else(|| HostError::Handshake(format!("stream closed while waiting for {phase}")))?;
    serde_json::from_str(&raw).map_err(|err| {
        HostError::Handshake(format!("received unexpected message while waiting for {phase}: {err}"))
    })
}

/// Workbench side: waits for `ready`, sends `init_data`, waits for `initialized`.
pub async fn host_handshake(
    transport: &dyn MessagePassingProtocol,
    init_data: &Value,
    timeout: Duration,
) -> Result<(), HostError> {
    match expect(transport, "ready", timeout).await? {
        HandshakeMessage::Ready => {}
        other => return Err(HostError::Handshake(format!("expected ready, got {other:?}"))),
    }
    transport.send(
        HandshakeMessage::Init {
            data: init_data.clone(),
        }
        .encode()?,
    )?;
    match expect(transport, "initialized", timeout).await? {
        HandshakeMessage::Initialized => Ok(()),
        other => Err(HostError::Handshake(format!(
            "expected initialized, got {other:?}"
        ))),
    }
}

/// Extension host side: announces `ready`, returns the init data once acknowledged.
pub async fn remote_handshake(
    transport: &dyn MessagePassingProtocol,
    timeout: Duration,
) -> Result<Value, HostError> {
    transport.send(HandshakeMessage::Ready.encode()?)?;
    let data = match expect(transport, "init", timeout).await? {
        HandshakeMessage::Init { data } => data,
        other => return Err(HostError::Handshake(format!("expected init, got {other:?}"))),
    };
    transport.send(HandshakeMessage::Initialized.encode()?)?;
    Ok(data)
}

/// Sends `terminate` over `transport`.
pub fn send_terminate(transport: &dyn MessagePassingProtocol) -> Result<(), HostError> {
    transport.send(HandshakeMessage::Terminate.encode()?)?;
    Ok(())
}

/// Ends the incoming stream at the first `terminate` message.
///
/// `terminated` is cancelled when `terminate` arrives or the stream ends.
pub struct TerminationAwareTransport<T> {
    inner: T,
    terminated: CancellationToken,
}

impl<T: MessagePassingProtocol> TerminationAwareTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            terminated: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }
}

#[async_trait]
impl<T: MessagePassingProtocol> MessagePassingProtocol for TerminationAwareTransport<T> {
    fn send(&self, message: String) -> Result<(), RpcError> {
        self.inner.send(message)
    }

    async fn recv(&self) -> Option<String> {
        if self.terminated.is_cancelled() {
            return None;
        }
        let Some(message) = self.inner.recv().await else {
            self.terminated.cancel();
            return None;
        };
        if let Ok(HandshakeMessage::Terminate) = serde_json::from_str(&message) {
            debug!("received terminate");
            self.terminated.cancel();
            return None;
        }
        Some(message)
    }

    async fn drain(&self) {
        self.inner.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exthost_rpc::in_memory_pair;

    #[tokio::test]
    async fn handshake_completes_and_passes_init_data() {
        let (host, remote) = in_memory_pair();
        let timeout = Duration::from_secs(60);
        let remote_task =
            tokio::spawn(async move { remote_handshake(&remote, timeout).await.map(|d| (d, remote)) });
        host_handshake(&host, &serde_json::json!({"logLevel": "info"}), timeout)
            .await
            .unwrap();
        let (data, _remote) = remote_task.await.unwrap().unwrap();
        assert_eq!(data["logLevel"], "info");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_host_times_out_waiting_for_ready() {
        let (host, _remote) = in_memory_pair();
        let err = host_handshake(&host, &Value::Null, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HostError::HandshakeTimeout {
                phase: "ready",
                timeout: Duration::from_secs(60)
            }
        );
    }

    #[tokio::test]
    async fn terminate_ends_the_incoming_stream() {
        let (host, remote) = in_memory_pair();
        let remote = TerminationAwareTransport::new(remote);
        let terminated = remote.terminated();
        host.send("{\"type\":\"acknowledged\",\"req\":1}".to_string())
            .unwrap();
        send_terminate(&host).unwrap();
        assert!(remote.recv().await.is_some());
        assert_eq!(remote.recv().await, None);
        assert!(terminated.is_cancelled());
    }
}
