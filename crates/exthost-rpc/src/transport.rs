//! Message passing transports.
//! - ChannelTransport: in-memory endpoint, created in connected pairs
//! - FramedTransport: Content-Length frames over an async reader/writer

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::RpcError;
use crate::framing::{write_frame, FrameDecoder};

/// A duplex channel of whole messages.
#[async_trait]
pub trait MessagePassingProtocol: Send + Sync + 'static {
    /// Queues one message for delivery.
    fn send(&self, message: String) -> Result<(), RpcError>;

    /// Next message from the other side, `None` once the channel closed.
    async fn recv(&self) -> Option<String>;

    /// Resolves once every queued outgoing message has been written.
    async fn drain(&self) {}
}

/// One end of an in-memory connection.
pub struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Two connected in-memory endpoints.
#[must_use]
pub fn in_memory_pair() -> (ChannelTransport, ChannelTransport) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            outgoing: left_tx,
            incoming: tokio::sync::Mutex::new(right_rx),
        },
        ChannelTransport {
            outgoing: right_tx,
            incoming: tokio::sync::Mutex::new(left_rx),
        },
    )
}

#[async_trait]
impl MessagePassingProtocol for ChannelTransport {
    fn send(&self, message: String) -> Result<(), RpcError> {
        self.outgoing
            .send(message)
            .map_err(|_| RpcError::TransportClosed)
    }

    async fn recv(&self) -> Option<String> {
        self.incoming.lock().await.recv().await
    }
}

enum Outgoing {
    Message(String),
    Flush(oneshot::Sender<()>),
}

/// Content-Length framed transport over a reader/writer pair.
///
/// Owns one pump task per direction. Both are aborted when the transport is
/// dropped or closed.
pub struct FramedTransport {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FramedTransport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let read_task = tokio::spawn(read_pump(reader, incoming_tx));
        let write_task = tokio::spawn(write_pump(writer, outgoing_rx));
        Self {
            outgoing: outgoing_tx,
            incoming: tokio::sync::Mutex::new(incoming_rx),
            tasks: Mutex::new(vec![read_task, write_task]),
        }
    }

    /// Transport over this process's stdin/stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    pub fn close(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl MessagePassingProtocol for FramedTransport {
    fn send(&self, message: String) -> Result<(), RpcError> {
        self.outgoing
            .send(Outgoing::Message(message))
            .map_err(|_| RpcError::TransportClosed)
    }

    async fn recv(&self) -> Option<String> {
        self.incoming.lock().await.recv().await
    }

    async fn drain(&self) {
        let (tx, rx) = oneshot::channel();
        if self.outgoing.send(Outgoing::Flush(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }
}

async fn read_pump<R>(mut reader: R, incoming: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("framed transport reached end of input");
                return;
            }
            Ok(read) => read,
            Err(err) => {
                warn!("framed transport read failed: {err}");
                return;
            }
        };
        decoder.push(&chunk[..read]);
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    if incoming.send(frame).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!("framed transport received an invalid frame: {err}");
                    return;
                }
            }
        }
    }
}

async fn write_pump<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<Outgoing>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outgoing.recv().await {
        match item {
            Outgoing::Message(message) => {
                if let Err(err) = write_frame(&mut writer, &message).await {
                    warn!("framed transport write failed: {err}");
                    return;
                }
            }
            Outgoing::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
