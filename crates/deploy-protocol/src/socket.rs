//! Unix domain socket transport.
//!
//! Each endpoint listens on `<socket_dir>/<service_name>.sock`. Frames are
//! length-delimited JSON envelopes:
//!
//! ```text
//! {"kind":"request","id":7,"body":{"Verb":"UpdateVerb","PackageLocation":"https://..."}}
//! {"kind":"message","body":{"DeploymentProgress":45}}
//! {"kind":"response","id":7,"body":{"Success":true}}
//! ```
//!
//! Frames on one socket are delivered in send order, so pushed messages always
//! precede the response that follows them.

use crate::{
    connection::{ListenerSlot, ServiceConnection, ServiceConnector, ServiceResponse},
    error::Result,
    message::ValueSet,
    server::{IncomingConnection, IncomingRequest, Notifier},
    status::{ConnectionStatus, ResponseStatus},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Largest accepted frame (1 MiB).
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

const REQUEST_BACKLOG: usize = 8;
const PUSH_BACKLOG: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Envelope {
    Request { id: u64, body: ValueSet },
    Response { id: u64, body: ValueSet },
    Message { body: ValueSet },
}

impl Envelope {
    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    fn decode(frame: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(frame)?)
    }
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Endpoint name the deployment service registers under unless configured otherwise.
pub const DEFAULT_SERVICE_NAME: &str = "autoupdate.deployment";

/// `$XDG_RUNTIME_DIR` when set, otherwise the system temporary directory.
pub fn default_socket_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// Socket location for `service_name` inside `socket_dir`.
pub fn socket_path(socket_dir: &Path, service_name: &str) -> PathBuf {
    socket_dir.join(format!("{service_name}.sock"))
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<ValueSet>>>>;

/// [`ServiceConnector`] that dials endpoint sockets in a directory.
#[derive(Debug, Clone)]
pub struct SocketConnector {
    socket_dir: PathBuf,
    connect_timeout: Duration,
}

impl SocketConnector {
    pub fn new(socket_dir: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl ServiceConnector for SocketConnector {
    async fn open(
        &self,
        service_name: &str,
    ) -> std::result::Result<Box<dyn ServiceConnection>, ConnectionStatus> {
        let path = socket_path(&self.socket_dir, service_name);
        let stream = match tokio::time::timeout(self.connect_timeout, UnixStream::connect(&path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                tracing::debug!(path = %path.display(), error = %err, "service socket connect failed");
                return Err(ConnectionStatus::from_io(&err));
            }
            Err(_) => return Err(ConnectionStatus::TimedOut),
        };

        let (read_half, write_half) = stream.into_split();
        let pending = PendingReplies::default();
        let listener = ListenerSlot::default();
        let reader = tokio::spawn(read_replies(
            FramedRead::new(read_half, codec()),
            pending.clone(),
            listener.clone(),
        ));

        Ok(Box::new(SocketConnection {
            writer: Some(FramedWrite::new(write_half, codec())),
            reader,
            pending,
            listener,
            next_id: 0,
        }))
    }
}

/// Route inbound frames: pushed messages to the listener, replies to their waiters.
async fn read_replies(
    mut frames: FramedRead<tokio::net::unix::OwnedReadHalf, LengthDelimitedCodec>,
    pending: PendingReplies,
    listener: ListenerSlot,
) {
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(error = %err, "service socket read failed");
                break;
            }
        };
        match Envelope::decode(&frame) {
            Ok(Envelope::Message { body }) => {
                listener.deliver(body).await;
            }
            Ok(Envelope::Response { id, body }) => {
                let waiter = lock_pending(&pending).remove(&id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(body);
                    }
                    None => tracing::debug!(id, "reply for unknown request"),
                }
            }
            Ok(Envelope::Request { .. }) => tracing::warn!("service sent a request frame; ignoring"),
            Err(err) => tracing::warn!(error = %err, "undecodable frame from service"),
        }
    }
    // Waiters left behind observe a broken channel.
    lock_pending(&pending).clear();
}

fn lock_pending(pending: &PendingReplies) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<ValueSet>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SocketConnection {
    writer: Option<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    reader: JoinHandle<()>,
    pending: PendingReplies,
    listener: ListenerSlot,
    next_id: u64,
}

#[async_trait]
impl ServiceConnection for SocketConnection {
    fn subscribe(&mut self, buffer: usize) -> mpsc::Receiver<ValueSet> {
        self.listener.attach(buffer)
    }

    fn unsubscribe(&mut self) {
        self.listener.detach();
    }

    async fn send_message(&mut self, message: ValueSet) -> ServiceResponse {
        let Some(writer) = self.writer.as_mut() else {
            return ServiceResponse::status(ResponseStatus::Unknown);
        };

        self.next_id += 1;
        let id = self.next_id;
        let frame = match (Envelope::Request { id, body: message }).encode() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode request");
                return ServiceResponse::status(ResponseStatus::Unknown);
            }
        };
        if frame.len() > MAX_FRAME_LENGTH {
            return ServiceResponse::status(ResponseStatus::MessageSizeTooLarge);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, reply_tx);

        if let Err(err) = writer.send(frame).await {
            tracing::debug!(error = %err, "failed to write request");
            lock_pending(&self.pending).remove(&id);
            return ServiceResponse::status(ResponseStatus::RemoteSystemUnavailable);
        }

        match reply_rx.await {
            Ok(reply) => ServiceResponse::success(reply),
            Err(_) => ServiceResponse::status(ResponseStatus::Failure),
        }
    }

    fn close(&mut self) {
        self.writer = None;
        self.listener.detach();
        self.reader.abort();
        lock_pending(&self.pending).clear();
    }
}

/// Accepts client connections on an endpoint socket. Removes the socket file on drop.
pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
    next_connection: u64,
}

impl SocketListener {
    /// Bind `<socket_dir>/<service_name>.sock`, replacing a stale socket file.
    pub fn bind(socket_dir: &Path, service_name: &str) -> Result<Self> {
        std::fs::create_dir_all(socket_dir)?;
        let path = socket_path(socket_dir, service_name);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let listener = UnixListener::bind(&path)?;
        tracing::info!(path = %path.display(), "listening for deployment requests");
        Ok(Self {
            listener,
            path,
            next_connection: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next client and start serving its frames.
    pub async fn accept(&mut self) -> Result<IncomingConnection> {
        let (stream, _) = self.listener.accept().await?;
        self.next_connection += 1;
        let id = self.next_connection;

        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BACKLOG);
        let (push_tx, push_rx) = mpsc::channel(PUSH_BACKLOG);
        tokio::spawn(async move {
            serve_connection(stream, requests_tx, push_rx).await;
            tracing::debug!(connection = id, "client connection closed");
        });

        Ok(IncomingConnection::new(id, requests_rx, Notifier::queue(push_tx)))
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

type ReplyFuture = BoxFuture<'static, (u64, std::result::Result<ValueSet, oneshot::error::RecvError>)>;

/// Pump one client socket until it closes.
///
/// Pushed messages are written before any reply that becomes ready at the same
/// time, which keeps progress ahead of the response it precedes. The socket is
/// closed once the service drops its [`IncomingConnection`].
async fn serve_connection(
    stream: UnixStream,
    requests: mpsc::Sender<IncomingRequest>,
    mut pushes: mpsc::Receiver<ValueSet>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, codec());
    let mut writer = FramedWrite::new(write_half, codec());
    let mut replies: FuturesUnordered<ReplyFuture> = FuturesUnordered::new();

    loop {
        let outbound = tokio::select! {
            biased;
            Some(body) = pushes.recv() => Envelope::Message { body },
            Some((id, reply)) = replies.next() => match reply {
                Ok(body) => Envelope::Response { id, body },
                Err(_) => continue,
            },
            frame = frames.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "client socket read failed");
                        break;
                    }
                    None => break,
                };
                match Envelope::decode(&frame) {
                    Ok(Envelope::Request { id, body }) => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        if requests.send(IncomingRequest::new(body, reply_tx)).await.is_err() {
                            break;
                        }
                        replies.push(async move { (id, reply_rx.await) }.boxed());
                    }
                    Ok(_) => tracing::warn!("client sent a non-request frame; ignoring"),
                    Err(err) => tracing::warn!(error = %err, "undecodable frame from client"),
                }
                continue;
            }
            _ = requests.closed() => break,
        };

        let frame = match outbound.encode() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode frame for client");
                continue;
            }
        };
        if let Err(err) = writer.send(frame).await {
            tracing::debug!(error = %err, "client socket write failed");
            break;
        }
    }
}
