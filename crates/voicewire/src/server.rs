//! Event servers and the per-connection handler lifecycle.
//!
//! A server listens on one transport binding and runs one [`EventHandler`]
//! per accepted connection, each on its own task with a private codec
//! session. The live handlers are tracked in a registry so `stop()` can
//! signal every one of them, wait for their run loops to exit, and then
//! close the listening binding.
//!
//! The stdio binding has no accept loop: exactly one handler runs on the
//! calling task and the server ends when that handler's loop exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::codec::{EventReader, EventWriter};
use crate::error::{TransportError, UriError};
use crate::event::Event;
use crate::uri::PeerUri;

/// Opaque key for one live connection in the handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection application logic.
///
/// The server feeds the handler one event at a time; the handler replies
/// through the [`EventWriter`] it was constructed with and decides whether
/// the connection continues.
#[async_trait]
pub trait EventHandler: Send {
    /// Handle one event. Returning `Ok(false)` ends the connection after
    /// any events already written have been flushed.
    async fn handle_event(&mut self, event: Event) -> anyhow::Result<bool>;

    /// Called exactly once when the connection ends, on every exit path:
    /// peer close, `Ok(false)`, a failed or panicking `handle_event`, or a
    /// server `stop()`.
    async fn disconnect(&mut self) {}
}

/// Builds a fresh handler for each accepted connection. The writer is the
/// handler's half of that connection's codec session.
pub type HandlerFactory = Arc<dyn Fn(EventWriter) -> Box<dyn EventHandler> + Send + Sync>;

/// Live-handler registry shared between the accept loop and `stop()`.
#[derive(Clone)]
struct HandlerRegistry {
    connections: Arc<DashMap<ConnectionId, CancellationToken>>,
    tasks: TaskTracker,
}

impl HandlerRegistry {
    fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            tasks: TaskTracker::new(),
        }
    }

    /// Register a connection and launch its handler run loop.
    fn launch(&self, reader: EventReader, handler: Box<dyn EventHandler>) {
        let id = ConnectionId::new();
        let cancel = CancellationToken::new();
        self.connections.insert(id, cancel.clone());

        let connections = Arc::clone(&self.connections);
        self.tasks.spawn(async move {
            run_connection(reader, handler, cancel).await;
            // Normal completion and stop() may race to remove the same
            // entry; DashMap::remove is idempotent.
            connections.remove(&id);
            tracing::debug!(connection = %id, "handler finished");
        });
    }

    /// Signal every live handler and wait for all of their tasks.
    ///
    /// Cancellation is cooperative: a handler in the middle of
    /// `handle_event` finishes that event (including any writes it makes)
    /// and observes the signal before reading the next one.
    async fn stop(&self) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, cancel)) = self.connections.remove(&id) {
                cancel.cancel();
            }
        }
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Per-connection run loop: read one event, dispatch, repeat until the
/// stream ends, the handler signals termination, or the server stops.
/// `EventHandler::disconnect` runs exactly once on the way out, and dropping
/// the codec session closes the transport.
async fn run_connection(
    mut reader: EventReader,
    mut handler: Box<dyn EventHandler>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            result = reader.read_event() => match result {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(%error, "failed to read event");
                    break;
                }
            },
        };

        // Contain panics here so disconnect still runs and sibling
        // connections are unaffected.
        let dispatch = std::panic::AssertUnwindSafe(handler.handle_event(event));
        match dispatch.catch_unwind().await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => break,
            Ok(Err(error)) => {
                tracing::warn!(%error, "event handler failed");
                break;
            }
            Err(_) => {
                tracing::error!("event handler panicked");
                break;
            }
        }
    }

    handler.disconnect().await;
}

/// Event server over one of the three transport bindings.
pub enum AsyncServer {
    Tcp(TcpServer),
    Unix(UnixServer),
    Stdio(StdioServer),
}

impl AsyncServer {
    /// Select a server by connection URI. Fails locally; nothing is bound.
    pub fn from_uri(uri: &str) -> Result<Self, UriError> {
        Ok(match PeerUri::parse(uri)? {
            PeerUri::Tcp { host, port } => Self::Tcp(TcpServer::new(host, port)),
            PeerUri::Unix { path } => Self::Unix(UnixServer::new(path)),
            PeerUri::Stdio => Self::Stdio(StdioServer::new()),
        })
    }

    /// Bind and begin accepting without blocking the caller.
    pub async fn start(&self, factory: HandlerFactory) -> Result<(), TransportError> {
        match self {
            Self::Tcp(server) => server.start(factory).await,
            Self::Unix(server) => server.start(factory).await,
            Self::Stdio(server) => {
                server.start(factory);
                Ok(())
            }
        }
    }

    /// Bind, accept, and block the calling task until the server is stopped
    /// (serve-forever). For stdio the single handler runs directly on this
    /// call and it returns when that handler's loop exits.
    pub async fn run(&self, factory: HandlerFactory) -> Result<(), TransportError> {
        match self {
            Self::Tcp(server) => server.run(factory).await,
            Self::Unix(server) => server.run(factory).await,
            Self::Stdio(server) => {
                server.run(factory).await;
                Ok(())
            }
        }
    }

    /// Signal every live handler to stop, wait for all of them, then close
    /// the listening binding and perform binding-specific cleanup.
    pub async fn stop(&self) {
        match self {
            Self::Tcp(server) => server.stop().await,
            Self::Unix(server) => server.stop().await,
            Self::Stdio(server) => server.stop().await,
        }
    }

    /// The bound TCP address, once started. Useful with an ephemeral port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(server) => server.local_addr(),
            _ => None,
        }
    }
}

/// Event server over a TCP socket.
pub struct TcpServer {
    host: String,
    port: u16,
    local_addr: OnceLock<SocketAddr>,
    registry: HandlerRegistry,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            local_addr: OnceLock::new(),
            registry: HandlerRegistry::new(),
            shutdown: CancellationToken::new(),
            accept_task: Mutex::new(None),
        }
    }

    pub async fn start(&self, factory: HandlerFactory) -> Result<(), TransportError> {
        let address = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| TransportError::Bind {
                address: address.clone(),
                source,
            })?;
        if let Ok(local_addr) = listener.local_addr() {
            let _ = self.local_addr.set(local_addr);
            tracing::info!(address = %local_addr, "listening");
        }

        let task = spawn_accept_loop(listener, factory, self.registry.clone(), self.shutdown.clone());
        *self.accept_task.lock().await = Some(task);
        Ok(())
    }

    pub async fn run(&self, factory: HandlerFactory) -> Result<(), TransportError> {
        self.start(factory).await?;
        self.shutdown.cancelled().await;
        Ok(())
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        // Join the accept loop before draining the registry: an accept that
        // was already ready when the token fired may still launch one last
        // handler, and it must be registered before the registry snapshots.
        if let Some(task) = self.accept_task.lock().await.take() {
            if let Err(error) = task.await {
                tracing::warn!(%error, "accept loop ended abnormally");
            }
        }
        self.registry.stop().await;
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }
}

/// Event server over a Unix domain socket.
///
/// A stale socket file is unlinked before binding, and the file is removed
/// again when the listener stops — on `stop()` and, as a backstop for
/// abnormal exits, when the server is dropped.
pub struct UnixServer {
    path: PathBuf,
    bound: AtomicBool,
    registry: HandlerRegistry,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl UnixServer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bound: AtomicBool::new(false),
            registry: HandlerRegistry::new(),
            shutdown: CancellationToken::new(),
            accept_task: Mutex::new(None),
        }
    }

    pub async fn start(&self, factory: HandlerFactory) -> Result<(), TransportError> {
        remove_socket_file(&self.path);

        let listener = UnixListener::bind(&self.path).map_err(|source| TransportError::Bind {
            address: self.path.display().to_string(),
            source,
        })?;
        self.bound.store(true, Ordering::SeqCst);
        tracing::info!(path = %self.path.display(), "listening");

        let task = spawn_accept_loop(listener, factory, self.registry.clone(), self.shutdown.clone());
        *self.accept_task.lock().await = Some(task);
        Ok(())
    }

    pub async fn run(&self, factory: HandlerFactory) -> Result<(), TransportError> {
        self.start(factory).await?;
        self.shutdown.cancelled().await;
        Ok(())
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        // Same ordering as the TCP binding: no launch may follow the
        // registry's shutdown snapshot.
        if let Some(task) = self.accept_task.lock().await.take() {
            if let Err(error) = task.await {
                tracing::warn!(%error, "accept loop ended abnormally");
            }
        }
        self.registry.stop().await;
        if self.bound.swap(false, Ordering::SeqCst) {
            remove_socket_file(&self.path);
        }
    }
}

impl Drop for UnixServer {
    fn drop(&mut self) {
        if self.bound.swap(false, Ordering::SeqCst) {
            remove_socket_file(&self.path);
        }
    }
}

fn remove_socket_file(path: &std::path::Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed socket file"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to remove socket file");
        }
    }
}

/// Event server over the process's own stdin/stdout.
///
/// There is exactly one connection and no accept loop. Output goes through
/// the async writer, so emitting events never blocks the handler's loop on
/// a slow downstream reader beyond the transport's own flow control.
pub struct StdioServer {
    registry: HandlerRegistry,
    shutdown: CancellationToken,
}

impl StdioServer {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Launch the single stdio handler as a background task.
    pub fn start(&self, factory: HandlerFactory) {
        let handler = factory(EventWriter::stdout());
        self.registry.launch(EventReader::stdin(), handler);
    }

    /// Run the single stdio handler on the calling task until its loop
    /// exits (stdin end-of-stream, handler signal, or `stop()`).
    pub async fn run(&self, factory: HandlerFactory) {
        let handler = factory(EventWriter::stdout());
        run_connection(EventReader::stdin(), handler, self.shutdown.clone()).await;
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.registry.stop().await;
    }
}

impl Default for StdioServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept loop shared by the socket bindings: one handler task per accepted
/// connection, until the shutdown token fires. Dropping the listener on
/// exit closes the binding.
fn spawn_accept_loop<L>(
    listener: L,
    factory: HandlerFactory,
    registry: HandlerRegistry,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    L: Accept + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = listener.accept_split() => match result {
                    Ok((reader, writer)) => {
                        let handler = factory(writer);
                        registry.launch(reader, handler);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "failed to accept connection");
                    }
                },
            }
        }
    })
}

/// Listener abstraction so TCP and Unix share one accept loop.
#[async_trait]
trait Accept: Send + Sync {
    async fn accept_split(&self) -> std::io::Result<(EventReader, EventWriter)>;
}

#[async_trait]
impl Accept for TcpListener {
    async fn accept_split(&self) -> std::io::Result<(EventReader, EventWriter)> {
        let (stream, peer) = self.accept().await?;
        tracing::debug!(%peer, "connection accepted");
        let (read, write) = stream.into_split();
        Ok((EventReader::new(read), EventWriter::new(write)))
    }
}

#[async_trait]
impl Accept for UnixListener {
    async fn accept_split(&self) -> std::io::Result<(EventReader, EventWriter)> {
        let (stream, _) = self.accept().await?;
        tracing::debug!("connection accepted");
        let (read, write) = stream.into_split();
        Ok((EventReader::new(read), EventWriter::new(write)))
    }
}
