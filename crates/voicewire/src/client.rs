//! URI-selected event clients.
//!
//! One variant per transport binding, chosen by [`AsyncClient::from_uri`].
//! All variants share the same lifecycle: `connect` (a no-op for stdio,
//! which is connected by construction), paired `read_event`/`write_event`,
//! and an idempotent `disconnect` that is safe on every exit path — call it
//! twice, call it without ever connecting, it does the right thing.

use std::path::PathBuf;

use tokio::net::{TcpStream, UnixStream};

use crate::codec::{EventReader, EventWriter};
use crate::error::{ClientError, TransportError, UriError};
use crate::event::Event;
use crate::uri::PeerUri;

/// One codec session over a connected transport.
struct Session {
    reader: EventReader,
    writer: EventWriter,
}

impl Session {
    fn new(reader: EventReader, writer: EventWriter) -> Self {
        Self { reader, writer }
    }

    async fn close(mut self) {
        if let Err(error) = self.writer.close().await {
            tracing::debug!(%error, "error while closing event writer");
        }
    }
}

/// Event client over one of the three transport bindings.
pub enum AsyncClient {
    Tcp(TcpClient),
    Unix(UnixClient),
    Stdio(StdioClient),
}

impl AsyncClient {
    /// Select a client by connection URI. Fails locally on an unsupported
    /// scheme or a `tcp://` URI missing host or port; no I/O happens here.
    pub fn from_uri(uri: &str) -> Result<Self, UriError> {
        Ok(match PeerUri::parse(uri)? {
            PeerUri::Tcp { host, port } => Self::Tcp(TcpClient::new(host, port)),
            PeerUri::Unix { path } => Self::Unix(UnixClient::new(path)),
            PeerUri::Stdio => Self::Stdio(StdioClient::new()),
        })
    }

    /// Establish the underlying transport. Reconnecting an already-connected
    /// client drops the old session first.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        match self {
            Self::Tcp(client) => client.connect().await,
            Self::Unix(client) => client.connect().await,
            Self::Stdio(client) => {
                client.connect();
                Ok(())
            }
        }
    }

    /// Next event from the peer, or `Ok(None)` when it closed cleanly.
    pub async fn read_event(&mut self) -> Result<Option<Event>, ClientError> {
        let session = self.session_mut().ok_or(TransportError::NotConnected)?;
        Ok(session.reader.read_event().await?)
    }

    /// Encode, send, and flush one event.
    pub async fn write_event(&mut self, event: Event) -> Result<(), ClientError> {
        let session = self.session_mut().ok_or(TransportError::NotConnected)?;
        Ok(session.writer.write_event(event).await?)
    }

    /// Close the transport. Idempotent; a no-op when never connected.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.take_session() {
            session.close().await;
        }
    }

    fn session_mut(&mut self) -> Option<&mut Session> {
        match self {
            Self::Tcp(client) => client.session.as_mut(),
            Self::Unix(client) => client.session.as_mut(),
            Self::Stdio(client) => Some(client.session()),
        }
    }

    fn take_session(&mut self) -> Option<Session> {
        match self {
            Self::Tcp(client) => client.session.take(),
            Self::Unix(client) => client.session.take(),
            Self::Stdio(client) => client.session.take(),
        }
    }
}

/// Event client over a TCP socket.
pub struct TcpClient {
    host: String,
    port: u16,
    session: Option<Session>,
}

impl TcpClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            session: None,
        }
    }

    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let address = format!("{}:{}", self.host, self.port);
        let stream =
            TcpStream::connect(&address)
                .await
                .map_err(|source| TransportError::Connect {
                    address: address.clone(),
                    source,
                })?;
        tracing::debug!(%address, "connected");

        let (read, write) = stream.into_split();
        self.session = Some(Session::new(EventReader::new(read), EventWriter::new(write)));
        Ok(())
    }
}

/// Event client over a Unix domain socket.
pub struct UnixClient {
    path: PathBuf,
    session: Option<Session>,
}

impl UnixClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session: None,
        }
    }

    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let stream =
            UnixStream::connect(&self.path)
                .await
                .map_err(|source| TransportError::Connect {
                    address: self.path.display().to_string(),
                    source,
                })?;
        tracing::debug!(path = %self.path.display(), "connected");

        let (read, write) = stream.into_split();
        self.session = Some(Session::new(EventReader::new(read), EventWriter::new(write)));
        Ok(())
    }
}

/// Event client over the process's own stdin/stdout.
///
/// Connected by construction; meaningful only once per process. Disconnect
/// flushes but never closes the process's standard streams.
pub struct StdioClient {
    session: Option<Session>,
}

impl StdioClient {
    pub fn new() -> Self {
        Self { session: None }
    }

    fn connect(&mut self) {
        self.session();
    }

    fn session(&mut self) -> &mut Session {
        self.session
            .get_or_insert_with(|| Session::new(EventReader::stdin(), EventWriter::stdout()))
    }
}

impl Default for StdioClient {
    fn default() -> Self {
        Self::new()
    }
}
