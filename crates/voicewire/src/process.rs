//! Event client whose peer is an external program.
//!
//! The "connection" is a spawned child process's stdin/stdout pipe pair,
//! speaking the same framed protocol as the socket bindings — the client-side
//! counterpart of a peer served over `stdio://`. Used to splice helper
//! programs (audio sources, sinks, filters) into a pipeline.
//!
//! `disconnect` follows a graceful-then-forceful discipline: close the
//! child's stdin, give it a bounded grace period to exit on its own, then
//! kill it. The child is also killed if the client is dropped without a
//! disconnect, so no exit path leaks a subprocess.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::codec::{EventReader, EventWriter};
use crate::error::{ClientError, TransportError};
use crate::event::Event;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Event client over a child process's standard streams.
pub struct ProcessClient {
    program: String,
    args: Vec<String>,
    grace_period: Duration,
    child: Option<Child>,
    reader: Option<EventReader>,
    writer: Option<EventWriter>,
}

impl ProcessClient {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
            grace_period: DEFAULT_GRACE_PERIOD,
            child: None,
            reader: None,
            writer: None,
        }
    }

    /// How long `disconnect` waits for the child to exit after its stdin
    /// closes, before killing it.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Spawn the program with piped stdin/stdout.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Io(io::Error::other("child stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Io(io::Error::other("child stdout not captured")))?;

        tracing::debug!(program = %self.program, pid = child.id(), "spawned peer process");

        self.reader = Some(EventReader::new(stdout));
        self.writer = Some(EventWriter::new(stdin));
        self.child = Some(child);
        Ok(())
    }

    /// Next event from the child, or `Ok(None)` when it closed its stdout.
    pub async fn read_event(&mut self) -> Result<Option<Event>, ClientError> {
        let reader = self.reader.as_mut().ok_or(TransportError::NotConnected)?;
        Ok(reader.read_event().await?)
    }

    /// Encode, send, and flush one event to the child's stdin.
    pub async fn write_event(&mut self, event: Event) -> Result<(), ClientError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        Ok(writer.write_event(event).await?)
    }

    /// Close the child's stdin and reap it, killing after the grace period.
    /// Idempotent and safe when never connected.
    pub async fn disconnect(&mut self) {
        self.reader = None;

        // Dropping the writer closes the pipe; a well-behaved child sees
        // end-of-stream and exits.
        if let Some(mut writer) = self.writer.take() {
            if let Err(error) = writer.close().await {
                tracing::debug!(%error, "error while closing child stdin");
            }
        }

        let Some(mut child) = self.child.take() else {
            return;
        };
        match timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(program = %self.program, %status, "peer process exited");
            }
            Ok(Err(error)) => {
                tracing::warn!(program = %self.program, %error, "failed to reap peer process");
            }
            Err(_) => {
                tracing::warn!(
                    program = %self.program,
                    "peer process did not exit after stdin closed; killing"
                );
                if let Err(error) = child.kill().await {
                    tracing::warn!(program = %self.program, %error, "failed to kill peer process");
                }
            }
        }
    }
}
