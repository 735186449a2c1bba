//! voicewire: an inter-process event protocol for voice assistant components.
//!
//! Speech recognizers, synthesizers, wake word detectors, intent handlers and
//! satellites talk to each other by exchanging [`Event`]s over a duplex byte
//! stream — a TCP socket, a Unix domain socket, or a process's own
//! stdin/stdout. The crate provides the wire codec, URI-selected client and
//! server bindings, and the per-connection handler lifecycle; everything a
//! component needs to join a pipeline without caring what carries its bytes.

mod version;

pub mod client;
pub mod codec;
pub mod error;
pub mod event;
pub mod ping;
pub mod pipeline;
pub mod process;
pub mod server;
pub mod uri;

pub use client::AsyncClient;
pub use codec::{EventCodec, EventReader, EventWriter};
pub use error::{ClientError, EventError, PipelineError, TransportError, UriError, WireError};
pub use event::{Event, Eventable};
pub use ping::{Ping, Pong};
pub use pipeline::{PipelineStage, RunPipeline};
pub use process::ProcessClient;
pub use server::{AsyncServer, ConnectionId, EventHandler, HandlerFactory};
pub use uri::PeerUri;
pub use version::PROTOCOL_VERSION;
