//! Protocol version string.

/// Version tag written into every outgoing frame header.
///
/// Diagnostic only: decoders accept frames carrying any version (or none)
/// without changing parsing behavior.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");
