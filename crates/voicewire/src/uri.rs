//! Connection URI parsing and scheme dispatch.
//!
//! Three schemes select the three transport bindings:
//!
//! - `tcp://host:port` — host and port both required
//! - `unix:///absolute/path` — filesystem socket path
//! - `stdio://` — the process's own standard streams
//!
//! Parsing fails immediately and locally; no connection attempt is made for
//! a rejected URI.

use std::fmt;
use std::path::PathBuf;

use crate::error::UriError;

/// A parsed connection URI, one variant per transport binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerUri {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
    Stdio,
}

impl PeerUri {
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let Some((scheme, rest)) = uri.split_once("://") else {
            return Err(UriError::Malformed {
                uri: uri.to_string(),
            });
        };

        match scheme {
            "tcp" => parse_tcp(rest),
            "unix" => {
                if rest.is_empty() {
                    return Err(UriError::MissingPath);
                }
                let path = PathBuf::from(rest);
                if !path.is_absolute() {
                    return Err(UriError::RelativePath {
                        path: rest.to_string(),
                    });
                }
                Ok(Self::Unix { path })
            }
            "stdio" => Ok(Self::Stdio),
            other => Err(UriError::UnsupportedScheme {
                scheme: other.to_string(),
            }),
        }
    }
}

fn parse_tcp(authority: &str) -> Result<PeerUri, UriError> {
    if authority.is_empty() {
        return Err(UriError::MissingHost);
    }

    // Bracketed form for IPv6 literals: tcp://[::1]:10700
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(|| UriError::Malformed {
            uri: format!("tcp://{authority}"),
        })?;
        let port = after.strip_prefix(':').ok_or(UriError::MissingPort)?;
        (host, port)
    } else {
        authority.rsplit_once(':').ok_or(UriError::MissingPort)?
    };

    if host.is_empty() {
        return Err(UriError::MissingHost);
    }
    if port.is_empty() {
        return Err(UriError::MissingPort);
    }
    let port = port.parse::<u16>().map_err(|_| UriError::InvalidPort {
        port: port.to_string(),
    })?;

    Ok(PeerUri::Tcp {
        host: host.to_string(),
        port,
    })
}

impl fmt::Display for PeerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Unix { path } => write!(f, "unix://{}", path.display()),
            Self::Stdio => write!(f, "stdio://"),
        }
    }
}
