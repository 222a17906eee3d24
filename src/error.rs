use std::io;

use thiserror::Error;

/// Failures a probing run can hit.
///
/// Only `Resolution`, `Transport` and `Output` abort a run. `MalformedPacket`
/// is produced while parsing received datagrams and is always absorbed by
/// the receive loop; a lost probe is never an error (see `ProbeOutcome::Loss`).
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed packet ({len} bytes)")]
    MalformedPacket { len: usize },

    #[error("failed to write report: {0}")]
    Output(#[from] io::Error),
}

impl ProbeError {
    pub fn resolution(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(context: impl Into<String>, source: io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// True when a socket operation was refused for lack of privilege.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.kind() == io::ErrorKind::PermissionDenied)
    }
}
