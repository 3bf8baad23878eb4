//! Error taxonomy for the core, per the error-handling design in the spec:
//! fatal configuration errors, transient network errors, protocol
//! violations, journal I/O errors, and script failures. Only the first and
//! the journal-recovery case actually need to reach a caller; the rest are
//! handled internally (retried, logged, or turned into a state transition)
//! and never propagate out of [`crate::dispatcher::Dispatcher::run`].

use std::io;

/// Errors from decoding or encoding a BOOTP/DHCP packet.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("packet shorter than the minimum BOOTP length ({0} < 300 bytes)")]
    TooShort(usize),
    #[error("missing DHCP magic cookie")]
    MissingCookie,
    #[error("option {code} truncated: need {need} bytes, have {have}")]
    TruncatedOption { code: u8, need: usize, have: usize },
}

/// Errors from parsing or writing the lease journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed lease record: {0}")]
    Parse(String),
}

/// Errors from invoking the external script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to spawn {path:?}: {source}")]
    Spawn {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait on script child: {0}")]
    Wait(#[source] io::Error),
    #[error("value for {key} contains characters unsafe to pass to a shell")]
    UnsafeValue { key: String },
}

/// Fatal configuration errors: the only variant a caller (the binary) is
/// expected to handle by terminating the process with a diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("lease journal error")]
    Journal(#[from] JournalError),
    #[error("no usable interface: {0}")]
    NoInterface(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
