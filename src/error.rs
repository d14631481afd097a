//! Error types for trzsz transfers.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Everything that can end a transfer session.
///
/// The `Display` text of a variant is what goes out on the wire in the
/// `#fail:` line, so keep it short and human readable.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Trigger-like text that does not parse. Never surfaces to the user.
    #[error("malformed trigger: {0}")]
    MalformedTrigger(String),

    /// A payload that failed base64, inflate, integer or JSON decoding.
    #[error("malformed {tag} payload: {message}")]
    MalformedPayload { tag: String, message: String },

    /// The peer acknowledged something other than what was sent.
    #[error("ack check [{actual}] <> [{expected}]")]
    AckMismatch { expected: String, actual: String },

    /// Final MD5 comparison failed.
    #[error("Check MD5 of {file} failed")]
    ChecksumMismatch { file: String },

    /// The user dismissed the file or directory chooser.
    #[error("cancelled by chooser")]
    ChooserCancelled,

    /// The cancel key was pressed or the host stopped the transfer.
    #[error("Stopped")]
    UserCancelled,

    /// Reading a local source file failed.
    #[error("read failed: {message}")]
    SourceIo { message: String },

    /// Creating or writing a local destination file failed.
    #[error("write failed: {message}")]
    SinkIo { message: String },

    /// A well-formed line with a tag other than the one expected.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage { expected: String, actual: String },

    /// Any other protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No line arrived within the negotiated timeout.
    #[error("receive {expected} timeout")]
    Timeout { expected: String },

    /// The remote side reported a failure with `#fail:` or `#FAIL:`.
    #[error("remote failure: {0}")]
    RemoteFail(String),

    /// The remote side exited while another message was expected.
    #[error("remote exit: {0}")]
    RemoteExit(String),

    /// The filter went away while the session was still waiting for input.
    #[error("input channel closed")]
    ChannelClosed,

    /// Invalid host configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TransferError {
    pub(crate) fn malformed(tag: impl Into<String>, message: impl ToString) -> Self {
        TransferError::MalformedPayload {
            tag: tag.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn source_io(err: anyhow::Error) -> Self {
        TransferError::SourceIo {
            message: format!("{:#}", err),
        }
    }

    pub(crate) fn sink_io(err: anyhow::Error) -> Self {
        TransferError::SinkIo {
            message: format!("{:#}", err),
        }
    }

    /// Errors raised by the remote peer itself; replying with `fail` is pointless.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            TransferError::RemoteFail(_) | TransferError::RemoteExit(_)
        )
    }

    /// Errors that mean the user asked to stop rather than something broke.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TransferError::UserCancelled | TransferError::ChooserCancelled
        )
    }
}
