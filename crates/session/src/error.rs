use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("timestamp '{raw}' is not valid ISO-8601 on `{stage}`: {source}"))]
    InvalidTimestamp {
        stage: &'static str,
        raw: String,
        source: chrono::ParseError,
    },
    #[snafu(display("message id must not be empty on `{stage}`"))]
    InvalidMessageId { stage: &'static str },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Why a dispatch or retry did not produce a confirmed message.
///
/// These never surface as `Err`; they ride inside [`crate::DispatchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchFailure {
    /// The send callback resolved without a message.
    NoMessageReturned,
    /// A retry was requested for a message with no failed record.
    RetryWithoutRecord,
    /// The failed record pointed at a group that no longer holds any message.
    EmptyFailedGroup,
    /// The session was disposed before the dispatch could start.
    Disposed,
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoMessageReturned => "send callback returned no message",
            Self::RetryWithoutRecord => "no failed record exists for this message",
            Self::EmptyFailedGroup => "failed record points at an empty group",
            Self::Disposed => "session has been disposed",
        };
        formatter.write_str(text)
    }
}
