use std::fmt;
use std::io;
use std::time::Duration;

/// Error raised while exchanging framed messages with a worker process.
///
/// Each variant carries a distinct recovery policy: broken-pipe class errors
/// are retried once by the buffered path, timeouts kill the child, and the
/// frame/decode variants poison the current exchange without retry.
#[derive(Debug)]
pub enum WorkerError {
    /// The worker child process could not be launched.
    Spawn(io::Error),
    /// Pipe I/O failed, including end-of-stream while a frame was expected.
    Io(io::Error),
    /// No response arrived within the configured per-request timeout.
    Timeout(Duration),
    /// A frame declared a zero-byte payload.
    EmptyFrame,
    /// A frame declared a payload above [`crate::frame::MAX_FRAME_LEN`].
    FrameTooLarge(u32),
    /// A frame payload was not valid JSON for the expected shape.
    Decode(serde_json::Error),
    /// A stream frame carried an unrecognized `type` tag.
    UnknownFrame(String),
    /// The worker reported a stream-level failure via an `error` frame.
    Stream(String),
}

impl WorkerError {
    /// Broken-pipe predicate shared by the retry logic and the status-code
    /// mapping. No single error value covers every way a pipe dies, so this
    /// matches the EOF/pipe error kinds plus the usual message texts.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            WorkerError::Io(e) => {
                matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::WriteZero
                ) || {
                    let msg = e.to_string();
                    msg.contains("broken pipe")
                        || msg.contains("pipe closed")
                        || msg.contains("reset")
                }
            }
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkerError::Timeout(_))
    }

    pub(crate) fn pipe_closed() -> Self {
        WorkerError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "worker pipe closed",
        ))
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Spawn(e) => write!(f, "failed to spawn worker process: {e}"),
            WorkerError::Io(e) => write!(f, "worker pipe error: {e}"),
            WorkerError::Timeout(d) => write!(f, "worker request timeout after {d:?}"),
            WorkerError::EmptyFrame => write!(f, "zero-length frame"),
            WorkerError::FrameTooLarge(len) => {
                write!(f, "frame length {len} exceeds maximum frame size")
            }
            WorkerError::Decode(e) => write!(f, "invalid worker payload: {e}"),
            WorkerError::UnknownFrame(tag) => write!(f, "unknown stream frame type: {tag:?}"),
            WorkerError::Stream(msg) => write!(f, "stream error from worker: {msg}"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Spawn(e) | WorkerError::Io(e) => Some(e),
            WorkerError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerError {
    fn from(e: io::Error) -> Self {
        WorkerError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_counts_as_broken_pipe() {
        let err = WorkerError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.is_broken_pipe());
    }

    #[test]
    fn message_text_counts_as_broken_pipe() {
        let err = WorkerError::Io(io::Error::other("write failed: broken pipe"));
        assert!(err.is_broken_pipe());
    }

    #[test]
    fn other_errors_are_not_broken_pipe() {
        assert!(!WorkerError::Timeout(Duration::from_secs(1)).is_broken_pipe());
        assert!(!WorkerError::EmptyFrame.is_broken_pipe());
        let err = WorkerError::Io(io::Error::other("some other error"));
        assert!(!err.is_broken_pipe());
    }
}
