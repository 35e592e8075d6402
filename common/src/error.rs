use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("reading response body failed: {0}")]
    Read(String),
    #[error("more than {limit} redirects starting at {url}")]
    TooManyRedirects { url: String, limit: u8 },
    #[error("unsupported redirect location `{0}`")]
    BadLocation(String),
}

impl TransportError {
    pub fn request(url: &str, message: impl Into<String>) -> Self {
        Self::Request {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlashError {
    #[error("image of {requested} bytes does not fit the {capacity} byte update slot")]
    InsufficientSpace { requested: u64, capacity: u64 },
    #[error("no update slot available: {0}")]
    NoUpdateSlot(String),
    #[error("flash write failed: {0}")]
    Write(String),
    #[error("image rejected on commit: {0}")]
    Commit(String),
    #[error("abort failed: {0}")]
    Abort(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("version endpoint answered HTTP {0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("version body exceeds {limit} bytes")]
    TooLong { limit: usize },
    #[error("version body is empty")]
    Empty,
}

/// Coarse classification of update failures. Every kind is handled the same
/// way at boot: log and keep running the current image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Integrity,
    SessionOpen,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Integrity => "integrity",
            Self::SessionOpen => "session-open",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("firmware endpoint answered HTTP {0}")]
    Status(u16),
    #[error("firmware response has no usable content length")]
    MissingContentLength,
    #[error("failed to open flash session: {0}")]
    SessionOpen(#[source] FlashError),
    #[error("failed writing image: {0}")]
    Write(#[source] FlashError),
    #[error("wrote {written} of {expected} bytes")]
    LengthMismatch { expected: u64, written: u64 },
    #[error("failed to commit image: {0}")]
    Commit(#[source] FlashError),
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Status(_) | Self::MissingContentLength => {
                ErrorKind::Transport
            }
            Self::SessionOpen(_) => ErrorKind::SessionOpen,
            Self::Write(_) | Self::LengthMismatch { .. } | Self::Commit(_) => {
                ErrorKind::Integrity
            }
        }
    }
}
