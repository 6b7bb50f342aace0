use crate::transfer::{TerminalTimings, TransferId};

/// Structured replacement for the source implementation's untyped
/// `(kind, transfert_id, data)` tuples (DESIGN NOTES, "Dynamic event
/// tuples"). One variant per event kind named in §4.5, each carrying its own
/// payload type. `EventSink` dispatches on the variant instead of a string
/// tag.
#[derive(Clone, Debug)]
pub struct WorkerEvent {
    pub transfert_id: TransferId,
    pub kind: WorkerEventKind,
}

impl WorkerEvent {
    pub fn new(transfert_id: TransferId, kind: WorkerEventKind) -> Self {
        Self { transfert_id, kind }
    }
}

#[derive(Clone, Debug)]
pub enum WorkerEventKind {
    /// Response headers arrived with a 200 status; `content_length` is the
    /// parsed `Content-Length` header, if present.
    Length { content_length: Option<u64> },
    /// Instantaneous transfer speed for the chunk just written, in KB/s.
    Speed { kbps: f64 },
    /// Unrecoverable failure; the owning transfer moves to `error`.
    Error { kind: ErrorKind, timings: TerminalTimings },
    /// Cooperative interruption (shutdown or mid-stream exception); the
    /// owning transfer moves back to `waiting` for a future retry.
    Aborted { reason: String, timings: TerminalTimings },
    /// Verified completion; the owning transfer moves to `done`.
    Done { timings: TerminalTimings },
}

/// Taxonomy from §7 ERROR HANDLING DESIGN. `Display` renders the exact
/// `error_msg` string persisted to the catalog.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    RequestsUnknown(String),
    Connection(String),
    Http(String),
    NoUrl,
    TooManyRedirects,
    Unknown(String),
    AuthFail,
    FileNotFound,
    ServerError,
    HttpStatus(u16),
    UnsupportedChecksumType(String),
    FileCreationError,
    ChecksumMismatch,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::RequestsUnknown(detail) => {
                write!(f, "REQUESTS_UNKNOWN_ERROR:{detail}")
            }
            ErrorKind::Connection(detail) => write!(f, "CONNECTION_ERROR:{detail}"),
            ErrorKind::Http(detail) => write!(f, "HTTP_ERROR:{detail}"),
            ErrorKind::NoUrl => write!(f, "NOURL_ERROR"),
            ErrorKind::TooManyRedirects => write!(f, "TOO_MANY_REDIRECTS"),
            ErrorKind::Unknown(detail) => write!(f, "UNKNOWN_ERROR:{detail}"),
            ErrorKind::AuthFail => write!(f, "AUTH_FAIL"),
            ErrorKind::FileNotFound => write!(f, "FILE_NOT_FOUND"),
            ErrorKind::ServerError => write!(f, "SERVER_ERROR"),
            ErrorKind::HttpStatus(code) => write!(f, "{code}"),
            ErrorKind::UnsupportedChecksumType(name) => {
                write!(f, "UNSUPPORTED_CHECKSUM_TYPE:{name}")
            }
            ErrorKind::FileCreationError => write!(f, "FILE_CREATION_ERROR"),
            ErrorKind::ChecksumMismatch => write!(f, "CHECKSUM_MISMATCH_ERROR"),
        }
    }
}
