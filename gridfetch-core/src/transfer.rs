use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier for a [`TransferRow`]; maps directly to the catalog's
/// `transfert_id` primary key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub i64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted lifecycle state of a [`TransferRow`]. Transitions are driven
/// exclusively by `EventSink` (see `catalog::sink`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Waiting,
    Running,
    Done,
    Error,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Waiting => "waiting",
            TransferStatus::Running => "running",
            TransferStatus::Done => "done",
            TransferStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "waiting" => Some(TransferStatus::Waiting),
            "running" => Some(TransferStatus::Running),
            "done" => Some(TransferStatus::Done),
            "error" => Some(TransferStatus::Error),
            _ => None,
        }
    }
}

/// Checksum algorithm named by a transfer row's `checksum_type` column.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    Sha256,
    Md5,
}

impl ChecksumAlgorithm {
    /// Parses a (lowercased) `checksum_type` string, returning `None` for any
    /// name the engine does not support — the caller turns that into an
    /// `UNSUPPORTED_CHECKSUM_TYPE` error per the specification.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "sha256" => Some(ChecksumAlgorithm::Sha256),
            "md5" => Some(ChecksumAlgorithm::Md5),
            _ => None,
        }
    }
}

/// A unit of work: one file to fetch, end to end. Immutable snapshot handed
/// to a `TransferWorker` at spawn time — workers never write back to the
/// catalog directly, only through emitted events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferRow {
    pub transfert_id: TransferId,
    pub location: String,
    pub datanode: String,
    pub local_image: String,
    pub checksum: String,
    pub checksum_type: String,
    pub status: TransferStatus,
    pub error_msg: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub rate: Option<f64>,
}

/// Observational fields written on a terminal transition, computed by a
/// `TransferWorker` and applied atomically by `EventSink`.
#[derive(Clone, Debug)]
pub struct TerminalTimings {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub duration: f64,
    pub rate: f64,
}
