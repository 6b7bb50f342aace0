use thiserror::Error;

/// Infrastructure-level failures: catalog setup, configuration, credential
/// loading. Per-transfer failures are not represented here — they are
/// structured [`crate::events::WorkerEvent`] values persisted to the catalog,
/// not exceptions unwound through `?` (see `events.rs`).
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    #[error("catalog migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("HTTP client construction error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;
