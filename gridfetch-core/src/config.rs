use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FetchError, Result};

/// Engine-wide tuning knobs, enumerated in the external interfaces section of
/// the specification. Loadable independently of the CLI crate so the engine
/// stays testable without `clap`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_file: PathBuf,
    pub base_path: PathBuf,
    pub username: String,
    pub password: String,
    pub auth_server: String,
    pub credentials_path: PathBuf,

    pub initial_threads_per_host: usize,
    pub max_total_threads: usize,
    pub blocksize: usize,
    pub num_recs: usize,
    pub poll_interval: Duration,
    pub tls: TlsConfig,
}

/// TLS behavior for per-host HTTP sessions. Carried forward from the source
/// implementation's `verify=False` default, but surfaced as an explicit flag
/// rather than hardcoded, per REDESIGN FLAGS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub verify_server_cert: bool,
    pub max_redirects: usize,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_server_cert: false,
            max_redirects: 5,
        }
    }
}

impl EngineConfig {
    /// Queue depth used by the write serializer's bounded channel.
    pub fn max_queue_len(&self) -> usize {
        self.max_total_threads * 2
    }

    pub fn from_env() -> Result<Self> {
        let database_file = env_path("GRIDFETCH_DATABASE_FILE", "gridfetch.db");
        let base_path = env_path("GRIDFETCH_BASE_PATH", "./data");
        let username = std::env::var("GRIDFETCH_USERNAME").unwrap_or_default();
        let password = std::env::var("GRIDFETCH_PASSWORD").unwrap_or_default();
        let auth_server = std::env::var("GRIDFETCH_AUTH_SERVER").unwrap_or_default();
        let credentials_path = std::env::var("GRIDFETCH_CREDENTIALS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_credentials_path());

        let initial_threads_per_host = env_parse("GRIDFETCH_INITIAL_THREADS_PER_HOST", 3)?;
        let max_total_threads = env_parse("GRIDFETCH_MAX_TOTAL_THREADS", 100)?;
        let blocksize = env_parse("GRIDFETCH_BLOCKSIZE", 1024 * 1024)?;
        let num_recs = env_parse("GRIDFETCH_NUM_RECS", 5)?;
        let poll_interval_secs = env_parse("GRIDFETCH_POLL_INTERVAL_SECS", 60)?;

        Ok(Self {
            database_file,
            base_path,
            username,
            password,
            auth_server,
            credentials_path,
            initial_threads_per_host,
            max_total_threads,
            blocksize,
            num_recs,
            poll_interval: Duration::from_secs(poll_interval_secs),
            tls: TlsConfig::default(),
        })
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn default_credentials_path() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".esg").join("credentials.pem"))
        .unwrap_or_else(|_| PathBuf::from(".esg/credentials.pem"))
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| FetchError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}
