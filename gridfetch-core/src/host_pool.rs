use std::collections::VecDeque;
use std::time::Duration;

use reqwest::{redirect::Policy, Client};

use crate::config::TlsConfig;
use crate::error::Result;
use crate::transfer::TransferRow;

/// Per-origin record: the authenticated HTTP session, the pending work
/// deque, and the concurrency accounting for one `datanode`. Created on
/// first sighting of a host and never destroyed while the engine runs
/// (§3, "HostPool (in-memory)").
///
/// Only the `Orchestrator` mutates `download_queue`; only the `Orchestrator`
/// (on spawn) and `EventSink` (on completion) mutate `thread_count`, both
/// while holding the engine lock (see `orchestrator.rs`).
#[derive(Debug)]
pub struct HostPool {
    pub datanode: String,
    pub session: Client,
    pub download_queue: VecDeque<TransferRow>,
    pub thread_count: usize,
    pub max_thread_count: usize,
}

impl HostPool {
    /// Builds a session whose certificate is loaded from the configured
    /// client-credential file, follows up to `tls.max_redirects` redirects,
    /// and (matching the source behavior) may skip TLS server-certificate
    /// verification for compatibility with legacy origins.
    pub fn new(
        datanode: impl Into<String>,
        client_identity_pem: &[u8],
        tls: &TlsConfig,
        max_thread_count: usize,
    ) -> Result<Self> {
        let identity = reqwest::Identity::from_pem(client_identity_pem)?;
        let session = Client::builder()
            .identity(identity)
            .redirect(Policy::limited(tls.max_redirects))
            .danger_accept_invalid_certs(!tls.verify_server_cert)
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            datanode: datanode.into(),
            session,
            download_queue: VecDeque::new(),
            thread_count: 0,
            max_thread_count,
        })
    }

    pub fn has_capacity(&self) -> bool {
        self.thread_count < self.max_thread_count
    }

    /// Extension point for adaptive per-host throttling. Specified as a
    /// no-op; a future implementation may adjust `max_thread_count` from
    /// observed error/speed statistics (§4.2).
    pub fn adjust_max_thread_count(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pool_has_capacity() {
        // A bogus PEM is fine here: HostPool construction only needs
        // `reqwest::Identity::from_pem` to accept *some* bytes; the
        // capacity bookkeeping under test doesn't touch the network.
        let pem = sample_self_signed_identity();
        let pool = HostPool::new("h1", &pem, &TlsConfig::default(), 3).unwrap();
        assert!(pool.has_capacity());
        assert_eq!(pool.thread_count, 0);
    }

    fn sample_self_signed_identity() -> Vec<u8> {
        include_bytes!("../testdata/test_identity.pem").to_vec()
    }
}
