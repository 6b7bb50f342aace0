//! Shared harness for the end-to-end scenarios in `../e2e.rs` (§8 TESTABLE
//! PROPERTIES). Rather than pulling in an HTTP mocking crate (none is
//! carried by the teacher pack), origins are canned `tokio::net::TcpListener`
//! servers speaking just enough HTTP/1.1 to satisfy `reqwest`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gridfetch_core::catalog::Catalog;
use gridfetch_core::config::{EngineConfig, TlsConfig};
use gridfetch_core::credentials::FileCredentialProvider;
use gridfetch_core::{Orchestrator, OrchestratorControl};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One canned HTTP response, written verbatim after the request headers have
/// been drained. `chunk_delay` drip-feeds the body in small pieces with a
/// sleep between each, so a test can observe a transfer mid-stream.
pub struct CannedResponse {
    pub status_line: &'static str,
    pub body: Vec<u8>,
    pub chunk_delay: Option<Duration>,
}

impl CannedResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_line: "HTTP/1.1 200 OK",
            body: body.into(),
            chunk_delay: None,
        }
    }

    pub fn status(status_line: &'static str) -> Self {
        Self {
            status_line,
            body: Vec::new(),
            chunk_delay: None,
        }
    }

    pub fn slow(body: impl Into<Vec<u8>>, chunk_delay: Duration) -> Self {
        Self {
            status_line: "HTTP/1.1 200 OK",
            body: body.into(),
            chunk_delay: Some(chunk_delay),
        }
    }
}

/// Accepts connections forever, serving the same canned response to each,
/// and tracks how many requests landed plus the peak number of connections
/// open at once (used by the per-host-cap scenario).
pub struct CannedServer {
    pub base_url: String,
    pub requests_served: Arc<AtomicUsize>,
    pub peak_concurrent: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl CannedServer {
    pub async fn start(response: CannedResponse) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests_served = Arc::new(AtomicUsize::new(0));
        let peak_concurrent = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let requests_served_task = requests_served.clone();
        let peak_concurrent_task = peak_concurrent.clone();
        let in_flight_task = in_flight.clone();
        let response = Arc::new(response);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let requests_served = requests_served_task.clone();
                let peak_concurrent = peak_concurrent_task.clone();
                let in_flight = in_flight_task.clone();
                let response = response.clone();

                tokio::spawn(async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak_concurrent.fetch_max(current, Ordering::SeqCst);
                    requests_served.fetch_add(1, Ordering::SeqCst);

                    serve_one(socket, &response).await;

                    in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests_served,
            peak_concurrent,
            in_flight,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn served_count(&self) -> usize {
        self.requests_served.load(Ordering::SeqCst)
    }

    pub fn peak_concurrent(&self) -> usize {
        self.peak_concurrent.load(Ordering::SeqCst)
    }

    pub fn current_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

async fn serve_one(mut socket: tokio::net::TcpStream, response: &CannedResponse) {
    let mut buf = [0u8; 4096];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }

    let header = format!(
        "{}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n",
        response.status_line,
        response.body.len()
    );
    if socket.write_all(header.as_bytes()).await.is_err() {
        return;
    }

    match response.chunk_delay {
        None => {
            let _ = socket.write_all(&response.body).await;
        }
        Some(delay) => {
            for chunk in response.body.chunks(256) {
                if socket.write_all(chunk).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
                tokio::time::sleep(delay).await;
            }
        }
    }
    let _ = socket.shutdown().await;
}

/// A throwaway catalog file plus base download directory, both cleaned up
/// when the returned `tempfile::TempDir` is dropped.
pub struct Workspace {
    _dir: tempfile::TempDir,
    pub database_file: PathBuf,
    pub base_path: PathBuf,
}

impl Workspace {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let database_file = dir.path().join("catalog.sqlite");
        let base_path = dir.path().join("data");
        tokio::fs::create_dir_all(&base_path).await.unwrap();

        // Pre-create the schema so the test can seed rows before the
        // orchestrator's own `Catalog::connect` runs the same (idempotent)
        // migration.
        Catalog::connect(&database_file).await.unwrap();

        Self {
            _dir: dir,
            database_file,
            base_path,
        }
    }

    pub fn test_engine_config(&self, max_total_threads: usize, initial_threads_per_host: usize) -> EngineConfig {
        EngineConfig {
            database_file: self.database_file.clone(),
            base_path: self.base_path.clone(),
            username: String::new(),
            password: String::new(),
            auth_server: String::new(),
            credentials_path: test_credentials_path(),
            initial_threads_per_host,
            max_total_threads,
            blocksize: 256,
            num_recs: 5,
            poll_interval: Duration::from_millis(30),
            tls: TlsConfig::default(),
        }
    }

    pub async fn seed_row(&self, datanode: &str, local_image: &str, location: &str, checksum: &str, checksum_type: &str) {
        let pool = gridfetch_core::catalog::Catalog::connect(&self.database_file)
            .await
            .unwrap();
        let model = format!("model-{datanode}");
        sqlx::query("INSERT OR IGNORE INTO model (name, datanode, institute) VALUES (?, ?, 'test')")
            .bind(&model)
            .bind(datanode)
            .execute(pool.pool())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO transfert (model, location, datanode, local_image, checksum, checksum_type, status)
             VALUES (?, ?, ?, ?, ?, ?, 'waiting')",
        )
        .bind(&model)
        .bind(location)
        .bind(datanode)
        .bind(local_image)
        .bind(checksum)
        .bind(checksum_type)
        .execute(pool.pool())
        .await
        .unwrap();
    }

    pub async fn row_status(&self, transfert_id: i64) -> Option<String> {
        let pool = gridfetch_core::catalog::Catalog::connect(&self.database_file)
            .await
            .unwrap();
        sqlx::query_scalar("SELECT status FROM transfert WHERE transfert_id = ?")
            .bind(transfert_id)
            .fetch_optional(pool.pool())
            .await
            .unwrap()
    }

    pub async fn all_statuses(&self) -> Vec<String> {
        let pool = gridfetch_core::catalog::Catalog::connect(&self.database_file)
            .await
            .unwrap();
        sqlx::query_scalar("SELECT status FROM transfert ORDER BY transfert_id")
            .fetch_all(pool.pool())
            .await
            .unwrap()
    }

    pub async fn error_msg(&self, transfert_id: i64) -> Option<String> {
        let pool = gridfetch_core::catalog::Catalog::connect(&self.database_file)
            .await
            .unwrap();
        sqlx::query_scalar("SELECT error_msg FROM transfert WHERE transfert_id = ?")
            .bind(transfert_id)
            .fetch_one(pool.pool())
            .await
            .unwrap()
    }
}

fn test_credentials_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata/test_identity.pem")
}

/// Spawns the orchestrator on its own task and returns both the join handle
/// and a control used to request shutdown.
pub async fn spawn_orchestrator(config: EngineConfig) -> (JoinHandle<gridfetch_core::Result<()>>, OrchestratorControl) {
    let credentials = FileCredentialProvider::new(config.credentials_path.clone());
    let orchestrator = Orchestrator::new(config, &credentials).await.unwrap();
    let control = orchestrator.control();
    let handle = tokio::spawn(orchestrator.run());
    (handle, control)
}

/// Polls `row_status` until it leaves `waiting`/`running` or the timeout
/// elapses.
pub async fn wait_for_terminal(workspace: &Workspace, transfert_id: i64, timeout: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(status) = workspace.row_status(transfert_id).await {
            if status == "done" || status == "error" {
                return Some(status);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return workspace.row_status(transfert_id).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
