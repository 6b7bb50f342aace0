use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, CatalogReader, EventSink};
use crate::config::EngineConfig;
use crate::credentials::CredentialProvider;
use crate::error::Result;
use crate::events::{ErrorKind, WorkerEvent, WorkerEventKind};
use crate::host_pool::HostPool;
use crate::transfer::{TerminalTimings, TransferId, TransferRow};
use crate::worker::{self, TransferWorkerHandle};
use crate::write_serializer::WriteSerializer;

const SPAWN_PACING: Duration = Duration::from_millis(200);
const TICK_PACING: Duration = Duration::from_millis(100);
const IMMEDIATE_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Cloneable remote control for a running `Orchestrator`, handed to the
/// process's signal handlers (§6, "Signals / lifecycle") so that installing
/// them stays the binary's job, not the engine's.
#[derive(Clone, Debug)]
pub struct OrchestratorControl {
    running: Arc<AtomicBool>,
    stop_now: Arc<AtomicBool>,
}

impl OrchestratorControl {
    /// Graceful shutdown: let in-flight transfers finish, then stop.
    pub fn request_graceful_shutdown(&self) {
        info!("graceful shutdown requested");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Immediate shutdown: abort every in-flight transfer now (§4.6).
    pub fn request_immediate_shutdown(&self) {
        info!("immediate shutdown requested");
        self.stop_now.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

struct RegisteredWorker {
    datanode: String,
    handle: TransferWorkerHandle,
}

/// Owns the global run flag, wires the other components, assigns work rows
/// to their `HostPool`, promotes queued work into `TransferWorker`s under
/// the caps, and executes the two shutdown disciplines (§4.6).
pub struct Orchestrator {
    config: EngineConfig,
    catalog: Catalog,
    host_pools: HashMap<String, HostPool>,
    registry: HashMap<TransferId, RegisteredWorker>,
    total_threads: usize,
    client_identity: Vec<u8>,
    serializer: Option<Arc<WriteSerializer>>,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    metadata_rx: mpsc::Receiver<TransferRow>,
    metadata_tx: mpsc::Sender<TransferRow>,
    sink: EventSink,
    running: Arc<AtomicBool>,
    stop_now: Arc<AtomicBool>,
}

impl Orchestrator {
    pub async fn new(config: EngineConfig, credentials: &dyn CredentialProvider) -> Result<Self> {
        let catalog = Catalog::connect(&config.database_file).await?;
        let client_identity = credentials.load_client_identity().await?;
        let serializer = Some(Arc::new(WriteSerializer::start(config.max_queue_len())));
        let (events_tx, events_rx) = mpsc::channel(config.max_total_threads.max(1) * 4);
        let (metadata_tx, metadata_rx) = mpsc::channel(256);
        let sink = EventSink::new(catalog.pool().clone());

        Ok(Self {
            host_pools: HashMap::new(),
            registry: HashMap::new(),
            total_threads: 0,
            client_identity,
            serializer,
            events_tx,
            events_rx,
            metadata_rx,
            metadata_tx,
            sink,
            running: Arc::new(AtomicBool::new(true)),
            stop_now: Arc::new(AtomicBool::new(false)),
            catalog,
            config,
        })
    }

    pub fn control(&self) -> OrchestratorControl {
        OrchestratorControl {
            running: self.running.clone(),
            stop_now: self.stop_now.clone(),
        }
    }

    /// Authenticates, starts the `CatalogReader`, and runs the dispatch loop
    /// until a stop signal arrives. The only public operation (§4.6).
    pub async fn run(mut self) -> Result<()> {
        let reader = CatalogReader::new(self.catalog.pool().clone(), self.config.poll_interval);
        let reader_running = self.running.clone();
        let reader_handle = tokio::spawn(reader.run(self.metadata_tx.clone(), reader_running));

        while self.running.load(Ordering::SeqCst) {
            self.dispatch_tick().await;
        }

        reader_handle.abort();

        if self.stop_now.load(Ordering::SeqCst) {
            self.shutdown_immediate().await;
        } else {
            self.shutdown_graceful().await;
        }

        Ok(())
    }

    async fn dispatch_tick(&mut self) {
        // 1. Drain incoming rows non-blockingly, assigning each to its host's queue.
        while let Ok(row) = self.metadata_rx.try_recv() {
            if !self.host_pools.contains_key(&row.datanode) {
                match HostPool::new(
                    row.datanode.clone(),
                    &self.client_identity,
                    &self.config.tls,
                    self.config.initial_threads_per_host,
                ) {
                    Ok(pool) => {
                        self.host_pools.insert(row.datanode.clone(), pool);
                    }
                    Err(e) => {
                        // A malformed/expired credential or a TLS backend
                        // failure is not transient for this run: fail the
                        // row the same way any other unrecoverable transfer
                        // error is reported (§7) instead of panicking the
                        // whole orchestrator task over one bad host.
                        error!(
                            datanode = %row.datanode,
                            error = %e,
                            "failed to construct host session, marking row as error"
                        );
                        self.fail_unspawned_row(row, ErrorKind::Unknown(format!("HOST_SESSION_ERROR:{e}")))
                            .await;
                        continue;
                    }
                }
            }
            let pool = self
                .host_pools
                .get_mut(&row.datanode)
                .expect("inserted or already present above");
            pool.download_queue.push_back(row);
        }

        // 2. Promote queued work under the per-host and global caps.
        let datanodes: Vec<String> = self.host_pools.keys().cloned().collect();
        for datanode in datanodes {
            loop {
                let Some(pool) = self.host_pools.get_mut(&datanode) else { break };
                if pool.download_queue.is_empty()
                    || !pool.has_capacity()
                    || self.total_threads >= self.config.max_total_threads
                {
                    break;
                }
                let row = pool.download_queue.pop_front().expect("checked non-empty above");
                let session = pool.session.clone();
                pool.thread_count += 1;
                self.total_threads += 1;

                let id = row.transfert_id;
                let serializer = self
                    .serializer
                    .as_ref()
                    .expect("serializer is only taken during shutdown, after dispatch stops")
                    .clone();
                let handle = worker::spawn(
                    row,
                    session,
                    serializer,
                    self.config.base_path.clone(),
                    self.config.blocksize,
                    self.config.num_recs,
                    self.events_tx.clone(),
                );
                self.registry.insert(
                    id,
                    RegisteredWorker {
                        datanode: datanode.clone(),
                        handle,
                    },
                );

                self.drain_events_nonblocking().await;
                sleep(SPAWN_PACING).await;
            }
        }

        // 3. Throttle-adjustment hook (no-op extension point, §4.2).
        for pool in self.host_pools.values_mut() {
            pool.adjust_max_thread_count();
        }

        // 4. Final drain for this tick, then pace.
        self.drain_events_nonblocking().await;
        sleep(TICK_PACING).await;
    }

    /// Fails a row that never got far enough to have a registered worker
    /// (e.g. its host session failed to build). Reuses `apply_event` so the
    /// persistence and database-failure-triggers-shutdown behavior is
    /// identical to a worker-emitted error; since no `TransferWorkerHandle`
    /// was ever registered for this `transfert_id`, the registry lookup in
    /// `apply_event` is simply a no-op rather than double-decrementing any
    /// counters.
    async fn fail_unspawned_row(&mut self, row: TransferRow, kind: ErrorKind) {
        let now = chrono::Utc::now();
        let timings = TerminalTimings {
            start_date: now,
            end_date: now,
            duration: 0.0,
            rate: 0.0,
        };
        self.apply_event(WorkerEvent::new(row.transfert_id, WorkerEventKind::Error { kind, timings }))
            .await;
    }

    async fn drain_events_nonblocking(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event).await;
        }
    }

    async fn apply_event(&mut self, event: WorkerEvent) {
        let id = event.transfert_id;
        match self.sink.apply(&event).await {
            Ok(outcome) => {
                if outcome.terminal {
                    if let Some(registered) = self.registry.remove(&id) {
                        if let Some(pool) = self.host_pools.get_mut(&registered.datanode) {
                            pool.thread_count = pool.thread_count.saturating_sub(1);
                        }
                        self.total_threads = self.total_threads.saturating_sub(1);
                        // The event is the worker's last action before it
                        // returns; joining here guarantees its clone of the
                        // write serializer is gone before shutdown tries to
                        // reclaim sole ownership of it.
                        registered.handle.join().await;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "catalog update failed, triggering immediate shutdown");
                if !self.stop_now.load(Ordering::SeqCst) {
                    self.stop_now.store(true, Ordering::SeqCst);
                    self.running.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    /// Sets every live worker's abort flag, marks their rows `waiting`
    /// immediately rather than waiting for their own `ABORTED` events, waits
    /// up to 10 seconds for them to exit, unlinks any partial files, then
    /// closes the write serializer (§4.6).
    async fn shutdown_immediate(&mut self) {
        warn!(in_flight = self.registry.len(), "running immediate shutdown");

        for registered in self.registry.values() {
            registered.handle.request_abort().await;
        }

        let ids: Vec<i64> = self.registry.keys().map(|id| id.0).collect();
        if !ids.is_empty() {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!("UPDATE transfert SET status = 'waiting' WHERE transfert_id IN ({placeholders})");
            let mut q = sqlx::query(&query);
            for id in &ids {
                q = q.bind(*id);
            }
            if let Err(e) = q.execute(self.catalog.pool()).await {
                error!(error = %e, "failed to bulk-reset rows during immediate shutdown");
            }
        }

        let deadline = sleep(IMMEDIATE_SHUTDOWN_GRACE);
        tokio::pin!(deadline);
        loop {
            if self.registry.is_empty() {
                break;
            }
            tokio::select! {
                _ = &mut deadline => break,
                maybe_event = self.events_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.apply_event(event).await,
                        None => break,
                    }
                }
            }
        }

        for registered in self.registry.values() {
            let path: PathBuf = self.config.base_path.join(&registered.handle.transfer.local_image);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to unlink partial file at shutdown");
                }
            }
        }
        self.registry.clear();

        self.close_serializer().await;
    }

    /// Spins draining events until every in-flight transfer has reached a
    /// terminal state, then closes the write serializer (§4.6).
    async fn shutdown_graceful(&mut self) {
        info!("running graceful shutdown, draining in-flight transfers");
        while self.total_threads > 0 {
            match self.events_rx.recv().await {
                Some(event) => self.apply_event(event).await,
                None => break,
            }
        }
        self.close_serializer().await;
    }

    async fn close_serializer(&mut self) {
        // `write_and_quit` consumes the serializer; only safe once every
        // worker holding a clone has exited. Both shutdown paths join every
        // registered worker before calling this, but a daemon-style worker
        // that never observed its abort flag (§5, "Cancellation and
        // timeouts") can still be holding a clone — in that case the engine
        // exits without a clean close rather than hanging forever.
        let Some(serializer) = self.serializer.take() else {
            return;
        };
        match Arc::try_unwrap(serializer) {
            Ok(serializer) => serializer.write_and_quit().await,
            Err(still_shared) => {
                warn!("write serializer still referenced at shutdown; skipping clean close");
                self.serializer = Some(still_shared);
            }
        }
    }
}
