use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::checksum::RunningHash;
use crate::events::{ErrorKind, WorkerEvent, WorkerEventKind};
use crate::speed::SpeedWindow;
use crate::transfer::{ChecksumAlgorithm, TerminalTimings, TransferRow};
use crate::write_serializer::WriteSerializer;

/// Handle returned to the orchestrator when a worker is spawned. Exposes the
/// cooperative abort flag and the immutable snapshot the worker was started
/// from; the worker itself is joined implicitly once its terminal event has
/// been observed by `EventSink` (§4.3, "Construction").
#[derive(Debug)]
pub struct TransferWorkerHandle {
    pub transfer: TransferRow,
    pub abort: Arc<Mutex<bool>>,
    join: JoinHandle<()>,
}

impl TransferWorkerHandle {
    /// Sets the cooperative abort flag under `abort_lock`. The worker
    /// observes this before opening its file and between chunks.
    pub async fn request_abort(&self) {
        *self.abort.lock().await = true;
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Starts a `TransferWorker` for `transfer` and returns a handle immediately;
/// the worker itself runs as a detached task and communicates exclusively
/// through `events_tx`.
///
/// Runs the state machine in §4.3:
/// `INIT -> OPENING -> STREAMING -> FINALIZING -> DONE`, with `ERROR` and
/// `ABORTED` exits along the way.
pub fn spawn(
    transfer: TransferRow,
    session: Client,
    serializer: Arc<WriteSerializer>,
    base_path: PathBuf,
    blocksize: usize,
    num_recs: usize,
    events_tx: mpsc::Sender<WorkerEvent>,
) -> TransferWorkerHandle {
    let abort = Arc::new(Mutex::new(false));
    let abort_for_task = abort.clone();
    let transfer_for_task = transfer.clone();

    let join = tokio::spawn(async move {
        run(
            transfer_for_task,
            session,
            serializer,
            base_path,
            blocksize,
            num_recs,
            events_tx,
            abort_for_task,
        )
        .await;
    });

    TransferWorkerHandle {
        transfer,
        abort,
        join,
    }
}

fn terminal_timings(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>, data_size: u64) -> TerminalTimings {
    let duration = (end - start).num_milliseconds().max(0) as f64 / 1000.0;
    let rate = if duration > 0.0 {
        (data_size as f64 / 1024.0) / duration
    } else {
        0.0
    };
    TerminalTimings {
        start_date: start,
        end_date: end,
        duration,
        rate,
    }
}

async fn emit(tx: &mpsc::Sender<WorkerEvent>, id: crate::transfer::TransferId, kind: WorkerEventKind) {
    let _ = tx.send(WorkerEvent::new(id, kind)).await;
}

#[allow(clippy::too_many_arguments)]
async fn run(
    transfer: TransferRow,
    session: Client,
    serializer: Arc<WriteSerializer>,
    base_path: PathBuf,
    blocksize: usize,
    num_recs: usize,
    events_tx: mpsc::Sender<WorkerEvent>,
    abort: Arc<Mutex<bool>>,
) {
    let id = transfer.transfert_id;
    let start_time = Utc::now();

    // INIT -> OPENING: validate the checksum algorithm before any I/O.
    let algorithm = match ChecksumAlgorithm::parse(&transfer.checksum_type) {
        Some(algorithm) => algorithm,
        None => {
            let end_time = Utc::now();
            error!(transfer = %id, checksum_type = %transfer.checksum_type, "unsupported checksum type");
            emit(
                &events_tx,
                id,
                WorkerEventKind::Error {
                    kind: ErrorKind::UnsupportedChecksumType(transfer.checksum_type.clone()),
                    timings: terminal_timings(start_time, end_time, 0),
                },
            )
            .await;
            return;
        }
    };

    info!(transfer = %id, url = %transfer.location, "opening transfer");

    // OPENING: issue the GET request.
    let response = match session.get(&transfer.location).send().await {
        Ok(response) => response,
        Err(e) => {
            let end_time = Utc::now();
            let kind = classify_transport_error(&e);
            error!(transfer = %id, error = %e, "transport failure");
            emit(
                &events_tx,
                id,
                WorkerEventKind::Error {
                    kind,
                    timings: terminal_timings(start_time, end_time, 0),
                },
            )
            .await;
            return;
        }
    };

    let status = response.status();
    if status != StatusCode::OK {
        let end_time = Utc::now();
        let kind = classify_status_error(status);
        warn!(transfer = %id, %status, "non-200 response");
        emit(
            &events_tx,
            id,
            WorkerEventKind::Error {
                kind,
                timings: terminal_timings(start_time, end_time, 0),
            },
        )
        .await;
        return;
    }

    let content_length = response.content_length();
    let target_path = base_path.join(&transfer.local_image);

    if let Some(parent) = target_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            let end_time = Utc::now();
            error!(transfer = %id, error = %e, "failed to create parent directories");
            emit(
                &events_tx,
                id,
                WorkerEventKind::Error {
                    kind: ErrorKind::FileCreationError,
                    timings: terminal_timings(start_time, end_time, 0),
                },
            )
            .await;
            return;
        }
    }

    // Check abort before ever creating the file.
    if *abort.lock().await {
        let end_time = Utc::now();
        info!(transfer = %id, "aborted before file creation");
        emit(
            &events_tx,
            id,
            WorkerEventKind::Aborted {
                reason: "Shutting down".to_string(),
                timings: terminal_timings(start_time, end_time, 0),
            },
        )
        .await;
        return;
    }

    let file = match File::create(&target_path).await {
        Ok(file) => file,
        Err(e) => {
            let end_time = Utc::now();
            error!(transfer = %id, error = %e, "failed to create target file");
            emit(
                &events_tx,
                id,
                WorkerEventKind::Error {
                    kind: ErrorKind::FileCreationError,
                    timings: terminal_timings(start_time, end_time, 0),
                },
            )
            .await;
            return;
        }
    };
    let file = Arc::new(Mutex::new(file));

    // OPENING -> STREAMING
    emit(&events_tx, id, WorkerEventKind::Length { content_length }).await;

    let mut hash = RunningHash::new(algorithm);
    let mut data_size: u64 = 0;
    let mut speed_window = SpeedWindow::new(num_recs);
    let mut byte_stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::with_capacity(blocksize);
    let mut last_sample = Instant::now();

    loop {
        let next = byte_stream.next().await;
        match next {
            Some(Ok(bytes)) => {
                buffer.extend_from_slice(&bytes);
                while buffer.len() >= blocksize {
                    let chunk: Vec<u8> = buffer.drain(..blocksize).collect();
                    write_chunk(
                        &chunk,
                        &file,
                        &serializer,
                        &mut hash,
                        &mut data_size,
                        &mut speed_window,
                        &mut last_sample,
                        &events_tx,
                        id,
                    )
                    .await;
                    if abort_tripped(&abort).await {
                        drop(file);
                        cleanup_partial(&target_path).await;
                        let end_time = Utc::now();
                        warn!(transfer = %id, "aborted mid-stream");
                        emit(
                            &events_tx,
                            id,
                            WorkerEventKind::Aborted {
                                reason: "Shutting down".to_string(),
                                timings: terminal_timings(start_time, end_time, data_size),
                            },
                        )
                        .await;
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                drop(file);
                cleanup_partial(&target_path).await;
                let end_time = Utc::now();
                error!(transfer = %id, error = %e, "exception during streaming");
                emit(
                    &events_tx,
                    id,
                    WorkerEventKind::Aborted {
                        reason: format!("Caught exception: {e}"),
                        timings: terminal_timings(start_time, end_time, data_size),
                    },
                )
                .await;
                return;
            }
            None => break,
        }
    }

    // Flush whatever remains in the buffer as the final data chunk.
    if !buffer.is_empty() {
        write_chunk(
            &buffer,
            &file,
            &serializer,
            &mut hash,
            &mut data_size,
            &mut speed_window,
            &mut last_sample,
            &events_tx,
            id,
        )
        .await;
    }

    // STREAMING -> FINALIZING: close the file through the serializer.
    serializer.enqueue(file.clone(), Vec::new(), true).await;
    drop(file);
    let end_time = Utc::now();

    // FINALIZING
    let digest = hash.hexdigest();
    if digest != transfer.checksum {
        warn!(transfer = %id, expected = %transfer.checksum, got = %digest, "checksum mismatch");
        cleanup_partial(&target_path).await;
        emit(
            &events_tx,
            id,
            WorkerEventKind::Error {
                kind: ErrorKind::ChecksumMismatch,
                timings: terminal_timings(start_time, end_time, data_size),
            },
        )
        .await;
        return;
    }

    // FINALIZING -> DONE
    info!(transfer = %id, bytes = data_size, "transfer complete");
    emit(
        &events_tx,
        id,
        WorkerEventKind::Done {
            timings: terminal_timings(start_time, end_time, data_size),
        },
    )
    .await;
}

async fn abort_tripped(abort: &Arc<Mutex<bool>>) -> bool {
    *abort.lock().await
}

async fn cleanup_partial(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "best-effort cleanup of partial file failed");
        }
    }
}

/// Enqueues one chunk to the write serializer, updates the running hash and
/// byte count, and emits a `SPEED` sample. Writes are assumed infallible
/// once the file is open (§4.1, "Failure semantics"): the serializer's own
/// loop absorbs and logs a write error without ever reporting it back here,
/// so this function has nothing to report either.
#[allow(clippy::too_many_arguments)]
async fn write_chunk(
    chunk: &[u8],
    file: &crate::write_serializer::SharedFile,
    serializer: &WriteSerializer,
    hash: &mut RunningHash,
    data_size: &mut u64,
    speed_window: &mut SpeedWindow,
    last_sample: &mut Instant,
    events_tx: &mpsc::Sender<WorkerEvent>,
    id: crate::transfer::TransferId,
) {
    serializer.enqueue(file.clone(), chunk.to_vec(), false).await;
    hash.update(chunk);
    *data_size += chunk.len() as u64;

    let now = Instant::now();
    let elapsed = now.duration_since(*last_sample).as_secs_f64().max(f64::EPSILON);
    let kbps = chunk.len() as f64 / (1024.0 * elapsed);
    *last_sample = now;
    speed_window.record(kbps);
    emit(events_tx, id, WorkerEventKind::Speed { kbps }).await;
}

fn classify_transport_error(e: &reqwest::Error) -> ErrorKind {
    if e.is_connect() {
        ErrorKind::Connection(e.to_string())
    } else if e.is_redirect() {
        ErrorKind::TooManyRedirects
    } else if e.is_builder() || e.is_request() {
        ErrorKind::NoUrl
    } else if e.is_decode() || e.is_body() || e.is_timeout() {
        ErrorKind::RequestsUnknown(e.to_string())
    } else {
        ErrorKind::Unknown(e.to_string())
    }
}

fn classify_status_error(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::FORBIDDEN => ErrorKind::AuthFail,
        StatusCode::NOT_FOUND => ErrorKind::FileNotFound,
        StatusCode::INTERNAL_SERVER_ERROR => ErrorKind::ServerError,
        other => ErrorKind::HttpStatus(other.as_u16()),
    }
}
