use sqlx::SqlitePool;
use tracing::debug;

use crate::error::Result;
use crate::events::{WorkerEvent, WorkerEventKind};
use crate::transfer::{TerminalTimings, TransferStatus};

/// What happened to a row after an event was applied. The orchestrator uses
/// `terminal` to decide whether to decrement the owning host's and the
/// engine's thread counters and join the worker (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct EventOutcome {
    pub terminal: bool,
    pub new_status: TransferStatus,
}

/// Applies lifecycle events to the catalog with idempotent, single-row
/// updates (§4.5). Holds no state of its own beyond the pool; all
/// bookkeeping (per-host/global counters, the worker registry) lives in the
/// orchestrator, which is the sink's only caller.
#[derive(Clone, Debug)]
pub struct EventSink {
    pool: SqlitePool,
}

impl EventSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Applies one event atomically (a single row update) and reports the
    /// resulting status plus whether the worker that emitted it is now done.
    pub async fn apply(&self, event: &WorkerEvent) -> Result<EventOutcome> {
        let id = event.transfert_id.0;

        match &event.kind {
            WorkerEventKind::Length { .. } => {
                sqlx::query("UPDATE transfert SET status = 'running' WHERE transfert_id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                Ok(EventOutcome {
                    terminal: false,
                    new_status: TransferStatus::Running,
                })
            }
            WorkerEventKind::Speed { kbps } => {
                debug!(transfer = id, kbps, "speed sample");
                Ok(EventOutcome {
                    terminal: false,
                    new_status: TransferStatus::Running,
                })
            }
            WorkerEventKind::Error { kind, timings } => {
                self.finalize(id, TransferStatus::Error, Some(kind.to_string()), timings)
                    .await?;
                Ok(EventOutcome {
                    terminal: true,
                    new_status: TransferStatus::Error,
                })
            }
            WorkerEventKind::Aborted { reason, timings } => {
                self.finalize(
                    id,
                    TransferStatus::Waiting,
                    Some(format!("ABORTED:{reason}")),
                    timings,
                )
                .await?;
                Ok(EventOutcome {
                    terminal: true,
                    new_status: TransferStatus::Waiting,
                })
            }
            WorkerEventKind::Done { timings } => {
                self.finalize(id, TransferStatus::Done, None, timings).await?;
                Ok(EventOutcome {
                    terminal: true,
                    new_status: TransferStatus::Done,
                })
            }
        }
    }

    async fn finalize(
        &self,
        transfert_id: i64,
        status: TransferStatus,
        error_msg: Option<String>,
        timings: &TerminalTimings,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transfert
            SET status = ?, error_msg = ?, start_date = ?, end_date = ?, duration = ?, rate = ?
            WHERE transfert_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_msg)
        .bind(timings.start_date)
        .bind(timings.end_date)
        .bind(timings.duration)
        .bind(timings.rate)
        .bind(transfert_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::events::ErrorKind;
    use crate::transfer::TransferId;
    use chrono::Utc;

    async fn seeded_sink() -> (EventSink, SqlitePool) {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        let catalog = Catalog::from_pool(pool).await.unwrap();
        let pool = catalog.pool().clone();

        sqlx::query("INSERT INTO model (name, datanode) VALUES ('m1', 'h1')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO transfert (transfert_id, model, location, datanode, local_image, checksum, checksum_type, status)
             VALUES (1, 'm1', 'http://h1/a.nc', 'h1', 'a.nc', 'deadbeef', 'sha256', 'running')",
        )
        .execute(&pool)
        .await
        .unwrap();

        (EventSink::new(pool.clone()), pool)
    }

    fn timings() -> TerminalTimings {
        let now = Utc::now();
        TerminalTimings {
            start_date: now,
            end_date: now,
            duration: 1.0,
            rate: 0.0,
        }
    }

    #[tokio::test]
    async fn done_event_marks_row_done() {
        let (sink, pool) = seeded_sink().await;
        let outcome = sink
            .apply(&WorkerEvent::new(TransferId(1), WorkerEventKind::Done { timings: timings() }))
            .await
            .unwrap();
        assert!(outcome.terminal);

        let status: String = sqlx::query_scalar("SELECT status FROM transfert WHERE transfert_id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "done");
    }

    #[tokio::test]
    async fn error_event_persists_error_msg() {
        let (sink, pool) = seeded_sink().await;
        sink.apply(&WorkerEvent::new(
            TransferId(1),
            WorkerEventKind::Error {
                kind: ErrorKind::AuthFail,
                timings: timings(),
            },
        ))
        .await
        .unwrap();

        let (status, error_msg): (String, Option<String>) =
            sqlx::query_as("SELECT status, error_msg FROM transfert WHERE transfert_id = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "error");
        assert_eq!(error_msg.as_deref(), Some("AUTH_FAIL"));
    }

    #[tokio::test]
    async fn aborted_event_resets_row_to_waiting() {
        let (sink, pool) = seeded_sink().await;
        let outcome = sink
            .apply(&WorkerEvent::new(
                TransferId(1),
                WorkerEventKind::Aborted {
                    reason: "Shutting down".to_string(),
                    timings: timings(),
                },
            ))
            .await
            .unwrap();
        assert!(outcome.terminal);

        let status: String = sqlx::query_scalar("SELECT status FROM transfert WHERE transfert_id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "waiting");
    }
}
