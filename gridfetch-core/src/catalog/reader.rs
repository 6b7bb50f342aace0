use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::transfer::{TransferId, TransferRow, TransferStatus};

/// Periodic scanner translating new `waiting` rows into in-memory work items
/// for the orchestrator (§4.4). Only sees rows appended after the watermark
/// was last advanced; a row externally reset to `waiting` below the
/// watermark will never be picked up again in this run (documented
/// limitation, carried forward from the source rather than fixed, per
/// DESIGN NOTES "Catalog reader watermark").
#[derive(Debug)]
pub struct CatalogReader {
    pool: SqlitePool,
    poll_interval: Duration,
    last_watermark: i64,
}

impl CatalogReader {
    pub fn new(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            last_watermark: 0,
        }
    }

    /// Runs the poll loop until `running` is cleared or a catalog read
    /// fails. A read failure logs once, clears `running`, and exits (§4.4).
    pub async fn run(mut self, tx: mpsc::Sender<TransferRow>, running: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await; // first tick fires immediately; consume it

        while running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }

            match self.scan().await {
                Ok(rows) => {
                    debug!(found = rows.len(), watermark = self.last_watermark, "catalog poll");
                    for row in rows {
                        if row.transfert_id.0 > self.last_watermark {
                            self.last_watermark = row.transfert_id.0;
                        }
                        if tx.send(row).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "catalog read failed, stopping engine");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    async fn scan(&self) -> crate::error::Result<Vec<TransferRow>> {
        let rows = sqlx::query_as::<_, TransferRecord>(
            r#"
            SELECT
                t.transfert_id, t.location, t.datanode, t.local_image,
                t.checksum, t.checksum_type, t.status, t.error_msg,
                t.start_date, t.end_date, t.duration, t.rate
            FROM transfert t
            JOIN model m ON m.name = t.model
            WHERE t.status = 'waiting' AND t.transfert_id > ?
            ORDER BY t.transfert_id ASC
            "#,
        )
        .bind(self.last_watermark)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TransferRecord::into_row).collect())
    }
}

/// Raw row shape from the `transfert JOIN model` query; the only place the
/// catalog's untyped columns are converted into the typed `TransferRow`
/// (DESIGN NOTES, "Dynamic row dictionaries").
#[derive(sqlx::FromRow)]
struct TransferRecord {
    transfert_id: i64,
    location: String,
    datanode: String,
    local_image: String,
    checksum: String,
    checksum_type: String,
    status: String,
    error_msg: Option<String>,
    start_date: Option<chrono::DateTime<chrono::Utc>>,
    end_date: Option<chrono::DateTime<chrono::Utc>>,
    duration: Option<f64>,
    rate: Option<f64>,
}

impl TransferRecord {
    fn into_row(self) -> TransferRow {
        TransferRow {
            transfert_id: TransferId(self.transfert_id),
            location: self.location,
            datanode: self.datanode,
            local_image: self.local_image,
            checksum: self.checksum,
            checksum_type: self.checksum_type,
            status: TransferStatus::parse(&self.status).unwrap_or(TransferStatus::Waiting),
            error_msg: self.error_msg,
            start_date: self.start_date,
            end_date: self.end_date,
            duration: self.duration,
            rate: self.rate,
        }
    }
}
