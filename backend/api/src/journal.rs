//! Long-running background task that drains the core's journal stream
//! into the SQLite database.

use escrow_protocol::JournalEvent;
use sqlx::SqlitePool;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

use crate::db;

/// Drain journal events until the core drops its sender.
///
/// A failed insert is logged and skipped; the sequence-keyed
/// `INSERT OR IGNORE` makes a later replay of the same event harmless.
pub async fn run(pool: SqlitePool, mut rx: UnboundedReceiver<JournalEvent>) {
    info!("Journal writer starting");
    while let Some(event) = rx.recv().await {
        if let Err(e) = db::insert_journal_event(&pool, &event).await {
            error!(seq = event.seq, "Journal write failed: {e}");
        }
    }
    info!("Journal stream closed; writer exiting");
}
