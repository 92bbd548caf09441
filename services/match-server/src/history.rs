//! Write-after-finish match history.
//!
//! Finished matches hand their [MatchRecord] to a bounded queue drained by a dedicated
//! SQLite thread. Play never waits on the database: a full queue drops the record.

use crate::metrics::Metrics;
use anyhow::Context;
use commonware_codec::{DecodeExt, Encode};
use ludo_types::MatchRecord;
use rusqlite::{params, Connection};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{error, warn};

enum PersistRequest {
    Record(MatchRecord),
}

#[derive(Clone)]
pub struct HistorySink {
    sender: mpsc::Sender<PersistRequest>,
    metrics: Arc<Metrics>,
}

impl HistorySink {
    pub fn start_sqlite(
        path: &Path,
        buffer_size: usize,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        // Fail startup on a bad path instead of inside the worker.
        let conn = Connection::open(path).context("open match history db")?;
        init_schema_sqlite(&conn)?;
        drop(conn);

        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let path = path.to_path_buf();
        let worker_metrics = metrics.clone();
        std::thread::spawn(move || {
            persistence_worker(path, receiver, worker_metrics);
        });

        Ok(Self { sender, metrics })
    }

    pub fn record(&self, record: MatchRecord) {
        let match_id = record.match_id.clone();
        match self.sender.try_send(PersistRequest::Record(record)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.history_dropped();
                warn!(%match_id, "match history channel full; dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.history_dropped();
                warn!(%match_id, "match history worker stopped; dropping record");
            }
        }
    }
}

fn init_schema_sqlite(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS match_history (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             match_id TEXT NOT NULL,
             finished_at_ms INTEGER NOT NULL,
             record_bytes BLOB NOT NULL
         );
         CREATE INDEX IF NOT EXISTS match_history_match_id ON match_history (match_id);",
    )
    .context("init match history schema")?;
    Ok(())
}

/// Most recent records first.
pub fn load_recent_sqlite(path: &Path, limit: usize) -> anyhow::Result<Vec<MatchRecord>> {
    let conn = Connection::open(path).context("open match history db")?;
    init_schema_sqlite(&conn)?;
    let mut stmt =
        conn.prepare("SELECT record_bytes FROM match_history ORDER BY id DESC LIMIT ?")?;
    let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, Vec<u8>>(0))?;

    let mut records = Vec::new();
    for row in rows {
        let bytes = row?;
        let record =
            MatchRecord::decode(bytes.as_slice()).context("decode persisted match record")?;
        records.push(record);
    }
    Ok(records)
}

fn persistence_worker(
    path: PathBuf,
    mut receiver: mpsc::Receiver<PersistRequest>,
    metrics: Arc<Metrics>,
) {
    let conn = match Connection::open(&path) {
        Ok(conn) => conn,
        Err(err) => {
            error!("Match history open failed: {err}");
            return;
        }
    };

    if let Err(err) = init_schema_sqlite(&conn) {
        error!("Match history init failed: {err}");
        return;
    }

    while let Some(request) = receiver.blocking_recv() {
        let PersistRequest::Record(record) = request;
        let bytes = record.encode().to_vec();
        match conn.execute(
            "INSERT INTO match_history (match_id, finished_at_ms, record_bytes) VALUES (?, ?, ?)",
            params![record.match_id, record.finished_at_ms as i64, bytes],
        ) {
            Ok(_) => metrics.history_written(),
            Err(err) => error!(match_id = %record.match_id, "Match history write failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ludo_types::{Color, FinishReason, SeatResult};
    use std::time::Duration;

    fn record(match_id: &str) -> MatchRecord {
        MatchRecord {
            match_id: match_id.to_string(),
            ruleset: "classic".to_string(),
            winner_id: Some("p1".to_string()),
            reason: FinishReason::LastPlayerStanding,
            turns: 40,
            finished_at_ms: 1_700_000_000_000,
            seats: vec![
                SeatResult {
                    color: Color::Red,
                    player_id: Some("p1".to_string()),
                    pawns_in_goal: 2,
                    forfeited: false,
                },
                SeatResult {
                    color: Color::Yellow,
                    player_id: Some("p2".to_string()),
                    pawns_in_goal: 0,
                    forfeited: true,
                },
            ],
        }
    }

    #[tokio::test]
    async fn records_reach_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let metrics = Arc::new(Metrics::default());
        let sink = HistorySink::start_sqlite(&path, 8, metrics.clone()).unwrap();

        sink.record(record("m-1"));
        sink.record(record("m-2"));

        let mut written = 0;
        for _ in 0..100 {
            written = metrics.snapshot().history_written;
            if written == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(written, 2);

        let records = load_recent_sqlite(&path, 10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].match_id, "m-2");
        assert_eq!(records[1], record("m-1"));
    }

    #[test]
    fn bad_path_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("history.db");
        assert!(HistorySink::start_sqlite(&path, 8, Arc::new(Metrics::default())).is_err());
    }
}
