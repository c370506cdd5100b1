//! The captured-transaction log (spec §4.6 steps 2/6/9): a line-delimited
//! textual record, appended under a mutex from a dedicated writer thread so
//! the source's own transaction-notification thread never blocks on it
//! (spec §5: "must be fast and must not re-enter the source"). Grounded on
//! `src/tools/parallel_handler.rs`'s single-consumer worker-thread idiom,
//! specialized here to exactly one writer.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Error};
use crossbeam_channel::{unbounded, Sender};
use serde::{Deserialize, Serialize};

use crate::datom::{DatomTuple, TxId};
use crate::source::{CapturedTransaction, TransactionListener};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "tx-id")]
    pub tx_id: TxId,
    #[serde(rename = "tx-data")]
    pub tx_data: Vec<DatomTuple>,
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
}

/// In-memory buffer of captured log entries, appended under a mutex.
#[derive(Default)]
pub struct TransactionLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl TransactionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(TransactionLog::default())
    }

    pub fn from_entries(entries: Vec<LogEntry>) -> Arc<Self> {
        Arc::new(TransactionLog {
            entries: Mutex::new(entries),
        })
    }

    pub fn append(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_text(&self) -> Result<String, Error> {
        let guard = self.entries.lock().unwrap();
        entries_to_text(&guard)
    }
}

pub fn entries_to_text(entries: &[LogEntry]) -> Result<String, Error> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(entry).context("serializing log entry")?);
        out.push('\n');
    }
    Ok(out)
}

pub fn entries_from_text(text: &str) -> Result<Vec<LogEntry>, Error> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("parsing log entry"))
        .collect()
}

/// Installed on the source (spec §4.6 step 2): hands each observed
/// transaction off to a dedicated writer thread over an unbounded channel,
/// so the callback itself never takes the log's mutex or performs I/O.
pub struct CaptureListener {
    sender: Sender<LogEntry>,
}

impl CaptureListener {
    /// Spawns the writer thread and returns both the listener to register
    /// with the source and a handle to stop the writer once capture ends.
    pub fn spawn(log: Arc<TransactionLog>) -> (Arc<Self>, WriterHandle) {
        let (sender, receiver) = unbounded::<LogEntry>();
        let handle = std::thread::Builder::new()
            .name("migration-log-writer".to_string())
            .spawn(move || {
                while let Ok(entry) = receiver.recv() {
                    log.append(entry);
                }
            })
            .expect("spawning migration log writer thread");

        (Arc::new(CaptureListener { sender }), WriterHandle { handle: Some(handle) })
    }
}

impl TransactionListener for CaptureListener {
    fn on_transact(&self, tx: &CapturedTransaction) {
        let _ = self.sender.send(LogEntry {
            tx_id: tx.tx_id,
            tx_data: tx.tx_data.clone(),
            timestamp_ms: tx.timestamp_ms,
        });
    }
}

/// Dropping this (or explicitly stopping) closes the channel, which lets the
/// writer thread drain and exit.
pub struct WriterHandle {
    handle: Option<JoinHandle<()>>,
}

impl WriterHandle {
    pub fn stop(mut self, listener: Arc<CaptureListener>) {
        drop(listener);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datom::Value;

    #[test]
    fn round_trips_entries_through_text() {
        let entries = vec![LogEntry {
            tx_id: 7,
            tx_data: vec![(1, "name".to_string(), Value::Str("Alice".to_string()), 7, true)],
            timestamp_ms: 1_000,
        }];
        let text = entries_to_text(&entries).unwrap();
        let parsed = entries_from_text(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].tx_id, 7);
    }

    #[test]
    fn capture_listener_forwards_to_log() {
        let log = TransactionLog::new();
        let (listener, writer) = CaptureListener::spawn(Arc::clone(&log));
        listener.on_transact(&CapturedTransaction {
            tx_id: 1,
            tx_data: vec![],
            timestamp_ms: 0,
        });
        writer.stop(listener);
        assert_eq!(log.len(), 1);
    }
}
