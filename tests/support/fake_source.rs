//! Synthetic `DatalogSource`/`ContentAddressedStore` used by the
//! integration tests. Generates the "book library" dataset (a handful of
//! string/long attributes over a few entities) used across several
//! scenarios.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Error;

use datom_vault::datom::{Datom, DatomTuple, EntityId, TxId, Value};
use datom_vault::source::{
    CapturedTransaction, Commit, ContentAddressedStore, DatalogSource, MarkResult, SnapshotIterator, TransactionListener,
};

/// Five books, four attributes each (title, author, year, pages).
pub fn book_library_datoms() -> Vec<Datom> {
    let books = [
        ("Dune", "Frank Herbert", 1965i64, 412i64),
        ("Neuromancer", "William Gibson", 1984, 271),
        ("Snow Crash", "Neal Stephenson", 1992, 470),
        ("Foundation", "Isaac Asimov", 1951, 255),
        ("The Left Hand of Darkness", "Ursula K. Le Guin", 1969, 304),
    ];

    let mut datoms = Vec::new();
    let mut tx = 1;
    for (i, (title, author, year, pages)) in books.iter().enumerate() {
        let e = (i + 1) as EntityId;
        datoms.push(Datom::new(e, "book/title", Value::Str(title.to_string()), tx, true));
        datoms.push(Datom::new(e, "book/author", Value::Str(author.to_string()), tx, true));
        datoms.push(Datom::new(e, "book/year", Value::Int(*year), tx, true));
        datoms.push(Datom::new(e, "book/pages", Value::Int(*pages), tx, true));
        tx += 1;
    }
    datoms
}

pub struct FakeSource {
    datoms: Mutex<Vec<Datom>>,
    next_tx: AtomicI64,
    max_eid: AtomicI64,
    listener: Mutex<Option<Arc<dyn TransactionListener>>>,
    databases: Mutex<HashSet<String>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeSource {
            datoms: Mutex::new(Vec::new()),
            next_tx: AtomicI64::new(1),
            max_eid: AtomicI64::new(0),
            listener: Mutex::new(None),
            databases: Mutex::new(HashSet::new()),
        })
    }

    pub fn seeded(datoms: Vec<Datom>) -> Arc<Self> {
        let max_tx = datoms.iter().map(|d| d.tx).max().unwrap_or(0);
        let max_eid = datoms.iter().map(|d| d.e).max().unwrap_or(0);
        Arc::new(FakeSource {
            datoms: Mutex::new(datoms),
            next_tx: AtomicI64::new(max_tx + 1),
            max_eid: AtomicI64::new(max_eid),
            listener: Mutex::new(None),
            databases: Mutex::new(HashSet::new()),
        })
    }

    pub fn datoms(&self) -> Vec<Datom> {
        self.datoms.lock().unwrap().clone()
    }

    pub fn datom_count(&self) -> usize {
        self.datoms.lock().unwrap().len()
    }
}

impl DatalogSource for FakeSource {
    fn snapshot(&self) -> Result<SnapshotIterator, Error> {
        let datoms = self.datoms.lock().unwrap().clone();
        Ok(Box::new(datoms.into_iter().map(Ok)))
    }

    fn load_entities(&self, tuples: &[DatomTuple]) -> Result<(), Error> {
        let mut guard = self.datoms.lock().unwrap();
        for (e, a, v, tx, added) in tuples {
            guard.push(Datom::new(*e, a.clone(), v.clone(), *tx, *added));
        }
        Ok(())
    }

    fn transact(&self, tx_data: &[DatomTuple]) -> Result<TxId, Error> {
        let tx_id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        {
            let mut guard = self.datoms.lock().unwrap();
            for (e, a, v, _tx, added) in tx_data {
                guard.push(Datom::new(*e, a.clone(), v.clone(), tx_id, *added));
            }
        }
        if let Some(listener) = self.listener.lock().unwrap().as_ref() {
            listener.on_transact(&CapturedTransaction {
                tx_id,
                tx_data: tx_data.to_vec(),
                timestamp_ms: tx_id,
            });
        }
        Ok(tx_id)
    }

    fn listen(&self, listener: Arc<dyn TransactionListener>) -> Result<(), Error> {
        *self.listener.lock().unwrap() = Some(listener);
        Ok(())
    }

    fn set_max_ids(&self, max_eid: i64, max_tx: TxId) -> Result<(), Error> {
        self.max_eid.store(max_eid, Ordering::SeqCst);
        self.next_tx.store(max_tx + 1, Ordering::SeqCst);
        Ok(())
    }

    fn exists(&self, database_id: &str) -> Result<bool, Error> {
        Ok(self.databases.lock().unwrap().contains(database_id))
    }

    fn create(&self, database_id: &str) -> Result<(), Error> {
        self.databases.lock().unwrap().insert(database_id.to_string());
        Ok(())
    }
}

/// A tiny in-memory content-addressed store for GC tests: two commits on
/// one branch, a handful of reachable and garbage keys.
pub struct FakeChunkStore {
    branches: Vec<(String, String)>,
    commits: HashMap<String, Commit>,
    index_contents: HashMap<String, Vec<String>>,
    keys: Mutex<HashMap<String, i64>>,
    checkpoint: Mutex<Option<Vec<u8>>>,
}

impl FakeChunkStore {
    /// One branch `main` pointing at a single commit reachable from `idx`,
    /// plus `garbage_count` unreachable keys already stale (`last_write=0`).
    pub fn with_garbage(reachable_keys: Vec<String>, garbage_count: usize) -> Self {
        let mut keys = HashMap::new();
        for k in &reachable_keys {
            keys.insert(k.clone(), 0);
        }
        for i in 0..garbage_count {
            keys.insert(format!("garbage-{i}"), 0);
        }

        let mut commits = HashMap::new();
        commits.insert(
            "head".to_string(),
            Commit {
                key: "head".to_string(),
                parents: vec![],
                index_roots: vec!["idx".to_string()],
                timestamp_ms: proxmox_time::epoch_i64() * 1000,
            },
        );

        let mut index_contents = HashMap::new();
        index_contents.insert("idx".to_string(), reachable_keys);

        FakeChunkStore {
            branches: vec![("main".to_string(), "head".to_string())],
            commits,
            index_contents,
            keys: Mutex::new(keys),
            checkpoint: Mutex::new(None),
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.lock().unwrap().len()
    }
}

impl ContentAddressedStore for FakeChunkStore {
    fn branches(&self) -> Result<Vec<(String, String)>, Error> {
        Ok(self.branches.clone())
    }

    fn commit(&self, key: &str) -> Result<Commit, Error> {
        self.commits.get(key).cloned().ok_or_else(|| anyhow::anyhow!("no such commit {key}"))
    }

    fn mark(&self, index_root: &str) -> Result<MarkResult, Error> {
        match self.index_contents.get(index_root) {
            Some(keys) => Ok(MarkResult::Reachable(keys.clone())),
            None => Ok(MarkResult::NotReady),
        }
    }

    fn list_keys(&self) -> Result<Vec<(String, i64)>, Error> {
        Ok(self.keys.lock().unwrap().iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    fn delete_keys(&self, keys: &[String]) -> Result<(), Error> {
        let mut guard = self.keys.lock().unwrap();
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }

    fn read_gc_checkpoint(&self) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.checkpoint.lock().unwrap().clone())
    }

    fn write_gc_checkpoint(&self, data: &[u8]) -> Result<(), Error> {
        *self.checkpoint.lock().unwrap() = Some(data.to_vec());
        Ok(())
    }

    fn delete_gc_checkpoint(&self) -> Result<(), Error> {
        *self.checkpoint.lock().unwrap() = None;
        Ok(())
    }

    fn gc_checkpoint_key(&self) -> String {
        "gc/checkpoint".to_string()
    }
}
