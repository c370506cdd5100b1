//! External collaborators (spec §1): the Datalog database and the
//! content-addressed store it's built on. Both are out of scope to
//! implement — this module only declares the interfaces the rest of the
//! crate is written against, grounded on the shape of `pbs_datastore::DataStore`'s
//! own public API (list/open/transact-shaped methods) even though here they
//! are explicit traits because the database itself lives outside this crate.

use anyhow::Error;

use crate::datom::{Datom, DatomTuple, TxId};

/// A lazy, once-traversable ordered sequence of datoms representing a
/// consistent view of the source (spec GLOSSARY: "snapshot iterator").
/// A plain boxed `Iterator` rather than a named trait so callers can pass it
/// directly to anything expecting `&mut dyn Iterator<...>` (e.g. the
/// backup chunker) without needing trait-object upcasting.
pub type SnapshotIterator = Box<dyn Iterator<Item = Result<Datom, Error>> + Send>;

/// A single observed source transaction, handed to a [`TransactionListener`].
#[derive(Debug, Clone)]
pub struct CapturedTransaction {
    pub tx_id: TxId,
    pub tx_data: Vec<DatomTuple>,
    pub timestamp_ms: i64,
}

/// Callback invoked on the source's own transaction thread (spec §5): must
/// be fast and must not re-enter the source.
pub trait TransactionListener: Send + Sync {
    fn on_transact(&self, tx: &CapturedTransaction);
}

/// The out-of-scope Datalog database (spec §1): a snapshot datom iterator, a
/// bulk loader, a transaction listener hook, and a `transact` entry point.
pub trait DatalogSource: Send + Sync {
    /// A consistent, lazy, once-traversable view of every datom in the
    /// store, in the source's natural entity-attribute-value-tx index order.
    fn snapshot(&self) -> Result<SnapshotIterator, Error>;

    /// Bulk-load raw tuples into this database (used by restore, as the
    /// *target*). Must accept a batch atomically enough that a crash
    /// mid-batch doesn't leave partial tuples (spec §4.4 step 6).
    fn load_entities(&self, tuples: &[DatomTuple]) -> Result<(), Error>;

    /// Apply one transaction's worth of writes (used by migration, on both
    /// source during capture and target after cutover).
    fn transact(&self, tx_data: &[DatomTuple]) -> Result<TxId, Error>;

    /// Register a listener invoked for every committed transaction, from
    /// now on. Returns a guard; dropping it unregisters.
    fn listen(&self, listener: std::sync::Arc<dyn TransactionListener>) -> Result<(), Error>;

    /// Set the target's high-water marks after a restore (spec §4.4 step 5).
    fn set_max_ids(&self, max_eid: i64, max_tx: TxId) -> Result<(), Error>;

    /// True if a database with this id already exists (migration step 4).
    fn exists(&self, database_id: &str) -> Result<bool, Error>;

    /// Create a database with this id if absent (migration step 4).
    fn create(&self, database_id: &str) -> Result<(), Error>;
}

/// Result of [`ContentAddressedStore::mark`]: the set of keys reachable from
/// one index root. `NotReady` models an empty/unflushed index (spec §4.5:
/// "treat a not-ready mark error as an empty contribution").
pub enum MarkResult {
    Reachable(Vec<String>),
    NotReady,
}

/// A commit node in the branch DAG (spec §4.5).
#[derive(Debug, Clone)]
pub struct Commit {
    pub key: String,
    pub parents: Vec<String>,
    pub index_roots: Vec<String>,
    pub timestamp_ms: i64,
}

/// The content-addressed key/value graph GC operates over (spec §1/§4.5).
pub trait ContentAddressedStore: Send + Sync {
    /// Named branch heads, each pointing at a commit key.
    fn branches(&self) -> Result<Vec<(String, String)>, Error>;

    fn commit(&self, key: &str) -> Result<Commit, Error>;

    /// Reachable keys from one index root (store-defined traversal).
    fn mark(&self, index_root: &str) -> Result<MarkResult, Error>;

    /// Every key in the store with its last-write time, for the sweep phase.
    fn list_keys(&self) -> Result<Vec<(String, i64)>, Error>;

    fn delete_keys(&self, keys: &[String]) -> Result<(), Error>;

    /// Read/write the single reserved GC checkpoint key (spec §3 "at most
    /// one GC checkpoint per store"). `None` when absent.
    fn read_gc_checkpoint(&self) -> Result<Option<Vec<u8>>, Error>;
    fn write_gc_checkpoint(&self, data: &[u8]) -> Result<(), Error>;
    fn delete_gc_checkpoint(&self) -> Result<(), Error>;

    /// The key under which the GC checkpoint is stored; excluded from sweep
    /// candidates (spec §4.5/DESIGN NOTES).
    fn gc_checkpoint_key(&self) -> String;
}
