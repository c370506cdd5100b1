//! The datom data model (spec §3).

use serde::{Deserialize, Serialize};

/// A transaction id. Monotonic, 64-bit.
pub type TxId = i64;

/// An entity id. Signed 64-bit.
pub type EntityId = i64;

/// The attribute identifier that carries a transaction's wall-clock instant.
/// Datoms on this attribute must sort first among datoms sharing a `tx`
/// (spec §4.4 merge comparator, rule 2).
pub const TX_INSTANT_ATTR: &str = "db/txInstant";

/// The source database's reserved built-in schema transaction. Datoms
/// carrying this `tx` are part of the platform and must not be re-applied
/// on restore (spec §4.4 step 4).
pub const BUILTIN_TX_ID: TxId = 0;

/// A heterogeneous datom value (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Str(String),
    Int(i64),
    /// Tagged explicitly so a codec that would otherwise narrow doubles to
    /// `f32` is forced to round-trip full precision (spec §4.2 invariant b).
    Double(f64),
    Bool(bool),
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp(i64),
    Uuid(String),
    /// A symbolic attribute-like name used as a value (e.g. an enum value).
    Keyword(String),
    /// A reference to another entity.
    Ref(EntityId),
}

/// The indivisible unit of state in the source database: (entity, attribute,
/// value, transaction, added?).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datom {
    pub e: EntityId,
    pub a: String,
    pub v: Value,
    pub tx: TxId,
    pub added: bool,
}

impl Datom {
    pub fn new(e: EntityId, a: impl Into<String>, v: Value, tx: TxId, added: bool) -> Self {
        Datom {
            e,
            a: a.into(),
            v,
            tx,
            added,
        }
    }

    pub fn is_tx_instant(&self) -> bool {
        self.a == TX_INSTANT_ATTR
    }
}

/// Raw `(e, a, v, tx, added)` tuple form accepted by the target's bulk
/// loader (spec §4.4 step 6). Kept distinct from `Datom` because the loader
/// is an external collaborator whose exact tuple shape we don't control.
pub type DatomTuple = (EntityId, String, Value, TxId, bool);

impl From<&Datom> for DatomTuple {
    fn from(d: &Datom) -> Self {
        (d.e, d.a.clone(), d.v.clone(), d.tx, d.added)
    }
}
