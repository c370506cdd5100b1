//! Metadata layer (spec §4.7): manifests, checkpoints, and migration
//! manifests are pretty-printed textual records, self-describing, stable
//! ordering, unknown keys preserved on rewrite.
//!
//! Grounded on `src/backup/manifest.rs`'s split between a typed struct and a
//! human-readable on-disk form; here the on-disk form is `serde_json`
//! pretty-printed (the spec calls it "EDN-style" but is explicit that the
//! codec is format-agnostic as long as it's self-describing textual).

pub mod checkpoint;
pub mod gc_checkpoint;
pub mod manifest;
pub mod migration_manifest;

use anyhow::{Context, Error};
use serde::{de::DeserializeOwned, Serialize};

/// Serialize any metadata record as stable, pretty-printed JSON.
pub fn to_pretty_text<T: Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string_pretty(value).context("serializing metadata record")
}

/// Parse a metadata record. Any extra keys not in `T` are simply dropped by
/// `serde_json`'s default behavior; callers that need forward-compatible
/// round-tripping should use a type with a `#[serde(flatten)] extra: Map<...>`
/// field, as [`manifest::Manifest`] and friends do.
pub fn from_text<T: DeserializeOwned>(text: &str) -> Result<T, Error> {
    serde_json::from_str(text).context("parsing metadata record")
}
