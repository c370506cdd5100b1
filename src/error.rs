//! Structured error taxonomy (spec §7): transient / data / resource / fatal,
//! plus a logic class for precondition failures. Retryability is a pure
//! function of the error value, never a regex match on a message — except
//! for the compatibility shim at the bottom, which exists only because an
//! injected [`crate::blobstore::BlobStore`] or [`crate::source::DatalogSource`]
//! may only ever hand us an opaque `anyhow::Error`.

use thiserror::Error;

/// The four retry-relevant classes from spec §7, plus `Logic` for
/// precondition failures (another active migration, GC already running).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Data,
    Resource,
    Fatal,
    Logic,
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("transient error: {0}")]
    Transient(String),

    #[error("data error: {message} (chunk {chunk_id:?})")]
    Data {
        message: String,
        chunk_id: Option<u64>,
    },

    #[error("checksum mismatch for chunk {chunk_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        chunk_id: u64,
        expected: String,
        actual: String,
    },

    #[error("resource error: {0}")]
    Resource(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("precondition failed: {0}")]
    Logic(String),
}

impl VaultError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VaultError::Transient(_) => ErrorClass::Transient,
            VaultError::Data { .. } | VaultError::ChecksumMismatch { .. } => ErrorClass::Data,
            VaultError::Resource(_) => ErrorClass::Resource,
            VaultError::Fatal(_) => ErrorClass::Fatal,
            VaultError::Logic(_) => ErrorClass::Logic,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Best-effort classification of an opaque error surfaced by an injected
/// collaborator that doesn't speak [`VaultError`]. Structured errors from
/// the blob layer should be classified via [`VaultError::class`] instead;
/// this is the documented fallback from spec DESIGN NOTES.
pub fn classify_opaque_error(err: &anyhow::Error) -> ErrorClass {
    let msg = err.to_string().to_lowercase();
    if msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection reset")
        || msg.contains("throttl")
        || msg.contains("429")
        || msg.contains("too many requests")
    {
        return ErrorClass::Transient;
    }
    if msg.contains("checksum") || msg.contains("decode") || msg.contains("parse")
        || msg.contains("malformed") || msg.contains("invalid chunk")
    {
        return ErrorClass::Data;
    }
    if msg.contains("quota") || msg.contains("disk full") || msg.contains("out of memory")
        || msg.contains("no space")
    {
        return ErrorClass::Resource;
    }
    if msg.contains("auth") || msg.contains("credential") || msg.contains("permission denied") {
        return ErrorClass::Fatal;
    }
    ErrorClass::Fatal
}
