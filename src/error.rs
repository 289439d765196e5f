//! Error taxonomy for the signing workflow and verification engine.

use thiserror::Error;

/// Failures raised by [`crate::store::RequestStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("request not found")]
    NotFound,
    /// The record changed underneath the caller. Distinct from
    /// [`StoreError::NotFound`] so callers can retry with a fresh read.
    #[error("version conflict: stored request was modified concurrently")]
    VersionConflict,
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(String),
}

/// Failures raised by [`crate::vault::DocumentVault`].
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("stored document is missing: {0}")]
    Missing(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by a [`crate::backend::SigningBackend`].
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("input is not a PDF document (missing %PDF header)")]
    NotPdf,
    #[error("stamping failed: {0}")]
    Stamp(String),
    #[error("sealing failed: {0}")]
    Seal(String),
}

/// Failures raised by a [`crate::ledger::LedgerClient`].
#[derive(Error, Debug)]
pub enum LedgerError {
    /// A retryable fault: network hiccup, timeout, temporary congestion.
    #[error("transient ledger failure: {0}")]
    Transient(String),
    /// The ledger could not be queried at all.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger record not found")]
    NotFound,
    #[error("ledger payload codec error: {0}")]
    Codec(String),
}

/// Caller-facing failures of the signing orchestrator.
#[derive(Error, Debug)]
pub enum SignError {
    #[error("request not found")]
    NotFound,
    #[error("{0} is not an approver for this request")]
    Unauthorized(String),
    #[error("{0} has already signed this request")]
    AlreadySigned(String),
    #[error("stored document is missing: {0}")]
    AssetMissing(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A local finalization step (stamp, seal or hash) failed. The approver's
    /// sign-off is already committed; re-invoking `sign` retries the pipeline.
    #[error("finalization failed: {0}")]
    FinalizationFailed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vault(#[from] VaultError),
}
