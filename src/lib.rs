//! Document signing workflow with ledger-anchored tamper evidence.
//!
//! A document owner collects signatures from a fixed set of approvers; once
//! the last approver signs, the engine stamps, cryptographically seals and
//! hashes the document, then anchors the hash to an append-only ledger.
//! Anyone holding a copy can later verify it against the stored record and
//! the ledger payload.

pub mod backend;
pub mod error;
pub mod ledger;
pub mod request;
pub mod service;
pub mod store;
pub mod utils;
pub mod vault;
pub mod verify;

pub use backend::{PdfStamper, SealCredential, SigningBackend};
pub use error::{BackendError, LedgerError, SignError, StoreError, VaultError};
pub use ledger::{LedgerClient, MemoLedger, MemoPayload, RetryPolicy};
pub use request::{Request, RequestDraft, RequestStatus};
pub use service::{SignOutcome, SigningService};
pub use store::RequestStore;
pub use vault::DocumentVault;
pub use verify::{TrustLevel, VerificationEngine, VerificationReport, VerificationStatus};
