//! Service layer API for the signing workflow.
//!
//! [`SigningService`] drives one request through
//! `pending -> in-progress -> completed`, enforces who may sign, and runs the
//! finalization pipeline (stamp, seal, hash, anchor) exactly once per
//! request. All mutation of a single request is serialized behind a
//! per-request lock; distinct requests proceed fully in parallel. The store's
//! compare-and-swap backs the same guarantee up at the persistence layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tracing::{error, info, warn};

use super::backend::{SealCredential, SigningBackend, is_pdf};
use super::error::{LedgerError, SignError, StoreError, VaultError};
use super::ledger::{LedgerClient, LedgerReceipt, MemoPayload, RetryPolicy};
use super::request::{HistoryAction, Request, RequestDraft, RequestStatus, SYSTEM_USER, TimeStamp};
use super::store::RequestStore;
use super::vault::DocumentVault;

/// Result of one sign call. `finalized` is true only once the request is
/// completed, i.e. sealed *and* anchored.
#[derive(Debug)]
pub struct SignOutcome {
    pub request: Request,
    pub finalized: bool,
}

pub struct SigningService {
    store: RequestStore,
    vault: DocumentVault,
    backend: Arc<dyn SigningBackend>,
    ledger: Arc<dyn LedgerClient>,
    credential: SealCredential,
    retry: RetryPolicy,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

// a poisoned lock only means another signer panicked; the guarded state
// lives in the store, so recovery is safe
fn hold<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

impl SigningService {
    pub fn new(
        store: RequestStore,
        vault: DocumentVault,
        backend: Arc<dyn SigningBackend>,
        ledger: Arc<dyn LedgerClient>,
        credential: SealCredential,
    ) -> Self {
        Self {
            store,
            vault,
            backend,
            ledger,
            credential,
            retry: RetryPolicy::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request_lock(&self, request_id: &str) -> Arc<Mutex<()>> {
        let mut locks = hold(&self.locks);
        locks.entry(request_id.to_string()).or_default().clone()
    }

    // completed is terminal, so the serialization entry is no longer
    // needed; dropping it keeps the table bounded in long-lived processes
    fn discard_lock(&self, request_id: &str) {
        hold(&self.locks).remove(request_id);
    }

    /// Store the uploaded document and persist a fresh pending request.
    pub fn create_request(
        &self,
        draft: RequestDraft,
        pdf_bytes: &[u8],
    ) -> Result<Request, SignError> {
        if !is_pdf(pdf_bytes) {
            return Err(SignError::InvalidInput(
                "only PDF documents are accepted".to_string(),
            ));
        }

        let request = draft
            .build()
            .map_err(|e| SignError::InvalidInput(e.to_string()))?;

        self.vault.put(&request.filename, pdf_bytes)?;
        self.store.create(&request)?;

        info!(
            id = %request.id,
            name = %request.name,
            approvers = request.approvers.len(),
            "request created"
        );
        Ok(request)
    }

    pub fn get_request(&self, request_id: &str) -> Result<Request, SignError> {
        self.store.get_by_id(request_id).map_err(|e| match e {
            StoreError::NotFound => SignError::NotFound,
            other => SignError::Store(other),
        })
    }

    pub fn list_requests(&self) -> Result<Vec<Request>, SignError> {
        Ok(self.store.list_all()?)
    }

    pub fn list_requests_for_user(&self, email: &str) -> Result<Vec<Request>, SignError> {
        Ok(self.store.list_for_user(email)?)
    }

    /// Record one approver's signature. When the last outstanding approver
    /// signs, the finalization pipeline runs inline, at most once per
    /// request. A repeated call for an already-signed approver on a request
    /// that is fully signed but not completed resumes finalization instead
    /// of failing, so a failed seal or anchor can be retried.
    pub fn sign(&self, request_id: &str, signer: &str) -> Result<SignOutcome, SignError> {
        let lock = self.request_lock(request_id);
        let _serial = hold(&lock);

        let mut request = self.get_request(request_id)?;

        let Some(approver) = request.approver(signer) else {
            return Err(SignError::Unauthorized(signer.to_string()));
        };

        if approver.signed {
            if request.all_signed() && !request.is_completed() {
                info!(id = %request.id, signer, "resuming finalization");
                let request = self.finalize(request)?;
                let finalized = request.is_completed();
                if finalized {
                    self.discard_lock(request_id);
                }
                return Ok(SignOutcome { request, finalized });
            }
            return Err(SignError::AlreadySigned(signer.to_string()));
        }

        let (page, x, y) = (approver.page, approver.x, approver.y);

        let bytes = match self.vault.load(&request.filename) {
            Ok(bytes) => bytes,
            Err(VaultError::Missing(name)) => return Err(SignError::AssetMissing(name)),
            Err(other) => return Err(other.into()),
        };

        // visible stamp goes in first; nothing is committed if it fails
        let signed_at = TimeStamp::new();
        let stamped = self
            .backend
            .stamp(&bytes, signer, page, x, y, &signed_at)
            .map_err(|e| SignError::FinalizationFailed(e.to_string()))?;
        self.vault.replace(&request.filename, &stamped)?;

        if let Some(approver) = request.approver_mut(signer) {
            approver.signed = true;
            approver.signed_at = Some(signed_at);
        }
        request.record(
            HistoryAction::Signed,
            signer,
            format!("Document signed at coordinates ({x}, {y})"),
        );
        request.status = RequestStatus::InProgress;
        self.store.update(&mut request)?;

        info!(
            id = %request.id,
            signer,
            signed = request.signed_count(),
            total = request.approvers.len(),
            "signature recorded"
        );

        if !request.all_signed() {
            return Ok(SignOutcome {
                request,
                finalized: false,
            });
        }

        info!(id = %request.id, "all approvers have signed, finalizing");
        let request = self.finalize(request)?;
        let finalized = request.is_completed();
        if finalized {
            self.discard_lock(request_id);
        }
        Ok(SignOutcome { request, finalized })
    }

    /// Finalization pipeline: stamp any missing marks, seal, hash, anchor.
    /// Caller holds the per-request lock. A request with a sealed hash never
    /// re-enters stamping or sealing; only the anchoring step is re-driven.
    fn finalize(&self, mut request: Request) -> Result<Request, SignError> {
        let hash = match request.sealed_hash.clone() {
            Some(hash) => hash,
            None => {
                let hash = self.stamp_and_seal(&mut request)?;
                // commit the hash before anchoring so a later retry can
                // skip straight to the ledger step
                self.store.update(&mut request)?;
                hash
            }
        };

        if request.ledger_ref.is_none() {
            let payload = MemoPayload::new(&request.id, &request.name, &hash);
            let payload_bytes = payload
                .to_bytes()
                .map_err(|e| SignError::FinalizationFailed(e.to_string()))?;

            match self.submit_with_retry(&payload_bytes) {
                Ok(receipt) => {
                    request.ledger_ref = Some(receipt.reference.clone());
                    request.status = RequestStatus::Completed;
                    request.completed_at = Some(TimeStamp::new());
                    request.record(
                        HistoryAction::Finalized,
                        SYSTEM_USER,
                        format!(
                            "Document sealed and anchored to ledger. TX: {}",
                            receipt.reference
                        ),
                    );
                    info!(id = %request.id, tx = %receipt.reference, "request finalized");
                }
                Err(e) => {
                    // the document stays sealed; completion is deferred so
                    // that completed always implies a ledger reference
                    error!(id = %request.id, error = %e, "ledger anchoring failed");
                    request.record(
                        HistoryAction::Error,
                        SYSTEM_USER,
                        format!("Ledger anchoring failed: {e}"),
                    );
                }
            }
            self.store.update(&mut request)?;
        }

        Ok(request)
    }

    /// Steps 1-3 of the pipeline. All-or-nothing: the vault is only written
    /// after every stamp and the seal succeeded in memory.
    fn stamp_and_seal(&self, request: &mut Request) -> Result<String, SignError> {
        let mut bytes = match self.vault.load(&request.filename) {
            Ok(bytes) => bytes,
            Err(VaultError::Missing(name)) => return Err(SignError::AssetMissing(name)),
            Err(other) => return Err(other.into()),
        };

        // stamp every signer not yet visually represented in the stream
        for approver in request.approvers.clone() {
            if !approver.signed {
                continue;
            }
            let marker = format!("Signed by: {}", approver.email);
            if contains_subslice(&bytes, marker.as_bytes()) {
                continue;
            }
            let at = approver.signed_at.unwrap_or_else(TimeStamp::new);
            bytes = self
                .backend
                .stamp(
                    &bytes,
                    &approver.email,
                    approver.page,
                    approver.x,
                    approver.y,
                    &at,
                )
                .map_err(|e| SignError::FinalizationFailed(e.to_string()))?;
        }

        let sealed = self
            .backend
            .seal(&bytes, &self.credential, &request.id)
            .map_err(|e| SignError::FinalizationFailed(e.to_string()))?;

        // the hash is computed after sealing, never before: sealing itself
        // mutates bytes
        let hash = sha256::digest(&sealed);
        self.vault.replace(&request.filename, &sealed)?;
        request.sealed_hash = Some(hash.clone());

        info!(id = %request.id, hash = %hash, "document sealed");
        Ok(hash)
    }

    fn submit_with_retry(&self, payload: &[u8]) -> Result<LedgerReceipt, LedgerError> {
        let attempts = self.retry.attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            match self.ledger.submit(payload) {
                Ok(receipt) => return Ok(receipt),
                Err(e @ LedgerError::Transient(_)) => {
                    warn!(attempt, attempts, error = %e, "ledger submission failed");
                    last = Some(e);
                    if attempt < attempts && !self.retry.backoff.is_zero() {
                        thread::sleep(self.retry.backoff);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last.unwrap_or_else(|| {
            LedgerError::Unavailable("ledger submission failed".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PdfStamper;
    use crate::ledger::MemoLedger;

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Page >>\nendobj\n";

    fn service(dir: &std::path::Path) -> SigningService {
        let db = Arc::new(sled::open(dir.join("requests.db")).unwrap());
        let store = RequestStore::new(db).unwrap();
        let vault = DocumentVault::new(dir.join("vault")).unwrap();
        let credential =
            SealCredential::from_seed([11u8; 32], "Evidence Engine", "Document certified");

        SigningService::new(
            store,
            vault,
            Arc::new(PdfStamper::new()),
            Arc::new(MemoLedger::new()),
            credential,
        )
    }

    #[test]
    fn lock_table_entry_is_dropped_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let open = service
            .create_request(
                RequestDraft::new()
                    .name("open")
                    .category("legal")
                    .initiator("owner@example.com")
                    .approver("a@example.com", 0, 10.0, 10.0)
                    .approver("b@example.com", 0, 10.0, 60.0),
                PDF,
            )
            .unwrap();
        let done = service
            .create_request(
                RequestDraft::new()
                    .name("done")
                    .category("legal")
                    .initiator("owner@example.com")
                    .approver("a@example.com", 0, 10.0, 10.0),
                PDF,
            )
            .unwrap();

        // an in-flight request keeps its serialization entry
        service.sign(&open.id, "a@example.com").unwrap();
        assert!(hold(&service.locks).contains_key(&open.id));

        // a completed one releases it
        let outcome = service.sign(&done.id, "a@example.com").unwrap();
        assert!(outcome.finalized);
        assert!(!hold(&service.locks).contains_key(&done.id));
    }
}
