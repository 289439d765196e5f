//! Concurrent signing must finalize a request exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use evidence_engine::backend::{PdfStamper, SealCredential, SigningBackend};
use evidence_engine::error::BackendError;
use evidence_engine::ledger::{LedgerClient, MemoLedger};
use evidence_engine::request::{HistoryAction, RequestDraft, RequestStatus, TimeStamp};
use evidence_engine::service::SigningService;
use evidence_engine::store::RequestStore;
use evidence_engine::vault::DocumentVault;
use tempfile::tempdir;

const PDF: &[u8] =
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n2 0 obj\n<< /Type /Page >>\nendobj\n";

#[derive(Default)]
struct CountingBackend {
    inner: PdfStamper,
    seals: AtomicUsize,
}

impl SigningBackend for CountingBackend {
    fn stamp(
        &self,
        bytes: &[u8],
        signer: &str,
        page: u32,
        x: f64,
        y: f64,
        timestamp: &TimeStamp<chrono::Utc>,
    ) -> Result<Vec<u8>, BackendError> {
        self.inner.stamp(bytes, signer, page, x, y, timestamp)
    }

    fn seal(
        &self,
        bytes: &[u8],
        credential: &SealCredential,
        reference: &str,
    ) -> Result<Vec<u8>, BackendError> {
        self.seals.fetch_add(1, Ordering::SeqCst);
        self.inner.seal(bytes, credential, reference)
    }
}

#[test]
fn parallel_signers_produce_one_seal_and_one_anchor() -> anyhow::Result<()> {
    const SIGNERS: usize = 5;

    let dir = tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("requests.db"))?);
    let store = RequestStore::new(db)?;
    let vault = DocumentVault::new(dir.path().join("vault"))?;
    let ledger = Arc::new(MemoLedger::new());
    let backend = Arc::new(CountingBackend::default());
    let credential = SealCredential::from_seed([9u8; 32], "Evidence Engine", "Document certified");

    let service = Arc::new(SigningService::new(
        store.clone(),
        vault,
        Arc::clone(&backend) as Arc<dyn SigningBackend>,
        Arc::clone(&ledger) as Arc<dyn LedgerClient>,
        credential,
    ));

    let mut draft = RequestDraft::new()
        .name("Board resolution")
        .category("governance")
        .initiator("chair@example.com");
    for i in 0..SIGNERS {
        draft = draft.approver(format!("signer{i}@example.com"), 0, 40.0, 60.0 + i as f64 * 50.0);
    }
    let request = service.create_request(draft, PDF)?;

    let handles: Vec<_> = (0..SIGNERS)
        .map(|i| {
            let service = Arc::clone(&service);
            let id = request.id.clone();
            thread::spawn(move || service.sign(&id, &format!("signer{i}@example.com")))
        })
        .collect();

    let mut finalized = 0;
    for handle in handles {
        let outcome = handle.join().expect("signer thread panicked")?;
        if outcome.finalized {
            finalized += 1;
        }
    }
    assert_eq!(finalized, 1, "exactly one signer observes finalization");

    let finished = store.get_by_id(&request.id)?;
    assert_eq!(finished.status, RequestStatus::Completed);
    assert!(finished.all_signed());
    assert!(finished.sealed_hash.is_some());
    assert!(finished.ledger_ref.is_some());

    // created + one per signer + finalized, no duplicates
    assert_eq!(finished.history.len(), SIGNERS + 2);
    let signed = finished
        .history
        .iter()
        .filter(|h| h.action == HistoryAction::Signed)
        .count();
    assert_eq!(signed, SIGNERS);
    let anchored = finished
        .history
        .iter()
        .filter(|h| h.action == HistoryAction::Finalized)
        .count();
    assert_eq!(anchored, 1);

    assert_eq!(backend.seals.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.len(), 1);
    Ok(())
}
