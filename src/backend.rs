//! Signing backend: visible stamps and the document-wide cryptographic seal.
//!
//! The backend works by incremental append only. A stamp adds an annotation
//! object carrying the `Signed by:` marker at the approver's recorded
//! placement; the seal adds a signature dictionary holding a detached
//! Ed25519 signature over every byte that precedes it. Neither touches
//! existing content, so earlier stamps survive later ones byte-for-byte.

use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use super::error::BackendError;
use super::request::TimeStamp;
use super::utils::format_pdf_date;

/// Signing credential used for the seal. Stands in for a CA-issued
/// certificate: a keypair plus the display name and reason text embedded in
/// the signature dictionary.
pub struct SealCredential {
    key: SigningKey,
    name: String,
    reason: String,
}

impl SealCredential {
    pub fn generate(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Deterministic credential from a fixed seed. Intended for tests and
    /// reproducible environments.
    pub fn from_seed(seed: [u8; 32], name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        self.key.sign(bytes)
    }
}

/// Byte-stream operations supplied to the orchestrator. Implementations must
/// be deterministic in output structure given identical inputs aside from
/// timestamps, and must not corrupt unrelated content.
pub trait SigningBackend: Send + Sync {
    /// Draw a placement-accurate visible stamp for one signer. Coordinates
    /// are anchored from the top-left corner of the page.
    fn stamp(
        &self,
        bytes: &[u8],
        signer: &str,
        page: u32,
        x: f64,
        y: f64,
        timestamp: &TimeStamp<Utc>,
    ) -> Result<Vec<u8>, BackendError>;

    /// Apply one document-wide cryptographic signature over the fully
    /// stamped stream. Any byte change after this invalidates the seal.
    /// `reference` is the request id, embedded in the signature dictionary
    /// so a mutated copy can still be traced back to its record.
    fn seal(
        &self,
        bytes: &[u8],
        credential: &SealCredential,
        reference: &str,
    ) -> Result<Vec<u8>, BackendError>;
}

/// Default backend writing PDF incremental updates.
#[derive(Default)]
pub struct PdfStamper;

impl PdfStamper {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

fn count_objects(bytes: &[u8]) -> usize {
    let needle = b"endobj";
    if bytes.len() < needle.len() {
        return 0;
    }
    bytes.windows(needle.len()).filter(|w| w == needle).count()
}

impl SigningBackend for PdfStamper {
    fn stamp(
        &self,
        bytes: &[u8],
        signer: &str,
        page: u32,
        x: f64,
        y: f64,
        timestamp: &TimeStamp<Utc>,
    ) -> Result<Vec<u8>, BackendError> {
        if !is_pdf(bytes) {
            return Err(BackendError::NotPdf);
        }

        let obj = count_objects(bytes) + 1;
        let iso = timestamp.to_datetime_utc().to_rfc3339();
        let block = format!(
            "\n{obj} 0 obj\n<< /Type /Annot /Subtype /FreeText /Pg {page} \
             /Rect [{x:.2} {y:.2} {:.2} {:.2}] \
             /Contents (Signed by: {signer}\n{iso}) >>\nendobj\n",
            x + 200.0,
            y + 40.0,
        );

        let mut out = Vec::with_capacity(bytes.len() + block.len());
        out.extend_from_slice(bytes);
        out.extend_from_slice(block.as_bytes());
        Ok(out)
    }

    fn seal(
        &self,
        bytes: &[u8],
        credential: &SealCredential,
        reference: &str,
    ) -> Result<Vec<u8>, BackendError> {
        if !is_pdf(bytes) {
            return Err(BackendError::NotPdf);
        }

        let signature = credential.sign(bytes);
        let obj = count_objects(bytes) + 1;
        let sealed_at = format_pdf_date(&Utc::now());
        let block = format!(
            "\n{obj} 0 obj\n<< /Type /Sig /Filter /Adobe.PPKLite \
             /SubFilter /adbe.pkcs7.detached \
             /Name ({name}) /Reason ({reason}) /M ({sealed_at}) \
             /Reference ({reference}) \
             /ByteRange [0 {len} 0 0] \
             /Contents <{sig}> >>\nendobj\n%%EOF\n",
            name = credential.name(),
            reason = credential.reason(),
            len = bytes.len(),
            sig = hex::encode(signature.to_bytes()),
        );

        let mut out = Vec::with_capacity(bytes.len() + block.len());
        out.extend_from_slice(bytes);
        out.extend_from_slice(block.as_bytes());
        Ok(out)
    }
}
