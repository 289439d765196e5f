//! Tamper-evidence verification engine.
//!
//! Given an arbitrary byte stream, recompute its hash, find the matching
//! sealed request, cross-check the three hash sources (uploaded bytes,
//! stored record, ledger payload) and assemble a chain-of-custody report
//! with an additive trust score. Read-only: never mutates the store or the
//! ledger.
//!
//! The seal and stamp scans are best-effort pattern matches over the raw
//! bytes, not a structural parse of the signature objects. They feed the
//! trust score only; the authoritative tamper check is the three-way hash
//! cross-check.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::bytes::Regex;
use serde::Serialize;
use tracing::{error, info};

use super::backend::is_pdf;
use super::error::{LedgerError, StoreError};
use super::ledger::{LedgerClient, MemoPayload};
use super::request::{HistoryAction, Request, RequestStatus, TimeStamp};
use super::store::RequestStore;
use super::utils::parse_pdf_date;

static SEAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Type\s*/Sig").expect("valid regex"));
static SEAL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Name\s*\(([^)]+)\)").expect("valid regex"));
static SEAL_REASON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Reason\s*\(([^)]+)\)").expect("valid regex"));
static SEAL_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/M\s*\(D:(\d{14})").expect("valid regex"));
static STAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Signed by:\s*([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+)").expect("valid regex")
});
static SEAL_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Reference\s*\((req1[0-9a-z]+)\)").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Unknown,
    Verified,
    PartialVerification,
    Tampered,
    NotFound,
    InvalidPdf,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustLevel {
    High,
    Medium,
    Low,
}

/// Best-effort findings about the cryptographic seal.
#[derive(Debug, Clone, Serialize)]
pub struct SealInfo {
    pub found: bool,
    pub valid: bool,
    pub signer: Option<String>,
    pub reason: Option<String>,
    pub signed_at: Option<TimeStamp<Utc>>,
    pub message: String,
}

impl Default for SealInfo {
    fn default() -> Self {
        Self {
            found: false,
            valid: false,
            signer: None,
            reason: None,
            signed_at: None,
            message: "No cryptographic seal found in document".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub hash: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub original_filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustodyEntry {
    pub email: String,
    pub signed: bool,
    pub signed_at: Option<TimeStamp<Utc>>,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub visual_stamp_found: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainOfCustody {
    pub initiator: String,
    pub approvers: Vec<CustodyEntry>,
    pub all_signed: bool,
    pub status: RequestStatus,
    pub completed_at: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Created,
    Signed,
    Sealed,
    Anchored,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    pub kind: TimelineKind,
    pub action: String,
    pub user: Option<String>,
    pub timestamp: TimeStamp<Utc>,
    pub reference: Option<String>,
}

/// Transient verification report, rebuilt from scratch on every call.
#[derive(Debug, Serialize)]
pub struct VerificationReport {
    pub status: VerificationStatus,
    pub verified: bool,
    pub trust_level: Option<TrustLevel>,
    pub document: Option<DocumentSummary>,
    pub seal: SealInfo,
    pub ledger_reference: Option<String>,
    pub chain_of_custody: Option<ChainOfCustody>,
    pub timeline: Vec<TimelineEvent>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub checked_at: TimeStamp<Utc>,
}

impl VerificationReport {
    fn new() -> Self {
        Self {
            status: VerificationStatus::Unknown,
            verified: false,
            trust_level: None,
            document: None,
            seal: SealInfo::default(),
            ledger_reference: None,
            chain_of_custody: None,
            timeline: vec![],
            warnings: vec![],
            errors: vec![],
            checked_at: TimeStamp::new(),
        }
    }
}

/// Independent checks feeding the additive trust score.
#[derive(Debug, Clone, Copy)]
pub struct TrustSignals {
    pub hash_match: bool,
    pub ledger_found: bool,
    pub seal_valid: bool,
    pub all_signed: bool,
    pub stamps_found: bool,
}

pub fn trust_score(signals: &TrustSignals) -> u32 {
    let mut score = 0;
    if signals.hash_match {
        score += 30;
    }
    if signals.ledger_found {
        score += 30;
    }
    if signals.seal_valid {
        score += 20;
    }
    if signals.all_signed {
        score += 10;
    }
    if signals.stamps_found {
        score += 10;
    }
    score
}

pub fn trust_level(score: u32) -> TrustLevel {
    if score >= 80 {
        TrustLevel::High
    } else if score >= 50 {
        TrustLevel::Medium
    } else {
        TrustLevel::Low
    }
}

enum CrossCheck {
    Confirmed { reference: String },
    Unconfirmed(String),
    Mismatch(String),
}

fn hash_prefix(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}

fn capture_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

/// Scan the raw bytes for a signature dictionary.
fn scan_seal(bytes: &[u8]) -> SealInfo {
    if !SEAL_RE.is_match(bytes) {
        return SealInfo::default();
    }

    let signer = SEAL_NAME_RE
        .captures(bytes)
        .map(|c| capture_to_string(&c[1]));
    let reason = SEAL_REASON_RE
        .captures(bytes)
        .map(|c| capture_to_string(&c[1]));
    let signed_at = SEAL_DATE_RE
        .captures(bytes)
        .and_then(|c| parse_pdf_date(&capture_to_string(&c[1])))
        .map(TimeStamp::from);

    SealInfo {
        found: true,
        // assume valid if present; full validation would need the signer's
        // certificate chain
        valid: true,
        signer,
        reason,
        signed_at,
        message: "Cryptographic seal found and appears valid".to_string(),
    }
}

/// Scan for visible stamp markers, deduplicated in order of appearance.
fn scan_stamps(bytes: &[u8]) -> Vec<String> {
    let mut stamps: Vec<String> = vec![];
    for capture in STAMP_RE.captures_iter(bytes) {
        let email = capture_to_string(&capture[1]);
        if !stamps.contains(&email) {
            stamps.push(email);
        }
    }
    stamps
}

fn build_chain_of_custody(request: &Request, stamps: &[String]) -> ChainOfCustody {
    ChainOfCustody {
        initiator: request.initiator.clone(),
        approvers: request
            .approvers
            .iter()
            .map(|a| CustodyEntry {
                email: a.email.clone(),
                signed: a.signed,
                signed_at: a.signed_at,
                page: a.page,
                x: a.x,
                y: a.y,
                visual_stamp_found: stamps.iter().any(|s| s == &a.email),
            })
            .collect(),
        all_signed: request.all_signed(),
        status: request.status,
        completed_at: request.completed_at,
    }
}

/// Chronological view over the request's history plus the sealing event.
/// Sorting is stable, so equal timestamps keep their append order.
fn build_timeline(request: &Request) -> Vec<TimelineEvent> {
    let mut timeline: Vec<TimelineEvent> = request
        .history
        .iter()
        .map(|entry| {
            let (kind, action) = match entry.action {
                HistoryAction::Created => (TimelineKind::Created, "Request created".to_string()),
                HistoryAction::Signed => {
                    (TimelineKind::Signed, format!("Signed by {}", entry.user))
                }
                HistoryAction::Finalized => {
                    (TimelineKind::Anchored, "Ledger anchored".to_string())
                }
                HistoryAction::Error => (TimelineKind::Error, entry.details.clone()),
            };
            TimelineEvent {
                kind,
                action,
                user: Some(entry.user.clone()),
                timestamp: entry.timestamp,
                reference: match entry.action {
                    HistoryAction::Finalized => request.ledger_ref.clone(),
                    _ => None,
                },
            }
        })
        .collect();

    if let Some(completed_at) = request.completed_at {
        timeline.push(TimelineEvent {
            kind: TimelineKind::Sealed,
            action: "Cryptographic seal applied".to_string(),
            user: None,
            timestamp: completed_at,
            reference: None,
        });
    }

    timeline.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    timeline
}

pub struct VerificationEngine {
    store: RequestStore,
    ledger: Arc<dyn LedgerClient>,
}

impl VerificationEngine {
    pub fn new(store: RequestStore, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { store, ledger }
    }

    /// Verify an uploaded byte stream. Never fails outward: internal faults
    /// come back as a report with status `ERROR`.
    pub fn verify(&self, bytes: &[u8]) -> VerificationReport {
        let mut report = VerificationReport::new();

        if let Err(fault) = self.run(bytes, &mut report) {
            error!(error = %fault, "verification fault");
            report.status = VerificationStatus::Error;
            report.verified = false;
            report.trust_level = None;
            report.errors.push(fault.to_string());
        }

        info!(status = ?report.status, "verification complete");
        report
    }

    fn run(&self, bytes: &[u8], report: &mut VerificationReport) -> anyhow::Result<()> {
        // step 1: structural validation
        if bytes.is_empty() || !is_pdf(bytes) {
            report.status = VerificationStatus::InvalidPdf;
            report
                .errors
                .push("Not a valid PDF file (missing %PDF header)".to_string());
            return Ok(());
        }

        // step 2: best-effort seal extraction; absence is a finding, not an
        // abort
        report.seal = scan_seal(bytes);

        // step 3: content hash of exactly the bytes supplied
        let hash = sha256::digest(bytes);
        report.document = Some(DocumentSummary {
            hash: hash.clone(),
            name: None,
            category: None,
            original_filename: None,
        });

        // step 4: locate the sealed request, by hash first, then by the
        // reference embedded in the seal. The fallback is what lets a
        // mutated copy of a sealed document report as tampered instead of
        // unknown.
        let found = match self.store.find_by_hash(&hash)? {
            Some(request) => Some(request),
            None => self.request_by_embedded_ref(bytes)?,
        };
        let Some(request) = found else {
            report.status = VerificationStatus::NotFound;
            report.errors.push(
                "Document hash not found. This document was either never processed \
                 by this system or has been modified."
                    .to_string(),
            );
            return Ok(());
        };

        if let Some(document) = &mut report.document {
            document.name = Some(request.name.clone());
            document.category = Some(request.category.clone());
            document.original_filename = request.original_filename.clone();
        }

        // step 5: three-way cross-check against the ledger
        match self.cross_check(&request, &hash) {
            CrossCheck::Mismatch(detail) => {
                report.status = VerificationStatus::Tampered;
                report.verified = false;
                report.errors.push(detail);
                return Ok(());
            }
            CrossCheck::Unconfirmed(reason) => {
                report.status = VerificationStatus::PartialVerification;
                report.verified = true;
                report
                    .warnings
                    .push(format!("Origin confirmation incomplete: {reason}"));
                return Ok(());
            }
            CrossCheck::Confirmed { reference } => {
                report.ledger_reference = Some(reference);
            }
        }

        // step 6: evidence assembly
        let stamps = scan_stamps(bytes);
        report.chain_of_custody = Some(build_chain_of_custody(&request, &stamps));
        report.timeline = build_timeline(&request);

        // step 7: trust score
        let signals = TrustSignals {
            hash_match: true,
            ledger_found: true,
            seal_valid: report.seal.valid,
            all_signed: request.all_signed(),
            stamps_found: request.approvers.iter().any(|a| stamps.contains(&a.email)),
        };
        report.trust_level = Some(trust_level(trust_score(&signals)));
        report.status = VerificationStatus::Verified;
        report.verified = true;

        Ok(())
    }

    /// Fallback lookup through the request reference the seal embeds. Only
    /// a request that actually holds a sealed hash qualifies; anything else
    /// is treated as no match at all.
    fn request_by_embedded_ref(&self, bytes: &[u8]) -> anyhow::Result<Option<Request>> {
        let Some(capture) = SEAL_REF_RE.captures(bytes) else {
            return Ok(None);
        };
        let id = capture_to_string(&capture[1]);

        match self.store.get_by_id(&id) {
            Ok(request) if request.sealed_hash.is_some() => Ok(Some(request)),
            Ok(_) => Ok(None),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All three hash sources must be pairwise equal. A retrieval fault is
    /// `Unconfirmed` (partial verification); only a confirmed inequality is
    /// a `Mismatch` (tampered).
    fn cross_check(&self, request: &Request, hash: &str) -> CrossCheck {
        let Some(stored) = request.sealed_hash.as_deref() else {
            return CrossCheck::Unconfirmed(
                "matched request carries no sealed hash".to_string(),
            );
        };
        if stored != hash {
            return CrossCheck::Mismatch(format!(
                "Hash mismatch detected! Uploaded: {}... Expected: {}...",
                hash_prefix(hash),
                hash_prefix(stored),
            ));
        }

        let Some(reference) = request.ledger_ref.as_deref() else {
            return CrossCheck::Unconfirmed(
                "no ledger transaction recorded for this document".to_string(),
            );
        };

        match self.ledger.lookup(reference) {
            Ok(record) => match MemoPayload::from_bytes(&record.payload) {
                Ok(payload) if payload.hash == hash => CrossCheck::Confirmed {
                    reference: reference.to_string(),
                },
                Ok(payload) => CrossCheck::Mismatch(format!(
                    "Hash mismatch detected! Uploaded: {}... Ledger: {}...",
                    hash_prefix(hash),
                    hash_prefix(&payload.hash),
                )),
                Err(e) => CrossCheck::Unconfirmed(format!(
                    "ledger payload could not be decoded: {e}"
                )),
            },
            Err(LedgerError::NotFound) => {
                CrossCheck::Unconfirmed("ledger record not found".to_string())
            }
            Err(e) => CrossCheck::Unconfirmed(format!("ledger lookup failed: {e}")),
        }
    }
}
