//! Core request, approver and history types for the signing workflow
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::utils::new_uuid_to_bech32;

/// Acting identity recorded on history entries appended by the engine itself
/// rather than by a signer.
pub const SYSTEM_USER: &str = "SYSTEM";

#[derive(Debug)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// the comparison and copy impls are written out by hand: deriving them
// would demand `T: Ord` and `T: Copy`, which `chrono::Utc` does not
// satisfy, while the inner `DateTime` already compares for any timezone
impl<T: TimeZone> Clone for TimeStamp<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: TimeZone> Copy for TimeStamp<T> where T::Offset: Copy {}

impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// reports serialize timestamps as RFC 3339 strings
impl Serialize for TimeStamp<Utc> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Workflow state of a request. `Completed` is terminal.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    InProgress,
    #[n(2)]
    Completed,
}

/// Action tag of one audit record. Tags mirror the wire-level history names
/// (`created`, `signed`, `finalized`, `error`).
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    #[n(0)]
    Created,
    #[n(1)]
    Signed,
    #[n(2)]
    Finalized,
    #[n(3)]
    Error,
}

/// One immutable audit record. Created by appends only, never edited.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    #[n(0)]
    pub action: HistoryAction,
    #[n(1)]
    pub user: String,
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub details: String,
}

/// One required signer with a fixed stamp placement. The placement never
/// changes after the request is created; `signed` only moves false -> true.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Approver {
    #[n(0)]
    pub email: String,
    #[n(1)]
    pub page: u32,
    #[n(2)]
    pub x: f64,
    #[n(3)]
    pub y: f64,
    #[n(4)]
    pub signed: bool,
    #[n(5)]
    pub signed_at: Option<TimeStamp<Utc>>,
}

/// One document workflow instance. Approvers and history are embedded so a
/// single record write updates the whole unit atomically.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Request {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded with the `req` hrp
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub category: String,
    #[n(3)]
    pub filename: String, // reference into the document vault
    #[n(4)]
    pub original_filename: Option<String>,
    #[n(5)]
    pub initiator: String,
    #[n(6)]
    pub approvers: Vec<Approver>,
    #[n(7)]
    pub status: RequestStatus,
    #[n(8)]
    pub sealed_hash: Option<String>, // set exactly once, after sealing
    #[n(9)]
    pub ledger_ref: Option<String>, // set exactly once, after anchoring
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(12)]
    pub history: Vec<HistoryEntry>,
    #[n(13)]
    pub version: u64, // optimistic concurrency token, bumped by the store
}

impl Request {
    pub fn approver(&self, email: &str) -> Option<&Approver> {
        self.approvers.iter().find(|a| a.email == email)
    }

    pub fn approver_mut(&mut self, email: &str) -> Option<&mut Approver> {
        self.approvers.iter_mut().find(|a| a.email == email)
    }

    pub fn all_signed(&self) -> bool {
        self.approvers.iter().all(|a| a.signed)
    }

    pub fn signed_count(&self) -> usize {
        self.approvers.iter().filter(|a| a.signed).count()
    }

    pub fn is_completed(&self) -> bool {
        self.status == RequestStatus::Completed
    }

    /// Whether the given identity initiated or is expected to sign this
    /// request. Used by the per-user listing query.
    pub fn involves(&self, email: &str) -> bool {
        self.initiator == email || self.approver(email).is_some()
    }

    /// Append an audit record. History is append-only; ties between equal
    /// timestamps are broken by append order.
    pub fn record(&mut self, action: HistoryAction, user: &str, details: impl Into<String>) {
        self.history.push(HistoryEntry {
            action,
            user: user.to_string(),
            timestamp: TimeStamp::new(),
            details: details.into(),
        });
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DraftError {
    #[error("request name is required")]
    MissingName,
    #[error("category is required")]
    MissingCategory,
    #[error("initiator is required")]
    MissingInitiator,
    #[error("at least one approver is required")]
    NoApprovers,
    #[error("duplicate approver: {0}")]
    DuplicateApprover(String),
    #[error("approver email is empty")]
    EmptyApprover,
}

// used for constructing new requests before they are persisted
#[derive(Default)]
pub struct RequestDraft {
    name: Option<String>,
    category: Option<String>,
    original_filename: Option<String>,
    initiator: Option<String>,
    approvers: Vec<Approver>,
}

impl RequestDraft {
    /// Construct a new builder object, this becomes the basis for a request
    pub fn new() -> Self {
        Self::default()
    }
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
    pub fn original_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = Some(filename.into());
        self
    }
    pub fn initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }
    /// Bind one approver at a fixed placement. The set is frozen on build.
    pub fn approver(mut self, email: impl Into<String>, page: u32, x: f64, y: f64) -> Self {
        self.approvers.push(Approver {
            email: email.into(),
            page,
            x,
            y,
            signed: false,
            signed_at: None,
        });
        self
    }

    // Checks fields and performs validation. Returns a fresh pending request
    // with its `created` history entry already appended.
    pub fn build(self) -> anyhow::Result<Request> {
        let name = match self.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => name,
            None => return Err(DraftError::MissingName.into()),
        };
        let category = match self.category.filter(|c| !c.trim().is_empty()) {
            Some(category) => category,
            None => return Err(DraftError::MissingCategory.into()),
        };
        let initiator = match self.initiator.filter(|i| !i.trim().is_empty()) {
            Some(initiator) => initiator,
            None => return Err(DraftError::MissingInitiator.into()),
        };
        if self.approvers.is_empty() {
            return Err(DraftError::NoApprovers.into());
        }
        for (idx, approver) in self.approvers.iter().enumerate() {
            if approver.email.trim().is_empty() {
                return Err(DraftError::EmptyApprover.into());
            }
            if self.approvers[..idx].iter().any(|a| a.email == approver.email) {
                return Err(DraftError::DuplicateApprover(approver.email.clone()).into());
            }
        }

        let id = new_uuid_to_bech32("req")?;
        let filename = format!("{id}.pdf");
        let approver_count = self.approvers.len();

        let mut request = Request {
            id,
            name,
            category,
            filename,
            original_filename: self.original_filename,
            initiator: initiator.clone(),
            approvers: self.approvers,
            status: RequestStatus::Pending,
            sealed_hash: None,
            ledger_ref: None,
            created_at: TimeStamp::new(),
            completed_at: None,
            history: vec![],
            version: 0,
        };
        request.record(
            HistoryAction::Created,
            &initiator,
            format!("Request created with {approver_count} approver(s)"),
        );

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> RequestDraft {
        RequestDraft::new()
            .name("Vendor contract")
            .category("legal")
            .initiator("owner@example.com")
            .approver("a@example.com", 0, 50.0, 100.0)
            .approver("b@example.com", 1, 10.0, 20.0)
    }

    #[test]
    fn timestamps_copy_and_order_chronologically() {
        let earlier = TimeStamp::new_with(2025, 1, 14, 9, 0, 0);
        let later = TimeStamp::new_with(2025, 6, 1, 12, 30, 0);
        let copied = earlier;

        assert_eq!(copied, earlier);
        assert!(earlier < later);
        assert_eq!(earlier.max(later), later);

        let mut stamps = vec![later, earlier];
        stamps.sort();
        assert_eq!(stamps, vec![earlier, later]);
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn request_encoding() {
        let original = draft().build().unwrap();

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: Request = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn build_starts_pending_with_created_entry() {
        let request = draft().build().unwrap();

        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.history.len(), 1);
        assert_eq!(request.history[0].action, HistoryAction::Created);
        assert_eq!(request.history[0].user, "owner@example.com");
        assert!(request.id.starts_with("req1"));
        assert!(request.sealed_hash.is_none());
        assert!(request.ledger_ref.is_none());
        assert!(!request.all_signed());
    }

    #[test]
    fn build_rejects_empty_approver_set() {
        let result = RequestDraft::new()
            .name("doc")
            .category("misc")
            .initiator("owner@example.com")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn build_rejects_duplicate_approvers() {
        let result = RequestDraft::new()
            .name("doc")
            .category("misc")
            .initiator("owner@example.com")
            .approver("a@example.com", 0, 1.0, 1.0)
            .approver("a@example.com", 0, 2.0, 2.0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn involves_matches_initiator_and_approvers() {
        let request = draft().build().unwrap();

        assert!(request.involves("owner@example.com"));
        assert!(request.involves("a@example.com"));
        assert!(!request.involves("stranger@example.com"));
    }
}
