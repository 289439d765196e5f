//! Property tests over the pure pieces: trust scoring, date formatting and
//! request draft validation.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use evidence_engine::request::RequestDraft;
use evidence_engine::utils::{format_pdf_date, parse_pdf_date};
use evidence_engine::verify::{TrustLevel, TrustSignals, trust_level, trust_score};

fn signals() -> impl Strategy<Value = TrustSignals> {
    (
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(hash_match, ledger_found, seal_valid, all_signed, stamps_found)| TrustSignals {
                hash_match,
                ledger_found,
                seal_valid,
                all_signed,
                stamps_found,
            },
        )
}

proptest! {
    #[test]
    fn trust_score_stays_within_bounds(signals in signals()) {
        let score = trust_score(&signals);
        prop_assert!(score <= 100);
    }

    // turning any single signal on never lowers the score
    #[test]
    fn trust_score_is_monotone_in_each_signal(signals in signals()) {
        let base = trust_score(&signals);

        let variants = [
            TrustSignals { hash_match: true, ..signals },
            TrustSignals { ledger_found: true, ..signals },
            TrustSignals { seal_valid: true, ..signals },
            TrustSignals { all_signed: true, ..signals },
            TrustSignals { stamps_found: true, ..signals },
        ];
        for stronger in variants {
            prop_assert!(trust_score(&stronger) >= base);
        }
    }

    #[test]
    fn trust_level_matches_the_documented_thresholds(score in 0u32..=100) {
        let expected = if score >= 80 {
            TrustLevel::High
        } else if score >= 50 {
            TrustLevel::Medium
        } else {
            TrustLevel::Low
        };
        prop_assert_eq!(trust_level(score), expected);
    }

    #[test]
    fn pdf_date_round_trips_at_second_precision(secs in 0i64..=4_102_444_800) {
        let original = Utc.timestamp_opt(secs, 0).single().unwrap();
        let encoded = format_pdf_date(&original);
        prop_assert!(encoded.starts_with("D:"));

        // the parser takes the 14-digit body without the `D:` prefix
        let parsed = parse_pdf_date(&encoded[2..]).unwrap();
        prop_assert_eq!(parsed, original);
    }

    #[test]
    fn draft_with_unique_approvers_builds_pending(count in 1usize..10) {
        let mut draft = RequestDraft::new()
            .name("doc")
            .category("general")
            .initiator("owner@example.com");
        for i in 0..count {
            draft = draft.approver(format!("s{i}@example.com"), 0, 10.0, 10.0);
        }

        let request = draft.build().unwrap();
        prop_assert_eq!(request.approvers.len(), count);
        prop_assert!(request.approvers.iter().all(|a| !a.signed));
        prop_assert_eq!(request.history.len(), 1);
        prop_assert!(request.sealed_hash.is_none());
        prop_assert!(request.ledger_ref.is_none());
    }

    #[test]
    fn duplicate_approver_is_always_rejected(count in 1usize..8, dup in 0usize..8) {
        let dup = dup % count;
        let mut draft = RequestDraft::new()
            .name("doc")
            .category("general")
            .initiator("owner@example.com");
        for i in 0..count {
            draft = draft.approver(format!("s{i}@example.com"), 0, 10.0, 10.0);
        }
        draft = draft.approver(format!("s{dup}@example.com"), 1, 20.0, 20.0);

        prop_assert!(draft.build().is_err());
    }
}
