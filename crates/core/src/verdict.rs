use serde::{Deserialize, Serialize};

/// Marker the generation service is asked to emit between status and reason.
const REASON_MARKER: &str = "Reason:";
const STATUS_PREFIX: &str = "Status:";

/// Canonical reimbursement status. Anything the model produces outside this
/// set is mapped to `Unknown` rather than carried through as a free string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReimbursementStatus {
    FullyReimbursed,
    PartiallyReimbursed,
    Declined,
    Unknown,
}

impl ReimbursementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReimbursementStatus::FullyReimbursed => "Fully Reimbursed",
            ReimbursementStatus::PartiallyReimbursed => "Partially Reimbursed",
            ReimbursementStatus::Declined => "Declined",
            ReimbursementStatus::Unknown => "Unknown",
        }
    }

    pub fn from_label(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "fully reimbursed" => ReimbursementStatus::FullyReimbursed,
            "partially reimbursed" => ReimbursementStatus::PartiallyReimbursed,
            "declined" => ReimbursementStatus::Declined,
            _ => ReimbursementStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: ReimbursementStatus,
    pub reason: String,
}

/// Split a raw model response into a (status, reason) verdict.
///
/// Splits on the first occurrence of `Reason:`; the leading segment has any
/// `Status:` prefix stripped and is validated against the canonical status
/// set. When the marker is absent the status is `Unknown` and the whole
/// response becomes the reason, so nothing is silently dropped. Total
/// function: every input has a defined verdict.
pub fn parse_verdict(raw: &str) -> Verdict {
    match raw.split_once(REASON_MARKER) {
        Some((status_segment, reason_segment)) => {
            let label = strip_status_prefix(status_segment);
            Verdict {
                status: ReimbursementStatus::from_label(label),
                reason: reason_segment.trim().to_string(),
            }
        }
        None => Verdict {
            status: ReimbursementStatus::Unknown,
            reason: raw.to_string(),
        },
    }
}

// Prefix matching mirrors `from_label`: case-insensitive, like the labels.
fn strip_status_prefix(segment: &str) -> &str {
    let trimmed = segment.trim();
    match trimmed.get(..STATUS_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(STATUS_PREFIX) => {
            trimmed[STATUS_PREFIX.len()..].trim()
        }
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_reason_marker() {
        let verdict = parse_verdict("Status: Declined\nReason: alcohol not covered");
        assert_eq!(verdict.status, ReimbursementStatus::Declined);
        assert_eq!(verdict.reason, "alcohol not covered");
    }

    #[test]
    fn later_markers_stay_in_reason() {
        let verdict = parse_verdict("Status: Declined\nReason: first. Reason: second");
        assert_eq!(verdict.status, ReimbursementStatus::Declined);
        assert_eq!(verdict.reason, "first. Reason: second");
    }

    #[test]
    fn missing_marker_keeps_whole_response() {
        let raw = "the model rambled without the expected format";
        let verdict = parse_verdict(raw);
        assert_eq!(verdict.status, ReimbursementStatus::Unknown);
        assert_eq!(verdict.reason, raw);
    }

    #[test]
    fn unrecognized_status_maps_to_unknown() {
        let verdict = parse_verdict("Status: Maybe Later\nReason: unclear invoice");
        assert_eq!(verdict.status, ReimbursementStatus::Unknown);
        assert_eq!(verdict.reason, "unclear invoice");
    }

    #[test]
    fn status_labels_are_case_insensitive() {
        let verdict = parse_verdict("status: fully reimbursed\nReason: within policy");
        assert_eq!(verdict.status, ReimbursementStatus::FullyReimbursed);
        let verdict = parse_verdict("STATUS: DECLINED\nReason: over budget");
        assert_eq!(verdict.status, ReimbursementStatus::Declined);
    }

    #[test]
    fn short_status_segment_is_not_sliced() {
        // Segments shorter than the prefix must pass through untouched.
        let verdict = parse_verdict("ok Reason: fine");
        assert_eq!(verdict.status, ReimbursementStatus::Unknown);
        assert_eq!(verdict.reason, "fine");
    }

    #[test]
    fn empty_input_is_defined() {
        let verdict = parse_verdict("");
        assert_eq!(verdict.status, ReimbursementStatus::Unknown);
        assert_eq!(verdict.reason, "");
    }

    #[test]
    fn canonical_labels_round_trip() {
        for status in [
            ReimbursementStatus::FullyReimbursed,
            ReimbursementStatus::PartiallyReimbursed,
            ReimbursementStatus::Declined,
            ReimbursementStatus::Unknown,
        ] {
            assert_eq!(ReimbursementStatus::from_label(status.as_str()), status);
        }
    }
}
