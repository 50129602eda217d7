use once_cell::sync::Lazy;
use regex::Regex;

pub const UNKNOWN_DATE: &str = "Unknown";

/// Date patterns in priority order. The first pattern with any match wins,
/// and its first match in the text is the extracted token.
static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b\d{2}[/-]\d{2}[/-]\d{4}\b",
        r"\b\d{4}[/-]\d{2}[/-]\d{2}\b",
        r"\b\d{1,2} \w+ \d{4}\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("date pattern must compile"))
    .collect()
});

/// Extract a reimbursement date token from free invoice text.
///
/// Returns `"Unknown"` when no pattern matches. Deterministic: the same
/// input always yields the same token.
pub fn extract_date(text: &str) -> String {
    for pattern in DATE_PATTERNS.iter() {
        if let Some(found) = pattern.find(text) {
            return found.as_str().to_string();
        }
    }
    UNKNOWN_DATE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_slash_date() {
        assert_eq!(extract_date("Invoice dated 12/03/2024 for travel"), "12/03/2024");
    }

    #[test]
    fn extracts_dash_date() {
        assert_eq!(extract_date("paid on 01-11-2023"), "01-11-2023");
    }

    #[test]
    fn extracts_iso_date() {
        assert_eq!(extract_date("date: 2024-05-17"), "2024-05-17");
    }

    #[test]
    fn extracts_written_date() {
        assert_eq!(extract_date("received 3 March 2024 by courier"), "3 March 2024");
    }

    #[test]
    fn pattern_priority_prefers_numeric_over_written() {
        // Both forms present: the DD/MM/YYYY pattern is checked first.
        let text = "written 5 June 2023, stamped 07/06/2023";
        assert_eq!(extract_date(text), "07/06/2023");
    }

    #[test]
    fn first_match_of_winning_pattern() {
        assert_eq!(extract_date("from 01/01/2024 to 31/01/2024"), "01/01/2024");
    }

    #[test]
    fn unknown_when_no_pattern_matches() {
        assert_eq!(extract_date("no dates here, only totals: $42.00"), UNKNOWN_DATE);
        assert_eq!(extract_date(""), UNKNOWN_DATE);
    }
}
