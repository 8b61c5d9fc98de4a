use crate::error::ParseError;
use chrono::NaiveDate;
use regex::Regex;

/// Display formats the portal uses for dates.
const DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y",   // 02/15/2026
    "%m-%d-%Y",   // 02-15-2026
    "%Y-%m-%d",   // 2026-02-15
    "%B %d, %Y",  // February 15, 2026
    "%b %d, %Y",  // Feb 15, 2026
    "%b. %d, %Y", // Feb. 15, 2026
    "%B %d %Y",
    "%b %d %Y",
];

/// Parse a bare date string. Unknown formats are an error, never a default.
pub fn parse_date(text: &str) -> Result<NaiveDate, ParseError> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .ok_or_else(|| ParseError::UnrecognizedDate(text.to_string()))
}

/// Find and parse a date embedded in surrounding text, e.g. "Due: 02/15/2026".
pub fn extract_date(text: &str) -> Result<NaiveDate, ParseError> {
    let patterns = [
        r"\d{1,2}[/-]\d{1,2}[/-]\d{4}",
        r"\d{4}-\d{2}-\d{2}",
        r"[A-Za-z]{3,9}\.? \d{1,2},? \d{4}",
    ];

    for pattern in patterns {
        let re = Regex::new(pattern).map_err(|e| ParseError::Pattern(e.to_string()))?;
        if let Some(found) = re.find(text) {
            return parse_date(found.as_str());
        }
    }

    parse_date(text)
}
