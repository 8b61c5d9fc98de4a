//! Pure extraction of domain records from portal payloads.
//!
//! Every entry point takes the operating mode explicitly. `Mode::Http` bodies
//! are AJAX responses (JSON, sometimes wrapping an HTML fragment); `Mode::Rendered`
//! bodies are complete documents read off the browser page. The two are never
//! told apart by looking at the content.

pub mod dates;
mod document;
mod fragment;
mod rows;

pub use dates::{extract_date, parse_date};

use crate::error::{HoldError, ParseError};
use crate::models::{AccountSummary, Checkout, Hold, HoldConfirmation, Mode, PickupLocation, SearchResult};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

pub fn parse_account_summary(body: &str, mode: Mode) -> Result<AccountSummary, ParseError> {
    match mode {
        Mode::Http => fragment::account_summary(body),
        Mode::Rendered => document::account_summary(body),
    }
}

pub fn parse_checkouts(body: &str, mode: Mode) -> Result<Vec<Checkout>, ParseError> {
    match mode {
        Mode::Http => fragment::checkouts(body),
        Mode::Rendered => document::checkouts(body),
    }
}

pub fn parse_holds(body: &str, mode: Mode) -> Result<Vec<Hold>, ParseError> {
    match mode {
        Mode::Http => fragment::holds(body),
        Mode::Rendered => document::holds(body),
    }
}

pub fn parse_search_results(body: &str, mode: Mode, limit: usize) -> Result<Vec<SearchResult>, ParseError> {
    let mut results = match mode {
        Mode::Http => fragment::search_results(body)?,
        Mode::Rendered => document::search_results(body)?,
    };
    results.truncate(limit);
    Ok(results)
}

/// Options of the pickup-branch select on a hold form, minus the placeholder.
pub fn parse_pickup_locations(html: &str) -> Result<Vec<PickupLocation>, ParseError> {
    let document = Html::parse_document(html);
    let select = document
        .select(&css("select#pickupBranch, select[name='pickupBranch']")?)
        .next()
        .ok_or_else(|| ParseError::ShapeMismatch("pickupBranch".to_string()))?;

    let option_sel = css("option")?;
    let locations = select
        .select(&option_sel)
        .filter_map(|option| {
            let name = clean_text(option);
            let value = option.value().attr("value").unwrap_or_default().trim().to_string();
            if value.is_empty() || name.is_empty() || name.to_lowercase().starts_with("select") {
                None
            } else {
                Some(PickupLocation { value, name })
            }
        })
        .collect();
    Ok(locations)
}

/// Record id behind the first "place hold" link on a search results page.
pub fn first_holdable_record(html: &str) -> Result<Option<String>, ParseError> {
    let document = Html::parse_document(html);
    let link_re = pattern(r"/Record/([^/?#]+)/Hold")?;
    let record = document
        .select(&css("a[href*='/Hold']")?)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| link_re.captures(href).map(|c| c[1].to_string()));
    Ok(record)
}

/// Flash message the portal shows after a form submission.
#[derive(Debug, Clone, PartialEq)]
pub enum PortalNotice {
    Success(String),
    Failure(String),
}

pub fn portal_notice(html: &str) -> Result<Option<PortalNotice>, ParseError> {
    let document = Html::parse_document(html);
    // Aspen keeps empty alert containers around for script use
    let first_message = |selector: &str| -> Result<Option<String>, ParseError> {
        Ok(document
            .select(&css(selector)?)
            .map(clean_text)
            .find(|text| !text.is_empty()))
    };
    if let Some(message) = first_message(".alert-success, .holdConfirmation, .success")? {
        return Ok(Some(PortalNotice::Success(message)));
    }
    if let Some(message) = first_message(".alert-danger, .holdError, .error")? {
        return Ok(Some(PortalNotice::Failure(message)));
    }
    Ok(None)
}

/// Read the page shown after submitting a hold form.
pub fn parse_hold_outcome(html: &str, record_id: &str) -> Result<Result<HoldConfirmation, HoldError>, ParseError> {
    let outcome = match portal_notice(html)? {
        Some(PortalNotice::Success(message)) => Ok(HoldConfirmation {
            record_id: record_id.to_string(),
            message,
        }),
        Some(PortalNotice::Failure(message)) => Err(HoldError::from_message(&message)),
        None => Err(HoldError::Rejected(
            "portal showed no confirmation, check the holds list".to_string(),
        )),
    };
    Ok(outcome)
}

/// Response of the `renewItem` AJAX method, identical in both modes.
#[derive(Debug, Clone, PartialEq)]
pub struct RenewalNotice {
    pub success: bool,
    pub message: String,
    pub new_due_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRenewal {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    new_due_date: Option<String>,
}

pub fn parse_renewal(body: &str) -> Result<RenewalNotice, ParseError> {
    let raw: RawRenewal = serde_json::from_str(body)?;
    let message = raw
        .message
        .map(|m| strip_tags(&m))
        .unwrap_or_default();
    let new_due_date = match raw.new_due_date.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Some(extract_date(text)?),
        _ => None,
    };
    Ok(RenewalNotice {
        success: raw.success,
        message,
        new_due_date,
    })
}

pub(crate) fn css(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|_| ParseError::Pattern(selector.to_string()))
}

pub(crate) fn pattern(re: &str) -> Result<Regex, ParseError> {
    Regex::new(re).map_err(|_| ParseError::Pattern(re.to_string()))
}

/// Element text with whitespace collapsed.
pub(crate) fn clean_text(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Messages in AJAX responses sometimes carry markup.
pub(crate) fn strip_tags(text: &str) -> String {
    let fragment = Html::parse_fragment(text);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pickup_locations_skip_placeholder() {
        let html = r#"<form><select id="pickupBranch" name="pickupBranch">
            <option value="">Select a location</option>
            <option value="main">Main Library</option>
            <option value="bailey">Bailey Cove Library</option>
        </select></form>"#;
        let locations = parse_pickup_locations(html).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].value, "main");
        assert_eq!(locations[1].name, "Bailey Cove Library");
    }

    #[test]
    fn test_pickup_locations_require_select() {
        assert_eq!(
            parse_pickup_locations("<html><body>No form</body></html>"),
            Err(ParseError::ShapeMismatch("pickupBranch".to_string()))
        );
    }

    #[test]
    fn test_first_holdable_record() {
        let html = r#"<a href="/GroupedWork/abc">Dune</a>
            <a href="/Record/a1234567/Hold?source=ils">Place Hold</a>"#;
        assert_eq!(first_holdable_record(html).unwrap(), Some("a1234567".to_string()));
        assert_eq!(first_holdable_record("<p>none</p>").unwrap(), None);
    }

    #[test]
    fn test_hold_outcome() {
        let ok = r#"<div class="alert alert-success">Your hold was placed successfully.</div>"#;
        let confirmation = parse_hold_outcome(ok, "a1").unwrap().unwrap();
        assert_eq!(confirmation.record_id, "a1");
        assert!(confirmation.message.contains("placed"));

        let dup = r#"<div class="alert alert-danger">You already have a hold on this title.</div>"#;
        assert_eq!(parse_hold_outcome(dup, "a1").unwrap(), Err(HoldError::AlreadyHeld));

        assert!(matches!(
            parse_hold_outcome("<p>?</p>", "a1").unwrap(),
            Err(HoldError::Rejected(_))
        ));
    }

    #[test]
    fn test_renewal_notice() {
        let ok = parse_renewal(r#"{"success": true, "message": "<p>Renewed</p>", "newDueDate": "03/01/2026"}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.message, "Renewed");
        assert_eq!(ok.new_due_date, NaiveDate::from_ymd_opt(2026, 3, 1));

        let failed = parse_renewal(r#"{"success": false, "message": "Too many renewals"}"#).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.new_due_date, None);

        assert!(matches!(parse_renewal("<html>"), Err(ParseError::Json(_))));
    }
}
