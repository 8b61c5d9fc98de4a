//! AJAX responses from `/MyAccount/AJAX` and friends.
//!
//! Aspen answers with JSON. Depending on the method and the catalog version the
//! records arrive either as an array of objects or as an `html` string holding
//! the same rows the full page would render.

use super::rows::{self, CHECKOUT_ROWS, HOLD_ROWS, SEARCH_ROWS};
use super::{extract_date, strip_tags};
use crate::error::ParseError;
use crate::models::{AccountSummary, Availability, Checkout, Format, Hold, HoldStatus, SearchResult};
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde_json::{Map, Value};

fn parse_object(body: &str) -> Result<Map<String, Value>, ParseError> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(ParseError::ShapeMismatch("response object".to_string())),
    }
}

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match first(obj, keys)? {
        Value::String(s) if s.contains('<') => Some(strip_tags(s)).filter(|s| !s.is_empty()),
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn count(obj: &Map<String, Value>, key: &'static str) -> Result<Option<u32>, ParseError> {
    let invalid = |value: &Value| ParseError::InvalidValue {
        field: key,
        value: value.to_string(),
    };
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid(v)),
        Some(v @ Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid(v)),
        Some(v) => Err(invalid(v)),
    }
}

fn flag(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    match first(obj, keys)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_i64() != Some(0)),
        Value::String(s) => Some(matches!(s.to_lowercase().as_str(), "1" | "true" | "yes")),
        _ => None,
    }
}

/// Calendar day of a unix timestamp on the same clock "today" is read from.
fn timestamp_date<Tz: TimeZone>(secs: i64, tz: &Tz) -> Option<NaiveDate> {
    DateTime::from_timestamp(secs, 0).map(|dt| dt.with_timezone(tz).date_naive())
}

/// Dates arrive as display strings or as unix timestamps.
fn date(obj: &Map<String, Value>, keys: &[&str]) -> Result<Option<NaiveDate>, ParseError> {
    match first(obj, keys) {
        None => Ok(None),
        Some(Value::Number(n)) => {
            let secs = n.as_i64().ok_or_else(|| ParseError::UnrecognizedDate(n.to_string()))?;
            timestamp_date(secs, &Local)
                .map(Some)
                .ok_or_else(|| ParseError::UnrecognizedDate(n.to_string()))
        }
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(secs) => timestamp_date(secs, &Local)
                .map(Some)
                .ok_or_else(|| ParseError::UnrecognizedDate(s.clone())),
            Err(_) => extract_date(s).map(Some),
        },
        Some(other) => Err(ParseError::UnrecognizedDate(other.to_string())),
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ParseError> {
    value.ok_or_else(|| ParseError::ShapeMismatch(field.to_string()))
}

pub(crate) fn account_summary(body: &str) -> Result<AccountSummary, ParseError> {
    let root = parse_object(body)?;
    let summary = match root.get("summary") {
        Some(Value::Object(summary)) => summary,
        _ => &root,
    };

    let num_checked_out = required(count(summary, "numCheckedOut")?, "summary.numCheckedOut")?;

    let total_fines = match first(summary, &["totalFines", "fines"]) {
        None => 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => {
            let cleaned = s.replace(['$', ','], "");
            cleaned.trim().parse::<f64>().map_err(|_| ParseError::InvalidValue {
                field: "totalFines",
                value: s.clone(),
            })?
        }
        Some(other) => {
            return Err(ParseError::InvalidValue {
                field: "totalFines",
                value: other.to_string(),
            })
        }
    };
    if total_fines < 0.0 {
        return Err(ParseError::InvalidValue {
            field: "totalFines",
            value: total_fines.to_string(),
        });
    }

    Ok(AccountSummary {
        num_checked_out,
        num_overdue: count(summary, "numOverdue")?.unwrap_or(0),
        num_holds: count(summary, "numHolds")?.unwrap_or(0),
        num_available_holds: count(summary, "numAvailableHolds")?.unwrap_or(0),
        total_fines,
        card_expiry: date(summary, &["expires", "expirationDate"])?,
        patron_name: text(summary, &["name", "displayName"]),
    })
}

/// The record array under one of `keys`, flattening Aspen's grouped
/// `{"available": [...], "unavailable": [...]}` form.
fn items<'a>(root: &'a Map<String, Value>, keys: &[&str]) -> Option<Vec<&'a Map<String, Value>>> {
    match first(root, keys)? {
        Value::Array(list) => Some(list.iter().filter_map(Value::as_object).collect()),
        Value::Object(groups) => Some(
            groups
                .values()
                .filter_map(Value::as_array)
                .flatten()
                .filter_map(Value::as_object)
                .collect(),
        ),
        _ => None,
    }
}

fn html_body(root: &Map<String, Value>) -> Option<&str> {
    match first(root, &["html", "body"])? {
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
}

fn each<T>(
    list: Vec<&Map<String, Value>>,
    kind: &str,
    extract: fn(&Map<String, Value>) -> Result<T, ParseError>,
) -> Vec<T> {
    list.into_iter()
        .enumerate()
        .filter_map(|(index, item)| match extract(item) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping malformed {} record {}: {}", kind, index, e);
                None
            }
        })
        .collect()
}

fn checkout_item(item: &Map<String, Value>) -> Result<Checkout, ParseError> {
    Ok(Checkout {
        item_id: required(text(item, &["id", "itemId", "recordId"]), "itemId")?,
        title: required(text(item, &["title"]), "title")?,
        author: text(item, &["author"]),
        due_date: required(date(item, &["dueDate", "due"])?, "dueDate")?,
        format: text(item, &["format"])
            .map(|f| Format::from_label(&f))
            .unwrap_or(Format::Other),
        renewable: flag(item, &["canRenew", "renewable"]).unwrap_or(true),
        times_renewed: count(item, "renewCount")?,
        cover_url: text(item, &["coverUrl"]),
    })
}

fn hold_item(item: &Map<String, Value>) -> Result<Hold, ParseError> {
    let status_text = text(item, &["status"]).unwrap_or_default();
    let status = HoldStatus::from_label(&status_text);
    let lowered = status_text.to_lowercase();
    let frozen = flag(item, &["frozen"]).unwrap_or(false)
        || lowered.contains("suspend")
        || lowered.contains("frozen");

    Ok(Hold {
        hold_id: required(text(item, &["id", "holdId", "cancelId"]), "holdId")?,
        title: required(text(item, &["title"]), "title")?,
        author: text(item, &["author"]),
        status,
        queue_position: match status {
            HoldStatus::Pending => count(item, "position")?,
            _ => None,
        },
        pickup_location: required(
            text(item, &["pickupLocationName", "pickupLocation", "currentPickupName"]),
            "pickupLocation",
        )?,
        ready_expiry: match status {
            HoldStatus::Ready => date(item, &["expirationDate", "expire"])?,
            _ => None,
        },
        format: text(item, &["format"]).map(|f| Format::from_label(&f)),
        frozen,
        cover_url: text(item, &["coverUrl"]),
    })
}

fn search_item(item: &Map<String, Value>) -> Result<SearchResult, ParseError> {
    Ok(SearchResult {
        record_id: required(text(item, &["id", "recordId", "groupedWorkId"]), "recordId")?,
        title: required(text(item, &["title", "title_display"]), "title")?,
        author: text(item, &["author", "author_display"]),
        format: text(item, &["format", "format_category"])
            .map(|f| Format::from_label(&f))
            .unwrap_or(Format::Other),
        availability: text(item, &["availability", "status"])
            .map(|a| Availability::from_label(&a))
            .unwrap_or(Availability::Unknown),
        publication_year: text(item, &["publicationDate", "publicationYear"])
            .and_then(|y| y.chars().filter(char::is_ascii_digit).take(4).collect::<String>().parse().ok()),
        cover_url: text(item, &["coverUrl", "image"]),
    })
}

pub(crate) fn checkouts(body: &str) -> Result<Vec<Checkout>, ParseError> {
    let root = parse_object(body)?;
    if let Some(list) = items(&root, &["checkouts", "items"]) {
        return Ok(each(list, "checkout", checkout_item));
    }
    match html_body(&root) {
        Some(html) => rows::collect_fragment(html, CHECKOUT_ROWS, "checkout", rows::checkout),
        None => Err(ParseError::ShapeMismatch("checkouts".to_string())),
    }
}

pub(crate) fn holds(body: &str) -> Result<Vec<Hold>, ParseError> {
    let root = parse_object(body)?;
    if let Some(list) = items(&root, &["holds", "items"]) {
        return Ok(each(list, "hold", hold_item));
    }
    match html_body(&root) {
        Some(html) => rows::collect_fragment(html, HOLD_ROWS, "hold", rows::hold),
        None => Err(ParseError::ShapeMismatch("holds".to_string())),
    }
}

pub(crate) fn search_results(body: &str) -> Result<Vec<SearchResult>, ParseError> {
    let root = parse_object(body)?;
    if let Some(list) = items(&root, &["records", "results"]) {
        return Ok(each(list, "search result", search_item));
    }
    match html_body(&root) {
        Some(html) => rows::collect_fragment(html, SEARCH_ROWS, "search result", rows::search_result),
        None => Err(ParseError::ShapeMismatch("searchResults".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_fines_as_string() {
        let summary = account_summary(
            r#"{"success": true, "summary": {"numCheckedOut": "2", "numHolds": 1, "totalFines": "$5.00", "expires": "Nov 1, 2027", "displayName": "Jordan"}}"#,
        )
        .unwrap();
        assert_eq!(summary.num_checked_out, 2);
        assert_eq!(summary.num_holds, 1);
        assert_eq!(summary.total_fines, 5.0);
        assert_eq!(summary.card_expiry, NaiveDate::from_ymd_opt(2027, 11, 1));
        assert_eq!(summary.patron_name.as_deref(), Some("Jordan"));
    }

    #[test]
    fn test_summary_rejects_negative_fines() {
        assert!(matches!(
            account_summary(r#"{"summary": {"numCheckedOut": 0, "totalFines": -3.5}}"#),
            Err(ParseError::InvalidValue { field: "totalFines", .. })
        ));
    }

    #[test]
    fn test_summary_requires_checkout_count() {
        assert_eq!(
            account_summary(r#"{"success": true, "summary": {}}"#),
            Err(ParseError::ShapeMismatch("summary.numCheckedOut".to_string()))
        );
    }

    #[test]
    fn test_checkout_timestamp_due_date() {
        let list = checkouts(
            r#"{"checkouts": [{"id": "i1", "title": "Dune", "dueDate": 1771156800, "format": "Book", "canRenew": false, "renewCount": 1}]}"#,
        )
        .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].due_date, NaiveDate::from_ymd_opt(2026, 2, 15).unwrap());
        assert!(!list[0].renewable);
        assert_eq!(list[0].times_renewed, Some(1));
    }

    #[test]
    fn test_timestamp_late_evening_stays_on_local_day() {
        // 2026-02-15 23:59:59 in US Central is already the 16th in UTC
        let central = chrono::FixedOffset::west_opt(6 * 3600).unwrap();
        assert_eq!(
            timestamp_date(1771221599, &central),
            NaiveDate::from_ymd_opt(2026, 2, 15)
        );
        assert_eq!(
            timestamp_date(1771221599, &chrono::Utc),
            NaiveDate::from_ymd_opt(2026, 2, 16)
        );
    }

    #[test]
    fn test_bad_item_is_skipped_not_fatal() {
        let list = checkouts(
            r#"{"checkouts": [
                {"id": "i1", "title": "Dune", "dueDate": "02/15/2026"},
                {"id": "i2", "title": "Emma", "dueDate": "someday"},
                {"id": "i3", "title": "Ulysses", "dueDate": "2026-03-01"}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<_> = list.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, ["i1", "i3"]);
    }

    #[test]
    fn test_grouped_holds_are_flattened() {
        let list = holds(
            r#"{"holds": {
                "available": [{"id": "h1", "title": "Dune", "status": "Available", "pickupLocationName": "Main", "expirationDate": "03/01/2026", "position": 4}],
                "unavailable": [{"id": "h2", "title": "Emma", "status": "Pending", "pickupLocationName": "Main", "position": 3, "expirationDate": "03/01/2026"}]
            }}"#,
        )
        .unwrap();
        assert_eq!(list.len(), 2);
        let ready = list.iter().find(|h| h.hold_id == "h1").unwrap();
        assert_eq!(ready.status, HoldStatus::Ready);
        assert_eq!(ready.queue_position, None);
        assert!(ready.ready_expiry.is_some());
        let pending = list.iter().find(|h| h.hold_id == "h2").unwrap();
        assert_eq!(pending.queue_position, Some(3));
        assert_eq!(pending.ready_expiry, None);
    }

    #[test]
    fn test_missing_records_is_shape_mismatch() {
        assert!(matches!(checkouts(r#"{"success": true}"#), Err(ParseError::ShapeMismatch(_))));
        assert!(matches!(holds("[]"), Err(ParseError::ShapeMismatch(_))));
    }
}
