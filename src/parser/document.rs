//! Full documents read off the rendered page.

use super::rows::{self, CHECKOUT_ROWS, HOLD_ROWS, SEARCH_ROWS};
use super::{clean_text, css, extract_date, pattern};
use crate::error::ParseError;
use crate::models::{AccountSummary, Checkout, Hold, SearchResult};
use scraper::{ElementRef, Html};

const ACCOUNT_CONTENT: &str = "#main-content-with-sidebar, #main-content";
const SEARCH_CONTENT: &str = "#searchResultsContainer, #results-list, #main-content-with-sidebar, #main-content";
pub(crate) const PATRON_NAME: &str = "span.menu-bar-label, .displayNameLink, #displayNameLink";

fn anchor<'a>(document: &'a Html, selector: &str, field: &str) -> Result<ElementRef<'a>, ParseError> {
    document
        .select(&css(selector)?)
        .next()
        .ok_or_else(|| ParseError::ShapeMismatch(field.to_string()))
}

pub(crate) fn account_summary(html: &str) -> Result<AccountSummary, ParseError> {
    let document = Html::parse_document(html);
    let text = clean_text(document.root_element());

    let count = |label: &str| -> Result<Option<u32>, ParseError> {
        let re = pattern(&format!(r"(?i){}\s*:?\s*(\d+)", label))?;
        Ok(re.captures(&text).and_then(|c| c[1].parse().ok()))
    };

    let num_checked_out = count("checked out titles")?
        .ok_or_else(|| ParseError::ShapeMismatch("numCheckedOut".to_string()))?;

    let fines_re = pattern(r"(?i)\bfees?\b\s*:?\s*(-?)\$?\s*([\d,]+(?:\.\d+)?)")?;
    let total_fines = match fines_re.captures(&text) {
        Some(c) => {
            let raw = format!("{}{}", &c[1], c[2].replace(',', ""));
            let fines: f64 = raw.parse().map_err(|_| ParseError::InvalidValue {
                field: "totalFines",
                value: raw.clone(),
            })?;
            if fines < 0.0 {
                return Err(ParseError::InvalidValue { field: "totalFines", value: raw });
            }
            fines
        }
        None => 0.0,
    };

    let expiry_re = pattern(r"(?i)(?:expires?|expiration)(?:\s+date)?\s*(?:on)?\s*[:.]?\s*([A-Za-z]{3,9}\.? \d{1,2},?\s*\d{4}|\d{1,2}/\d{1,2}/\d{4})")?;
    let card_expiry = match expiry_re.captures(&text) {
        Some(c) => Some(extract_date(&c[1])?),
        None => None,
    };

    let patron_name = document
        .select(&css(PATRON_NAME)?)
        .map(clean_text)
        .find(|name| !name.is_empty());

    Ok(AccountSummary {
        num_checked_out,
        num_overdue: count("overdue")?.unwrap_or(0),
        num_holds: count("titles on hold")?.unwrap_or(0),
        num_available_holds: count("ready for pickup")?.unwrap_or(0),
        total_fines,
        card_expiry,
        patron_name,
    })
}

pub(crate) fn checkouts(html: &str) -> Result<Vec<Checkout>, ParseError> {
    let document = Html::parse_document(html);
    let scope = anchor(&document, ACCOUNT_CONTENT, "checkoutsContainer")?;
    rows::collect(scope, CHECKOUT_ROWS, "checkout", rows::checkout)
}

pub(crate) fn holds(html: &str) -> Result<Vec<Hold>, ParseError> {
    let document = Html::parse_document(html);
    let scope = anchor(&document, ACCOUNT_CONTENT, "holdsContainer")?;
    rows::collect(scope, HOLD_ROWS, "hold", rows::hold)
}

pub(crate) fn search_results(html: &str) -> Result<Vec<SearchResult>, ParseError> {
    let document = Html::parse_document(html);
    let scope = anchor(&document, SEARCH_CONTENT, "searchResults")?;
    rows::collect(scope, SEARCH_ROWS, "search result", rows::search_result)
}
