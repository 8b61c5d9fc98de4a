//! Per-row extraction shared by full documents and AJAX HTML fragments.

use super::{clean_text, css, extract_date, pattern};
use crate::error::ParseError;
use crate::models::{Availability, Checkout, Format, Hold, HoldStatus, SearchResult};
use scraper::{ElementRef, Html};

pub(crate) const CHECKOUT_ROWS: &str = ".result, .listEntry, .ilsCheckoutEntry, .checkoutEntry";
pub(crate) const HOLD_ROWS: &str = ".result, .listEntry, .ilsHoldEntry, .holdEntry";
pub(crate) const SEARCH_ROWS: &str = ".resultsList";

const COVER: &str = "img[src*='bookcover'], img.use-original-covers, img.cover, img.bookcover";

/// `.result-label` / `.result-value` pairs of one row, labels lowercased.
struct Labels(Vec<(String, String)>);

impl Labels {
    fn of(row: ElementRef) -> Result<Self, ParseError> {
        let pairs = row
            .select(&css(".result-label")?)
            .filter_map(|label| {
                let value = label
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find(|e| e.value().classes().any(|c| c == "result-value"))?;
                Some((clean_text(label).to_lowercase(), clean_text(value)))
            })
            .collect();
        Ok(Labels(pairs))
    }

    /// Value of the first label containing any of `keys`.
    fn get(&self, keys: &[&str]) -> Option<&str> {
        self.0
            .iter()
            .find(|(label, _)| keys.iter().any(|k| label.contains(k)))
            .map(|(_, value)| value.as_str())
            .filter(|v| !v.is_empty())
    }
}

fn first_text(row: ElementRef, selector: &str) -> Result<Option<String>, ParseError> {
    Ok(row
        .select(&css(selector)?)
        .map(clean_text)
        .find(|text| !text.is_empty()))
}

fn first_attr(row: ElementRef, selector: &str, attr: &str) -> Result<Option<String>, ParseError> {
    Ok(row
        .select(&css(selector)?)
        .find_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

fn without_by(author: String) -> Option<String> {
    let trimmed = match author.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("by ") => author[3..].trim().to_string(),
        _ => author,
    };
    Some(trimmed).filter(|a| !a.is_empty())
}

fn first_number(text: &str) -> Result<Option<u32>, ParseError> {
    let re = pattern(r"\d+")?;
    Ok(re.find(text).and_then(|m| m.as_str().parse().ok()))
}

/// Row id from its own attributes, or from the selection checkbox Aspen renders.
fn row_id(row: ElementRef, data_attrs: &[&str]) -> Result<Option<String>, ParseError> {
    let el = row.value();
    for attr in data_attrs {
        if let Some(id) = el.attr(attr).map(str::trim).filter(|v| !v.is_empty()) {
            return Ok(Some(id.to_string()));
        }
    }
    if let Some(id) = el
        .attr("id")
        .filter(|id| !id.is_empty() && !id.starts_with("listEntry"))
    {
        return Ok(Some(id.to_string()));
    }

    let checkbox = row
        .select(&css("input[name*='selected'], input[type='checkbox']")?)
        .next();
    Ok(checkbox.and_then(|input| {
        let input = input.value();
        input
            .attr("value")
            .filter(|v| !v.is_empty() && *v != "on")
            .map(str::to_string)
            .or_else(|| {
                input
                    .attr("name")
                    .and_then(|name| name.rsplit('|').next())
                    .map(|id| id.trim_end_matches(']').trim_start_matches("selected[").to_string())
            })
            .filter(|v| !v.is_empty())
    }))
}

fn required(value: Option<String>, field: &str) -> Result<String, ParseError> {
    value.ok_or_else(|| ParseError::ShapeMismatch(field.to_string()))
}

pub(crate) fn checkout(row: ElementRef) -> Result<Checkout, ParseError> {
    let labels = Labels::of(row)?;

    let item_id = required(row_id(row, &["data-id", "data-recordid"])?, "itemId")?;
    let title = required(
        first_text(row, ".result-title, a.result-title, .title a, .title")?,
        "title",
    )?;

    let author = match labels.get(&["author"]) {
        Some(author) => Some(author.to_string()),
        None => first_text(row, ".result-author, .author, .by")?,
    }
    .and_then(without_by);

    let due_text = match labels.get(&["due"]) {
        Some(text) => Some(text.to_string()),
        None => match first_attr(row, "[data-due]", "data-due")? {
            Some(due) => Some(due),
            None => first_text(row, ".dueDate, .due-date")?,
        },
    };
    let due_date = extract_date(&required(due_text, "dueDate")?)?;

    let format = match labels.get(&["format"]) {
        Some(label) => Format::from_label(label),
        None => first_text(row, ".format, .itemType, .material-type, .manifestation-format")?
            .map(|label| Format::from_label(&label))
            .unwrap_or(Format::Other),
    };

    let renew_control = row
        .select(&css("button.renewButton, a.renewButton, .renewOption, button.renew, input.renew")?)
        .next();
    let control_disabled = renew_control.is_some_and(|el| {
        el.value().attr("disabled").is_some() || el.value().classes().any(|c| c == "disabled")
    });
    let refused = row.select(&css(".noRenew, .cannot-renew")?).next().is_some();

    let times_renewed = match labels.get(&["renewed", "renewals"]) {
        Some(text) => first_number(text)?,
        None => None,
    };

    Ok(Checkout {
        item_id,
        title,
        author,
        due_date,
        format,
        renewable: !control_disabled && !refused,
        times_renewed,
        cover_url: first_attr(row, COVER, "src")?,
    })
}

pub(crate) fn hold(row: ElementRef) -> Result<Hold, ParseError> {
    let labels = Labels::of(row)?;

    let hold_id = required(row_id(row, &["data-id", "data-holdid"])?, "holdId")?;
    let title = required(
        first_text(row, ".result-title, a.result-title, .title a, .title")?,
        "title",
    )?;
    let author = match labels.get(&["author"]) {
        Some(author) => Some(author.to_string()),
        None => first_text(row, ".result-author, .author, .by")?,
    }
    .and_then(without_by);

    let status_text = match labels.get(&["status"]) {
        Some(text) => text.to_string(),
        None => first_text(row, ".holdStatus, .hold-status, .status")?.unwrap_or_default(),
    };
    let status = HoldStatus::from_label(&status_text);
    let lowered = status_text.to_lowercase();
    let frozen = lowered.contains("suspend")
        || lowered.contains("frozen")
        || row
            .select(&css(".frozen, .suspended, input[name*='freeze'][checked]")?)
            .next()
            .is_some();

    let pickup_location = match first_text(row, ".pickupLocation, .pickup, .location")? {
        Some(location) => Some(location),
        None => labels.get(&["pickup", "location"]).map(str::to_string),
    };
    let pickup_location = required(pickup_location, "pickupLocation")?;

    let queue_position = if status == HoldStatus::Pending {
        match labels.get(&["position", "queue"]) {
            Some(text) => first_number(text)?,
            None => match first_text(row, ".holdPosition, .position, .queue")? {
                Some(text) => first_number(&text)?,
                None => None,
            },
        }
    } else {
        None
    };

    let ready_expiry = if status == HoldStatus::Ready {
        let text = match first_text(row, ".expirationDate, .expires, .expiration")? {
            Some(text) => Some(text),
            None => labels.get(&["expire", "pickup by"]).map(str::to_string),
        };
        match text {
            Some(text) => Some(extract_date(&text)?),
            None => None,
        }
    } else {
        None
    };

    let format = match labels.get(&["format"]) {
        Some(label) => Some(Format::from_label(label)),
        None => first_text(row, ".format, .itemType, .manifestation-format")?.map(|l| Format::from_label(&l)),
    };

    Ok(Hold {
        hold_id,
        title,
        author,
        status,
        queue_position,
        pickup_location,
        ready_expiry,
        format,
        frozen,
        cover_url: first_attr(row, COVER, "src")?,
    })
}

pub(crate) fn search_result(row: ElementRef) -> Result<SearchResult, ParseError> {
    let labels = Labels::of(row)?;

    let mut record_id = row
        .value()
        .attr("id")
        .and_then(|id| id.strip_prefix("groupedRecord"))
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    if record_id.is_none() {
        let link_re = pattern(r"/(?:GroupedWork|Record|Hoopla|OverDrive)/([^/?#]+)")?;
        record_id = row
            .select(&css(
                "a.result-title, a[href*='/GroupedWork/'], a[href*='/Record/'], a[href*='/Hoopla/'], a[href*='/OverDrive/']",
            )?)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| link_re.captures(href).map(|c| c[1].to_string()));
    }
    let record_id = required(record_id, "recordId")?;
    let title = required(first_text(row, ".result-title, a.result-title")?, "title")?;

    let author = match labels.get(&["author"]) {
        Some(author) => Some(author.to_string()),
        None => first_text(row, ".result-author, .author a")?,
    }
    .and_then(without_by);

    let show_edition = pattern(r"Show Edition.*")?;
    let format = first_text(row, ".manifestation-format, .formatCategory, .format-category")?
        .map(|label| show_edition.replace(&label, "").trim().to_string())
        .filter(|label| !label.is_empty())
        .map(|label| Format::from_label(&label))
        .unwrap_or(Format::Other);

    let year_re = pattern(r"\b(\d{4})\b")?;
    let publication_year = labels
        .get(&["publication", "pub", "year"])
        .and_then(|text| year_re.captures(text))
        .and_then(|c| c[1].parse().ok());

    let availability = first_text(
        row,
        ".related-manifestation-shelf-status, .status-available, .availability",
    )?
    .map(|label| Availability::from_label(&label))
    .unwrap_or(Availability::Unknown);

    Ok(SearchResult {
        record_id,
        title,
        author,
        format,
        availability,
        publication_year,
        cover_url: first_attr(row, COVER, "src")?,
    })
}

/// Apply `extract` to every row under `scope`, skipping rows that fail.
pub(crate) fn collect<T>(
    scope: ElementRef,
    row_selector: &str,
    kind: &str,
    extract: fn(ElementRef) -> Result<T, ParseError>,
) -> Result<Vec<T>, ParseError> {
    let selector = css(row_selector)?;
    let mut records = Vec::new();
    for (index, row) in scope.select(&selector).enumerate() {
        // Nested matches (".result" inside ".listEntry") are handled by the outer row
        if row
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take_while(|a| a.id() != scope.id())
            .any(|a| selector.matches(&a))
        {
            continue;
        }
        match extract(row) {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("Skipping malformed {} row {}: {}", kind, index, e),
        }
    }
    Ok(records)
}

/// Rows of an AJAX HTML fragment, which has no page chrome to anchor on.
pub(crate) fn collect_fragment<T>(
    html: &str,
    row_selector: &str,
    kind: &str,
    extract: fn(ElementRef) -> Result<T, ParseError>,
) -> Result<Vec<T>, ParseError> {
    let fragment = Html::parse_fragment(html);
    collect(fragment.root_element(), row_selector, kind, extract)
}
