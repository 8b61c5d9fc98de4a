use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode, chosen once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Direct authenticated calls to the portal's AJAX endpoints
    Http,
    /// A single real browser page, read after rendering
    Rendered,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Http => write!(f, "http"),
            Mode::Rendered => write!(f, "rendered"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(Mode::Http),
            "rendered" | "browser" | "headless" => Ok(Mode::Rendered),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Library card barcode and PIN. Never persisted.
#[derive(Clone)]
pub struct Credential {
    pub identifier: String,
    pub secret: String,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &self.identifier)
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub num_checked_out: u32,
    pub num_overdue: u32,
    pub num_holds: u32,
    pub num_available_holds: u32,
    pub total_fines: f64,
    pub card_expiry: Option<NaiveDate>,
    /// Hydrated by client-side script, so often absent from static markup.
    pub patron_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Book,
    Ebook,
    Audiobook,
    Other,
}

impl Format {
    /// Map the portal's free-text format label onto a format.
    pub fn from_label(label: &str) -> Self {
        let text = label.to_lowercase();
        if text.contains("audio") || text.contains("book on cd") {
            Format::Audiobook
        } else if text.contains("ebook") || text.contains("e-book") || text.contains("kindle") {
            Format::Ebook
        } else if text.contains("book")
            || text.contains("large print")
            || text.contains("paperback")
            || text.contains("hardcover")
        {
            Format::Book
        } else {
            Format::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkout {
    pub item_id: String,
    pub title: String,
    pub author: Option<String>,
    pub due_date: NaiveDate,
    pub format: Format,
    pub renewable: bool,
    pub times_renewed: Option<u32>,
    pub cover_url: Option<String>,
}

impl Checkout {
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.due_date < today
    }

    /// Due today or within the next `within_days` days.
    pub fn is_due_soon(&self, within_days: u32, today: NaiveDate) -> bool {
        let days_left = (self.due_date - today).num_days();
        (0..=i64::from(within_days)).contains(&days_left)
    }
}

/// Post-parse filters for `list_checkouts`.
#[derive(Debug, Clone, Default)]
pub struct CheckoutFilter {
    pub due_soon_days: Option<u32>,
    pub overdue_only: bool,
}

impl CheckoutFilter {
    pub fn apply(&self, checkouts: Vec<Checkout>, today: NaiveDate) -> Vec<Checkout> {
        checkouts
            .into_iter()
            .filter(|c| match self.due_soon_days {
                Some(days) => c.is_due_soon(days, today),
                None => true,
            })
            .filter(|c| !self.overdue_only || c.is_overdue(today))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HoldStatus {
    Pending,
    InTransit,
    Ready,
}

impl HoldStatus {
    pub fn from_label(label: &str) -> Self {
        let text = label.to_lowercase();
        if text.contains("transit") {
            HoldStatus::InTransit
        } else if (text.contains("available") && !text.contains("unavailable"))
            || text.contains("ready")
        {
            HoldStatus::Ready
        } else {
            HoldStatus::Pending
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    pub hold_id: String,
    pub title: String,
    pub author: Option<String>,
    pub status: HoldStatus,
    /// Only present while pending.
    pub queue_position: Option<u32>,
    pub pickup_location: String,
    /// Only present once ready for pickup.
    pub ready_expiry: Option<NaiveDate>,
    pub format: Option<Format>,
    pub frozen: bool,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HoldFilter {
    pub ready_only: bool,
    pub pending_only: bool,
}

impl HoldFilter {
    pub fn apply(&self, holds: Vec<Hold>) -> Vec<Hold> {
        holds
            .into_iter()
            .filter(|h| !self.ready_only || h.status == HoldStatus::Ready)
            .filter(|h| !self.pending_only || h.status == HoldStatus::Pending)
            .collect()
    }
}

/// Holds as seen by the client, keeping a blocked route distinct from an empty list.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldsListing {
    Complete(Vec<Hold>),
    RouteBlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable,
    Unknown,
}

impl Availability {
    pub fn from_label(label: &str) -> Self {
        let text = label.to_lowercase();
        if text.contains("unavailable")
            || text.contains("not available")
            || text.contains("checked out")
            || text.contains("on order")
            || text.contains("on hold")
        {
            Availability::Unavailable
        } else if text.contains("available") || text.contains("on shelf") {
            Availability::Available
        } else {
            Availability::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub record_id: String,
    pub title: String,
    pub author: Option<String>,
    pub format: Format,
    pub availability: Availability,
    pub publication_year: Option<u16>,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchIndex {
    #[default]
    Keyword,
    Title,
    Author,
    Subject,
    Series,
}

impl SearchIndex {
    /// Value of the catalog's `searchIndex` query parameter.
    pub fn as_param(&self) -> &'static str {
        match self {
            SearchIndex::Keyword => "Keyword",
            SearchIndex::Title => "Title",
            SearchIndex::Author => "Author",
            SearchIndex::Subject => "Subject",
            SearchIndex::Series => "Series",
        }
    }
}

impl std::str::FromStr for SearchIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" => Ok(SearchIndex::Keyword),
            "title" => Ok(SearchIndex::Title),
            "author" => Ok(SearchIndex::Author),
            "subject" => Ok(SearchIndex::Subject),
            "series" => Ok(SearchIndex::Series),
            other => Err(format!("unknown search index: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupLocation {
    pub value: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldConfirmation {
    pub record_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewOutcome {
    pub item_id: String,
    pub message: String,
    pub new_due_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout_due(due: NaiveDate) -> Checkout {
        Checkout {
            item_id: "1".to_string(),
            title: "Dune".to_string(),
            author: None,
            due_date: due,
            format: Format::Book,
            renewable: true,
            times_renewed: None,
            cover_url: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_due_today_is_not_overdue_but_due_soon() {
        let today = date(2026, 2, 15);
        let c = checkout_due(today);
        assert!(!c.is_overdue(today));
        assert!(c.is_due_soon(0, today));
        assert!(c.is_due_soon(7, today));
    }

    #[test]
    fn test_overdue_and_due_soon_over_a_range() {
        let today = date(2026, 2, 15);
        for offset in -10i64..=10 {
            let due = today + chrono::Duration::days(offset);
            let c = checkout_due(due);
            assert_eq!(c.is_overdue(today), due < today, "offset {}", offset);
            for n in 0..5u32 {
                assert_eq!(
                    c.is_due_soon(n, today),
                    offset >= 0 && offset <= i64::from(n),
                    "offset {} within {}",
                    offset,
                    n
                );
            }
        }
    }

    #[test]
    fn test_checkout_filter() {
        let today = date(2026, 2, 15);
        let items = vec![
            checkout_due(date(2026, 2, 10)),
            checkout_due(date(2026, 2, 16)),
            checkout_due(date(2026, 3, 30)),
        ];

        let soon = CheckoutFilter { due_soon_days: Some(3), overdue_only: false }.apply(items.clone(), today);
        assert_eq!(soon.len(), 1);
        assert_eq!(soon[0].due_date, date(2026, 2, 16));

        let overdue = CheckoutFilter { due_soon_days: None, overdue_only: true }.apply(items.clone(), today);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].due_date, date(2026, 2, 10));

        assert_eq!(CheckoutFilter::default().apply(items, today).len(), 3);
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(Format::from_label("eAudiobook"), Format::Audiobook);
        assert_eq!(Format::from_label("Book on CD"), Format::Audiobook);
        assert_eq!(Format::from_label("eBook"), Format::Ebook);
        assert_eq!(Format::from_label("Large Print Book"), Format::Book);
        assert_eq!(Format::from_label("DVD"), Format::Other);

        assert_eq!(HoldStatus::from_label("Ready for Pickup"), HoldStatus::Ready);
        assert_eq!(HoldStatus::from_label("In Transit"), HoldStatus::InTransit);
        assert_eq!(HoldStatus::from_label("Pending"), HoldStatus::Pending);

        assert_eq!(Availability::from_label("Available Now"), Availability::Available);
        assert_eq!(Availability::from_label("Checked Out"), Availability::Unavailable);
        assert_eq!(Availability::from_label(""), Availability::Unknown);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("http".parse::<Mode>().unwrap(), Mode::Http);
        assert_eq!("Rendered".parse::<Mode>().unwrap(), Mode::Rendered);
        assert!("ftp".parse::<Mode>().is_err());
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let credential = Credential::new("21234000123456", "1234");
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("1234\""));
        assert!(printed.contains("***"));
    }
}
