use crate::models::Mode;

/// Failures while establishing an authenticated session.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Login rejected by portal: {0}")]
    InvalidCredentials(String),

    #[error("Anti-bot challenge did not clear within {0:?}")]
    ChallengeTimeout(std::time::Duration),

    #[error("Blocked by anti-bot layer: {0}")]
    Blocked(String),

    #[error("Unexpected page after login: {0}")]
    UnexpectedPage(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures issuing a request through either transport strategy.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The anti-bot layer refused a non-browser client. Switch modes, don't retry.
    #[error("Request fingerprinted and blocked ({status}) for {url}")]
    Fingerprinted { status: u16, url: String },

    #[error("Route is blocked in rendered mode: {0}")]
    RouteBlocked(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Session expired, portal redirected to {0}")]
    SessionExpired(String),

    #[error("{found} session artifact cannot drive the {expected} transport")]
    ArtifactMismatch { expected: Mode, found: Mode },

    #[error("No session installed on the {0} transport")]
    NoSession(Mode),

    #[error("{endpoint} is not served by the {mode} transport")]
    Unsupported { endpoint: &'static str, mode: Mode },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// Structural mismatches between a payload and the shape we extract from it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Expected structure not found: {0}")]
    ShapeMismatch(String),

    #[error("Unrecognized date format: {0:?}")]
    UnrecognizedDate(String),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Malformed JSON payload: {0}")]
    Json(String),

    #[error("Invalid selector or pattern {0:?}")]
    Pattern(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        ParseError::Json(e.to_string())
    }
}

/// Portal-side rejections when placing a hold.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HoldError {
    #[error("Title is already on hold")]
    AlreadyHeld,

    #[error("Item cannot be placed on hold: {0}")]
    ItemUnavailableForHold(String),

    #[error("Unknown pickup location: {0}")]
    InvalidLocation(String),

    #[error("Hold rejected: {0}")]
    Rejected(String),
}

impl HoldError {
    /// Classify the message the portal shows when a hold request fails.
    pub fn from_message(message: &str) -> Self {
        let text = message.to_lowercase();
        if text.contains("already") && (text.contains("hold") || text.contains("request")) {
            HoldError::AlreadyHeld
        } else if text.contains("pickup") || text.contains("location") {
            HoldError::InvalidLocation(message.trim().to_string())
        } else if text.contains("not available")
            || text.contains("not holdable")
            || text.contains("cannot be placed")
            || text.contains("not eligible")
            || text.contains("unable to place")
        {
            HoldError::ItemUnavailableForHold(message.trim().to_string())
        } else {
            HoldError::Rejected(message.trim().to_string())
        }
    }
}

/// Portal-side rejections when renewing a checkout.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenewError {
    #[error("Item has reached its renewal limit")]
    TooManyRenewals,

    #[error("Item is on hold for another patron")]
    HeldForAnotherPatron,

    #[error("Item is not renewable: {0}")]
    NotRenewable(String),

    #[error("Renewal rejected: {0}")]
    Rejected(String),
}

impl RenewError {
    /// Classify the message the portal returns for a failed renewal.
    pub fn from_message(message: &str) -> Self {
        let text = message.to_lowercase();
        if text.contains("too many")
            || text.contains("maximum")
            || text.contains("renewal limit")
            || text.contains("no more renewals")
        {
            RenewError::TooManyRenewals
        } else if text.contains("hold") || text.contains("requested by") || text.contains("reserved") {
            RenewError::HeldForAnotherPatron
        } else if text.contains("not renewable") || text.contains("cannot be renewed") {
            RenewError::NotRenewable(message.trim().to_string())
        } else {
            RenewError::Rejected(message.trim().to_string())
        }
    }
}

/// Session store I/O failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session file I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session file serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Umbrella error returned by the domain client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Hold(#[from] HoldError),

    #[error(transparent)]
    Renew(#[from] RenewError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
