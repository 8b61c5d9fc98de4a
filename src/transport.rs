//! The seam between the domain client and the two ways of talking to the portal.

use crate::browser::Navigator;
use crate::error::TransportError;
use crate::models::{Mode, SearchIndex};
use crate::session::SessionArtifact;
use async_trait::async_trait;
use serde_json::Value;

/// A logical portal request, independent of how it is issued.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    AccountSummary,
    Checkouts,
    Holds,
    Search { query: String, index: SearchIndex },
    HoldForm { record_id: String },
    SubmitHold { record_id: String, pickup_value: Option<String> },
    Renew { item_id: String },
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::AccountSummary => "account summary",
            Endpoint::Checkouts => "checkouts",
            Endpoint::Holds => "holds",
            Endpoint::Search { .. } => "search",
            Endpoint::HoldForm { .. } => "hold form",
            Endpoint::SubmitHold { .. } => "place hold",
            Endpoint::Renew { .. } => "renew",
        }
    }

    /// Served only by a real browser, whatever the process mode.
    pub fn requires_rendering(&self) -> bool {
        matches!(
            self,
            Endpoint::Search { .. } | Endpoint::HoldForm { .. } | Endpoint::SubmitHold { .. }
        )
    }
}

/// What a transport hands back to the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    /// Shape of `body`, which decides how it is parsed.
    pub mode: Mode,
    pub body: String,
    /// Values read by script after the page finished hydrating.
    pub hydrated: Option<Value>,
}

impl RawPayload {
    pub fn new(mode: Mode, body: String) -> Self {
        Self {
            mode,
            body,
            hydrated: None,
        }
    }
}

#[async_trait]
pub trait Transport: Send {
    fn mode(&self) -> Mode;

    /// Load a session artifact. Artifacts of the other mode are rejected.
    fn install(&mut self, artifact: &SessionArtifact) -> Result<(), TransportError>;

    /// Page used to run the login flow.
    fn navigator(&mut self) -> Result<&mut Navigator, TransportError>;

    /// Called once login is done with the navigator.
    fn release_navigator(&mut self) {}

    async fn fetch(&mut self, endpoint: &Endpoint) -> Result<RawPayload, TransportError>;
}

/// AJAX responses that refuse the request because nobody is logged in.
pub(crate) fn reports_logged_out(body: &str) -> bool {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    if map.get("success").and_then(Value::as_bool) != Some(false) {
        return false;
    }
    let message = map
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    ["log in", "login", "sign in", "logged in", "session has expired"]
        .iter()
        .any(|m| message.contains(m))
}

pub(crate) fn check_artifact_mode(expected: Mode, artifact: &SessionArtifact) -> Result<(), TransportError> {
    if artifact.mode() == expected {
        Ok(())
    } else {
        Err(TransportError::ArtifactMismatch {
            expected,
            found: artifact.mode(),
        })
    }
}
