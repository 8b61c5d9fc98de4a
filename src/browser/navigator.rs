//! The choke point for every page transition.
//!
//! The portal punishes reloading the page it is already showing, and its
//! anti-bot layer shuts down any second page opened in a session. The
//! navigator owns the only page handle and refuses to reload a URL that is
//! already loaded.

use super::page::PageDriver;
use crate::error::{AuthError, TransportError};
use serde_json::Value;
use std::time::{Duration, Instant};

const CLEARANCE_POLL: Duration = Duration::from_millis(500);

/// Path prefixes that are known to be blocked for a driven browser.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    blocked: Vec<&'static str>,
}

impl RoutePolicy {
    /// Policy for the rendered transport: the holds view never loads.
    pub fn rendered() -> Self {
        Self {
            blocked: vec!["/MyAccount/Holds"],
        }
    }

    /// No denylist, used by the short-lived login page of the HTTP transport.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        let path = reqwest::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        self.blocked
            .iter()
            .any(|prefix| path.to_lowercase().starts_with(&prefix.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NavState {
    Idle,
    Loaded { requested: String, actual: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeState {
    Clear,
    Challenged,
    Blocked(String),
}

/// Decide from title and markup whether an anti-bot interstitial is showing.
pub fn classify_challenge(title: &str, html: &str) -> ChallengeState {
    let title = title.to_lowercase();
    let html = html.to_lowercase();

    let blocked_markers = ["access denied", "you have been blocked", "error code: 1020", "sorry, you have been blocked"];
    if let Some(marker) = blocked_markers
        .iter()
        .find(|m| title.contains(*m) || html.contains(*m))
    {
        return ChallengeState::Blocked(marker.to_string());
    }

    let challenge_markers = [
        "cf-challenge-running",
        "challenge-running",
        "cf-browser-verification",
        "challenge-form",
        "checking your browser",
    ];
    if title.contains("just a moment")
        || title.contains("checking your browser")
        || challenge_markers.iter().any(|m| html.contains(m))
    {
        return ChallengeState::Challenged;
    }

    ChallengeState::Clear
}

#[derive(Debug, thiserror::Error)]
pub enum ClearanceError {
    #[error("Challenge still showing after {0:?}")]
    TimedOut(Duration),

    #[error("Blocked by anti-bot layer: {0}")]
    Blocked(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<ClearanceError> for AuthError {
    fn from(e: ClearanceError) -> Self {
        match e {
            ClearanceError::TimedOut(timeout) => AuthError::ChallengeTimeout(timeout),
            ClearanceError::Blocked(reason) => AuthError::Blocked(reason),
            ClearanceError::Transport(e) => AuthError::Transport(e),
        }
    }
}

impl From<ClearanceError> for TransportError {
    fn from(e: ClearanceError) -> Self {
        match e {
            ClearanceError::TimedOut(timeout) => {
                TransportError::Timeout(format!("anti-bot challenge did not clear within {:?}", timeout))
            }
            ClearanceError::Blocked(reason) => {
                TransportError::Navigation(format!("blocked by anti-bot layer: {}", reason))
            }
            ClearanceError::Transport(e) => e,
        }
    }
}

/// Drop the fragment and a trailing slash so equivalent URLs compare equal.
fn normalize(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    match without_fragment.split_once('?') {
        Some((path, query)) => format!("{}?{}", path.trim_end_matches('/'), query),
        None => without_fragment.trim_end_matches('/').to_string(),
    }
}

pub struct Navigator {
    page: Box<dyn PageDriver>,
    state: NavState,
    policy: RoutePolicy,
}

impl Navigator {
    pub fn new(page: Box<dyn PageDriver>, policy: RoutePolicy) -> Self {
        Self {
            page,
            state: NavState::Idle,
            policy,
        }
    }

    /// URL the page is showing, if anything was loaded through the navigator.
    pub fn current_url(&self) -> Option<&str> {
        match &self.state {
            NavState::Idle => None,
            NavState::Loaded { actual, .. } => Some(actual),
        }
    }

    fn is_showing(&self, url: &str) -> bool {
        match &self.state {
            NavState::Idle => false,
            NavState::Loaded { requested, actual } => {
                let target = normalize(url);
                normalize(requested) == target || normalize(actual) == target
            }
        }
    }

    /// Make `url` the loaded document and return its markup.
    ///
    /// Asking for the URL already loaded returns the current document without
    /// touching the network. Denylisted routes fail before any request.
    pub fn go_to(&mut self, url: &str) -> Result<String, TransportError> {
        if self.policy.is_blocked(url) {
            log::warn!("Refusing to navigate to blocked route {}", url);
            return Err(TransportError::RouteBlocked(url.to_string()));
        }

        if self.is_showing(url) {
            log::debug!("Already on {}, not reloading", url);
            return self.page.content();
        }

        log::info!("Navigating to {}", url);
        if let Err(e) = self.page.load(url) {
            // The page may have moved before failing
            self.state = NavState::Idle;
            return Err(e);
        }
        self.state = NavState::Loaded {
            requested: url.to_string(),
            actual: self.page.current_url(),
        };
        self.page.content()
    }

    /// Run page interactions that may navigate (form submits), then resync
    /// the tracked URL with wherever the page ended up.
    pub fn interact<T>(
        &mut self,
        f: impl FnOnce(&mut dyn PageDriver) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let result = f(self.page.as_mut());
        self.resync();
        result
    }

    fn resync(&mut self) {
        let now = self.page.current_url();
        let moved = match &self.state {
            NavState::Idle => !now.is_empty(),
            NavState::Loaded { actual, .. } => normalize(actual) != normalize(&now),
        };
        if moved {
            log::debug!("Page moved to {}", now);
            self.state = NavState::Loaded {
                requested: now.clone(),
                actual: now,
            };
        }
    }

    pub fn page(&self) -> &dyn PageDriver {
        self.page.as_ref()
    }

    pub fn evaluate(&mut self, expression: &str, await_promise: bool) -> Result<Value, TransportError> {
        self.page.evaluate(expression, await_promise)
    }

    pub fn content(&self) -> Result<String, TransportError> {
        self.page.content()
    }

    pub fn challenge_state(&self) -> Result<ChallengeState, TransportError> {
        let title = self.page.title()?;
        let html = self.page.content()?;
        Ok(classify_challenge(&title, &html))
    }

    /// Wait for an anti-bot interstitial to clear on its own.
    pub async fn await_clearance(&mut self, timeout: Duration) -> Result<(), ClearanceError> {
        let start = Instant::now();
        let mut announced = false;

        loop {
            match self.challenge_state()? {
                ChallengeState::Clear => {
                    if announced {
                        log::info!("Anti-bot challenge cleared after {:?}", start.elapsed());
                        self.resync();
                    }
                    return Ok(());
                }
                ChallengeState::Blocked(reason) => {
                    log::warn!("Anti-bot layer blocked the page: {}", reason);
                    return Err(ClearanceError::Blocked(reason));
                }
                ChallengeState::Challenged => {
                    if !announced {
                        log::info!("Anti-bot challenge detected, waiting up to {:?}", timeout);
                        announced = true;
                    }
                    if start.elapsed() >= timeout {
                        log::warn!("Anti-bot challenge did not clear within {:?}", timeout);
                        return Err(ClearanceError::TimedOut(timeout));
                    }
                }
            }
            tokio::time::sleep(CLEARANCE_POLL).await;
        }
    }
}
