use super::config::BrowserConfig;
use super::navigator::{Navigator, RoutePolicy};
use super::page::{ChromePage, PageDriver};
use crate::error::TransportError;
use crate::models::Mode;
use crate::session::SessionArtifact;
use crate::transport::{check_artifact_mode, reports_logged_out, Endpoint, RawPayload, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

const HYDRATION_POLL: Duration = Duration::from_millis(250);

const PICKUP_SELECT: &str = "select#pickupBranch, select[name='pickupBranch']";
const HOLD_SUBMIT: &str = "input[type='submit'][value*='Hold'], button[type='submit'], .placeHold";

const PATRON_NAME_SCRIPT: &str = "(() => { \
    const el = document.querySelector('span.menu-bar-label, .displayNameLink, #displayNameLink'); \
    return el ? el.textContent.trim() : ''; })()";

/// Rendered-page strategy: every request is a page the single browser tab shows.
pub struct BrowserTransport {
    base_url: String,
    navigator: Navigator,
    installed: bool,
    challenge_timeout: Duration,
    hydration_timeout: Duration,
}

impl BrowserTransport {
    pub fn new(base_url: &str, page: Box<dyn PageDriver>, config: &BrowserConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            navigator: Navigator::new(page, RoutePolicy::rendered()),
            installed: false,
            challenge_timeout: config.navigation_timeout(),
            hydration_timeout: config.hydration_timeout(),
        }
    }

    /// Start Chrome and wrap its only tab.
    pub fn launch(base_url: &str, config: &BrowserConfig) -> Result<Self, TransportError> {
        let page = ChromePage::launch(config)?;
        Ok(Self::new(base_url, Box::new(page), config))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn endpoint_url(&self, endpoint: &Endpoint) -> String {
        match endpoint {
            Endpoint::AccountSummary => self.url("/MyAccount/Home"),
            Endpoint::Checkouts => self.url("/MyAccount/CheckedOut?source=all"),
            Endpoint::Holds => self.url("/MyAccount/Holds?source=all"),
            Endpoint::Search { query, index } => self.url(&format!(
                "/Search/Results?lookfor={}&searchIndex={}&view=list",
                urlencoding::encode(query),
                index.as_param()
            )),
            Endpoint::HoldForm { record_id } | Endpoint::SubmitHold { record_id, .. } => {
                self.url(&format!("/Record/{}/Hold", urlencoding::encode(record_id)))
            }
            Endpoint::Renew { .. } => self.url("/MyAccount/CheckedOut?source=all"),
        }
    }

    fn check_signed_in(&self) -> Result<(), TransportError> {
        let url = self.navigator.page().current_url();
        if url.contains("/MyAccount/Login") || self.navigator.page().exists("form #username")? {
            log::warn!("Portal showed the login form at {}", url);
            return Err(TransportError::SessionExpired(url));
        }
        Ok(())
    }

    /// Load through the navigator and wait out any interstitial.
    async fn open(&mut self, url: &str, account_page: bool) -> Result<String, TransportError> {
        self.navigator.go_to(url)?;
        self.navigator.await_clearance(self.challenge_timeout).await?;
        if account_page {
            self.check_signed_in()?;
        }
        self.navigator.content()
    }

    /// Poll for the script-populated patron name. Absent after the timeout is fine.
    async fn hydrated_patron_name(&mut self) -> Result<Option<Value>, TransportError> {
        let start = Instant::now();
        loop {
            let value = self.navigator.evaluate(PATRON_NAME_SCRIPT, false)?;
            if value.as_str().is_some_and(|name| !name.is_empty()) {
                return Ok(Some(value));
            }
            if start.elapsed() >= self.hydration_timeout {
                log::debug!("Patron name not hydrated within {:?}", self.hydration_timeout);
                return Ok(None);
            }
            tokio::time::sleep(HYDRATION_POLL).await;
        }
    }

    async fn renew_in_page(&mut self, item_id: &str) -> Result<String, TransportError> {
        // The fetch must run on a portal page so it carries the session cookies
        let on_portal = self
            .navigator
            .current_url()
            .is_some_and(|url| url.starts_with(&self.base_url));
        if !on_portal {
            let url = self.endpoint_url(&Endpoint::Checkouts);
            self.open(&url, true).await?;
        }

        let id = Value::String(item_id.to_string());
        let script = format!(
            "(async () => {{ \
                const body = new URLSearchParams({{ method: 'renewItem', itemId: {id}, itemBarcode: {id} }}); \
                const r = await fetch('/MyAccount/AJAX', {{ method: 'POST', body, credentials: 'same-origin', \
                    headers: {{ 'X-Requested-With': 'XMLHttpRequest' }} }}); \
                return await r.text(); }})()",
            id = id
        );
        match self.navigator.evaluate(&script, true)? {
            Value::String(body) => Ok(body),
            other => Err(TransportError::Browser(format!(
                "Renewal request returned {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Transport for BrowserTransport {
    fn mode(&self) -> Mode {
        Mode::Rendered
    }

    fn install(&mut self, artifact: &SessionArtifact) -> Result<(), TransportError> {
        check_artifact_mode(Mode::Rendered, artifact)?;
        if let SessionArtifact::Rendered(state) = artifact {
            self.navigator.interact(|page| page.restore(state))?;
        }
        self.installed = true;
        Ok(())
    }

    fn navigator(&mut self) -> Result<&mut Navigator, TransportError> {
        Ok(&mut self.navigator)
    }

    async fn fetch(&mut self, endpoint: &Endpoint) -> Result<RawPayload, TransportError> {
        if !self.installed {
            return Err(TransportError::NoSession(Mode::Rendered));
        }
        let url = self.endpoint_url(endpoint);

        match endpoint {
            Endpoint::AccountSummary => {
                self.open(&url, true).await?;
                let hydrated = self.hydrated_patron_name().await?;
                // Re-read so the body includes whatever hydration filled in
                let body = self.navigator.content()?;
                Ok(RawPayload {
                    mode: Mode::Rendered,
                    body,
                    hydrated,
                })
            }
            Endpoint::Search { .. } => {
                let body = self.open(&url, false).await?;
                Ok(RawPayload::new(Mode::Rendered, body))
            }
            Endpoint::Checkouts | Endpoint::Holds | Endpoint::HoldForm { .. } => {
                let body = self.open(&url, true).await?;
                Ok(RawPayload::new(Mode::Rendered, body))
            }
            Endpoint::SubmitHold { pickup_value, .. } => {
                // Normally the form is already showing from the HoldForm fetch
                self.open(&url, true).await?;
                if let Some(value) = pickup_value {
                    self.navigator
                        .interact(|page| page.select_option(PICKUP_SELECT, value))?;
                }
                log::info!("Submitting hold form at {}", url);
                self.navigator.interact(|page| page.submit(HOLD_SUBMIT))?;
                self.navigator.await_clearance(self.challenge_timeout).await?;
                self.check_signed_in()?;
                Ok(RawPayload::new(Mode::Rendered, self.navigator.content()?))
            }
            Endpoint::Renew { item_id } => {
                let body = self.renew_in_page(item_id).await?;
                if reports_logged_out(&body) {
                    return Err(TransportError::SessionExpired(self.url("/MyAccount/AJAX")));
                }
                Ok(RawPayload::new(Mode::Rendered, body))
            }
        }
    }
}
