//! Operation-level façade over session handling, transports and parsing.

use crate::auth::{Authenticator, LoginOptions};
use crate::browser::{BrowserConfig, BrowserTransport};
use crate::config::Config;
use crate::error::{ClientError, HoldError, ParseError, RenewError, TransportError};
use crate::http_client::HttpTransport;
use crate::models::{
    AccountSummary, Checkout, CheckoutFilter, Credential, Hold, HoldConfirmation, HoldFilter, HoldsListing, Mode,
    PickupLocation, RenewOutcome, SearchIndex, SearchResult,
};
use crate::parser::{self, PortalNotice};
use crate::session::SessionStore;
use crate::transport::{Endpoint, RawPayload, Transport};
use chrono::Local;
use serde_json::Value;
use std::time::Duration;

/// Query used to find any holdable record when listing pickup locations.
const PROBE_QUERY: &str = "test";

/// Opens the rendered transport used for browser-only endpoints in HTTP mode.
pub type RendererFactory = Box<dyn Fn() -> Result<Box<dyn Transport>, TransportError> + Send + Sync>;

/// A transport plus whether its session is installed.
struct Channel {
    transport: Box<dyn Transport>,
    ready: bool,
    force_login: bool,
}

impl Channel {
    fn new(transport: Box<dyn Transport>, force_login: bool) -> Self {
        Self {
            transport,
            ready: false,
            force_login,
        }
    }

    async fn ensure_session(
        &mut self,
        auth: &Authenticator,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        if self.ready {
            return Ok(());
        }
        let options = LoginOptions {
            interactive: self.force_login,
            timeout,
        };
        let artifact = auth
            .establish_session(credential, self.transport.as_mut(), &options)
            .await?;
        self.transport.install(&artifact)?;
        self.ready = true;
        self.force_login = false;
        Ok(())
    }

    /// Fetch with one re-login and one retry when the portal drops the session.
    async fn fetch(
        &mut self,
        auth: &Authenticator,
        credential: &Credential,
        timeout: Duration,
        endpoint: &Endpoint,
    ) -> Result<RawPayload, ClientError> {
        self.ensure_session(auth, credential, timeout).await?;

        match self.transport.fetch(endpoint).await {
            Err(TransportError::SessionExpired(url)) => {
                let mode = self.transport.mode();
                log::warn!(
                    "{} session expired during {} ({}), logging in again",
                    mode,
                    endpoint.name(),
                    url
                );
                auth.store().invalidate(mode)?;
                self.ready = false;
                self.ensure_session(auth, credential, timeout).await?;
                Ok(self.transport.fetch(endpoint).await?)
            }
            other => Ok(other?),
        }
    }
}

enum Renderer {
    /// The primary transport already renders pages.
    Shared,
    Deferred(RendererFactory),
    Open(Channel),
}

pub struct LibraryClient {
    credential: Credential,
    auth: Authenticator,
    login_timeout: Duration,
    relogin: bool,
    primary: Channel,
    renderer: Renderer,
}

impl LibraryClient {
    pub fn new(
        credential: Credential,
        auth: Authenticator,
        primary: Box<dyn Transport>,
        options: LoginOptions,
    ) -> Self {
        Self {
            credential,
            auth,
            login_timeout: options.timeout,
            relogin: options.interactive,
            primary: Channel::new(primary, options.interactive),
            renderer: Renderer::Shared,
        }
    }

    /// Supply the browser transport for search and holds when the primary is HTTP.
    pub fn with_renderer(mut self, factory: RendererFactory) -> Self {
        if self.primary.transport.mode() == Mode::Http {
            self.renderer = Renderer::Deferred(factory);
        }
        self
    }

    /// Build the client the configuration describes.
    ///
    /// The browser starts headed until a saved session for the configured
    /// mode exists, so the first login can get past a challenge a human has
    /// to solve.
    pub fn from_config(config: &Config, credential: Credential, relogin: bool) -> Result<Self, ClientError> {
        let store = SessionStore::from_config(&config.session);
        let browser = bootstrap_browser(&config.browser, config.mode, &store);

        let auth = Authenticator::new(store, &config.base_url);
        let options = LoginOptions {
            interactive: relogin,
            timeout: config.login_timeout(),
        };

        let client = match config.mode {
            Mode::Rendered => {
                let transport = BrowserTransport::launch(&config.base_url, &browser)?;
                Self::new(credential, auth, Box::new(transport), options)
            }
            Mode::Http => {
                let transport = HttpTransport::with_browser(&config.base_url, config.http.clone(), browser.clone());
                let base_url = config.base_url.clone();
                let factory: RendererFactory = Box::new(move || {
                    let transport = BrowserTransport::launch(&base_url, &browser)?;
                    Ok(Box::new(transport) as Box<dyn Transport>)
                });
                Self::new(credential, auth, Box::new(transport), options).with_renderer(factory)
            }
        };
        Ok(client)
    }

    pub fn mode(&self) -> Mode {
        self.primary.transport.mode()
    }

    async fn fetch(&mut self, endpoint: &Endpoint) -> Result<RawPayload, ClientError> {
        let needs_renderer = endpoint.requires_rendering() && self.mode() == Mode::Http;

        if needs_renderer {
            if let Renderer::Deferred(factory) = &self.renderer {
                log::info!("Opening browser for {}", endpoint.name());
                let transport = factory()?;
                self.renderer = Renderer::Open(Channel::new(transport, self.relogin));
            }
        }

        let Self {
            credential,
            auth,
            login_timeout,
            primary,
            renderer,
            ..
        } = self;

        let channel = match renderer {
            Renderer::Open(channel) if needs_renderer => channel,
            _ if needs_renderer => {
                return Err(TransportError::Unsupported {
                    endpoint: endpoint.name(),
                    mode: Mode::Http,
                }
                .into())
            }
            _ => primary,
        };
        channel.fetch(auth, credential, *login_timeout, endpoint).await
    }

    pub async fn get_status(&mut self) -> Result<AccountSummary, ClientError> {
        let payload = self.fetch(&Endpoint::AccountSummary).await?;
        let mut summary = parser::parse_account_summary(&payload.body, payload.mode)?;
        if let Some(name) = payload
            .hydrated
            .as_ref()
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
        {
            summary.patron_name = Some(name.to_string());
        }
        Ok(summary)
    }

    async fn all_checkouts(&mut self) -> Result<Vec<Checkout>, ClientError> {
        let payload = self.fetch(&Endpoint::Checkouts).await?;
        Ok(parser::parse_checkouts(&payload.body, payload.mode)?)
    }

    /// Checkouts, filtered against today's local date after parsing.
    pub async fn list_checkouts(&mut self, filter: &CheckoutFilter) -> Result<Vec<Checkout>, ClientError> {
        let checkouts = self.all_checkouts().await?;
        Ok(filter.apply(checkouts, Local::now().date_naive()))
    }

    /// Holds, telling a blocked holds route apart from an empty list.
    pub async fn holds_listing(&mut self) -> Result<HoldsListing, ClientError> {
        match self.fetch(&Endpoint::Holds).await {
            Ok(payload) => Ok(HoldsListing::Complete(parser::parse_holds(&payload.body, payload.mode)?)),
            Err(ClientError::Transport(TransportError::RouteBlocked(route))) => {
                log::warn!("Holds are not readable in {} mode ({}); use status for counts", self.mode(), route);
                Ok(HoldsListing::RouteBlocked)
            }
            Err(e) => Err(e),
        }
    }

    /// Holds after filtering. A blocked holds route yields an empty list.
    pub async fn list_holds(&mut self, filter: &HoldFilter) -> Result<Vec<Hold>, ClientError> {
        match self.holds_listing().await? {
            HoldsListing::Complete(holds) => Ok(filter.apply(holds)),
            HoldsListing::RouteBlocked => Ok(Vec::new()),
        }
    }

    pub async fn search(
        &mut self,
        query: &str,
        index: SearchIndex,
        limit: usize,
    ) -> Result<Vec<SearchResult>, ClientError> {
        let endpoint = Endpoint::Search {
            query: query.to_string(),
            index,
        };
        let payload = self.fetch(&endpoint).await?;
        Ok(parser::parse_search_results(&payload.body, payload.mode, limit)?)
    }

    /// Pickup branches offered on the hold form of any holdable record.
    pub async fn pickup_locations(&mut self) -> Result<Vec<PickupLocation>, ClientError> {
        let results = self
            .fetch(&Endpoint::Search {
                query: PROBE_QUERY.to_string(),
                index: SearchIndex::Keyword,
            })
            .await?;
        let record_id = parser::first_holdable_record(&results.body)?
            .ok_or_else(|| ParseError::ShapeMismatch("holdLink".to_string()))?;

        let form = self.fetch(&Endpoint::HoldForm { record_id }).await?;
        Ok(parser::parse_pickup_locations(&form.body)?)
    }

    /// Place a hold, choosing the pickup branch whose name contains `pickup`.
    pub async fn place_hold(
        &mut self,
        record_id: &str,
        pickup: Option<&str>,
    ) -> Result<HoldConfirmation, ClientError> {
        let form = self
            .fetch(&Endpoint::HoldForm {
                record_id: record_id.to_string(),
            })
            .await?;

        // Unholdable or already-held records show a notice instead of a form
        if let Some(PortalNotice::Failure(message)) = parser::portal_notice(&form.body)? {
            return Err(HoldError::from_message(&message).into());
        }

        let pickup_value = match pickup {
            Some(wanted) => {
                let needle = wanted.to_lowercase();
                let location = parser::parse_pickup_locations(&form.body)?
                    .into_iter()
                    .find(|l| l.name.to_lowercase().contains(&needle))
                    .ok_or_else(|| HoldError::InvalidLocation(wanted.to_string()))?;
                log::info!("Pickup at {} ({})", location.name, location.value);
                Some(location.value)
            }
            None => None,
        };

        let outcome = self
            .fetch(&Endpoint::SubmitHold {
                record_id: record_id.to_string(),
                pickup_value,
            })
            .await?;
        let confirmation = parser::parse_hold_outcome(&outcome.body, record_id)??;
        log::info!("Hold placed on {}", record_id);
        Ok(confirmation)
    }

    pub async fn renew(&mut self, item_id: &str) -> Result<RenewOutcome, ClientError> {
        let payload = self
            .fetch(&Endpoint::Renew {
                item_id: item_id.to_string(),
            })
            .await?;
        let notice = parser::parse_renewal(&payload.body)?;
        if !notice.success {
            return Err(RenewError::from_message(&notice.message).into());
        }
        Ok(RenewOutcome {
            item_id: item_id.to_string(),
            message: notice.message,
            new_due_date: notice.new_due_date,
        })
    }

    /// Renew every renewable checkout independently, one outcome per item.
    pub async fn renew_all(&mut self) -> Result<Vec<(String, Result<RenewOutcome, ClientError>)>, ClientError> {
        let checkouts = self.all_checkouts().await?;
        let mut outcomes = Vec::new();

        for checkout in checkouts.into_iter().filter(|c| c.renewable) {
            let result = self.renew(&checkout.item_id).await;
            match &result {
                Ok(outcome) => log::info!("Renewed {}: {}", checkout.item_id, outcome.message),
                Err(e) => log::warn!("Could not renew {}: {}", checkout.item_id, e),
            }
            outcomes.push((checkout.item_id, result));
        }
        Ok(outcomes)
    }
}

/// Headed until the configured mode has a session of its own on disk.
fn bootstrap_browser(config: &BrowserConfig, mode: Mode, store: &SessionStore) -> BrowserConfig {
    if config.headless && !store.exists(mode) {
        log::info!("No saved {} session yet, running the browser headed", mode);
        return config.headed();
    }
    config.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionArtifact, StoredCookie};
    use chrono::Utc;

    fn store_with(dir: &tempfile::TempDir, mode: Option<Mode>) -> SessionStore {
        let store = SessionStore::new(
            dir.path().join("state.json"),
            dir.path().join("browser_state.json"),
            Duration::from_secs(3600),
        );
        if let Some(mode) = mode {
            let cookie = StoredCookie {
                name: "aspen_session".to_string(),
                value: "abc123".to_string(),
                domain: "catalog.hmcpl.org".to_string(),
                path: "/".to_string(),
                expires: None,
                http_only: true,
                secure: true,
            };
            let artifact = SessionArtifact::from_capture(mode, vec![cookie], vec![], store.expiry_from(Utc::now()));
            store.save(&artifact).unwrap();
        }
        store
    }

    #[test]
    fn test_cookie_file_keeps_http_login_headless() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, Some(Mode::Http));
        assert!(bootstrap_browser(&BrowserConfig::default(), Mode::Http, &store).headless);
        // The rendered snapshot is a different artifact
        assert!(!bootstrap_browser(&BrowserConfig::default(), Mode::Rendered, &store).headless);
    }

    #[test]
    fn test_no_session_runs_headed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, None);
        assert!(!bootstrap_browser(&BrowserConfig::default(), Mode::Http, &store).headless);

        let store = store_with(&dir, Some(Mode::Rendered));
        assert!(bootstrap_browser(&BrowserConfig::default(), Mode::Rendered, &store).headless);
    }
}
