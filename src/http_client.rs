//! HTTP strategy: direct AJAX calls carrying the session cookies.
//!
//! Cheap and fast, but the anti-bot layer can refuse non-browser TLS
//! fingerprints outright. That shows up as [`TransportError::Fingerprinted`]
//! and means "switch to rendered mode", never "retry".

use crate::browser::{BrowserConfig, ChromePage, Navigator, PageDriver, RoutePolicy};
use crate::error::TransportError;
use crate::models::Mode;
use crate::session::SessionArtifact;
use crate::transport::{check_artifact_mode, reports_logged_out, Endpoint, RawPayload, Transport};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, ClientBuilder, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Configuration for the direct HTTP client
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub enable_gzip: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            enable_gzip: true,
        }
    }
}

impl HttpClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Opens the short-lived browser page the login flow runs on.
pub type PageLauncher = Box<dyn Fn() -> Result<Box<dyn PageDriver>, TransportError> + Send + Sync>;

/// Statuses the anti-bot layer answers with when it rejects a client.
fn is_block_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 403 | 429 | 503)
}

/// Whether a response is the anti-bot layer refusing this client.
pub(crate) fn is_fingerprint_block(status: StatusCode, headers: &HeaderMap, body: &str) -> bool {
    if !is_block_status(status) {
        return false;
    }
    let from_cloudflare = headers.contains_key("cf-mitigated")
        || headers
            .get("server")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|s| s.to_lowercase().contains("cloudflare"));
    let body = body.to_lowercase();
    from_cloudflare
        || body.contains("cf-chl")
        || body.contains("just a moment")
        || body.contains("attention required")
}

pub struct HttpTransport {
    base_url: String,
    config: HttpClientConfig,
    client: Option<Client>,
    launcher: PageLauncher,
    login_page: Option<Navigator>,
}

impl HttpTransport {
    pub fn new(base_url: &str, config: HttpClientConfig, launcher: PageLauncher) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
            client: None,
            launcher,
            login_page: None,
        }
    }

    /// Transport whose login runs in a Chrome launched from `browser`.
    pub fn with_browser(base_url: &str, config: HttpClientConfig, browser: BrowserConfig) -> Self {
        let launcher: PageLauncher = Box::new(move || {
            let page = ChromePage::launch(&browser)?;
            Ok(Box::new(page) as Box<dyn PageDriver>)
        });
        Self::new(base_url, config, launcher)
    }

    fn build_client(&self, jar: Arc<Jar>) -> Result<Client, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, text/html, */*; q=0.01"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert("DNT", HeaderValue::from_static("1"));

        ClientBuilder::new()
            .timeout(self.config.timeout())
            .user_agent(self.config.user_agent.as_str())
            .cookie_provider(jar)
            .gzip(self.config.enable_gzip)
            .brotli(self.config.enable_gzip)
            .default_headers(headers)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(TransportError::from)
    }

    fn client(&self) -> Result<&Client, TransportError> {
        self.client.as_ref().ok_or(TransportError::NoSession(Mode::Http))
    }

    fn ajax_url(&self) -> String {
        format!("{}/MyAccount/AJAX", self.base_url)
    }

    fn request(&self, endpoint: &Endpoint) -> Result<RequestBuilder, TransportError> {
        let client = self.client()?;
        let url = self.ajax_url();
        let request = match endpoint {
            Endpoint::AccountSummary => client.get(&url).query(&[("method", "getMenuDataIls")]),
            Endpoint::Checkouts => client
                .get(&url)
                .query(&[("method", "getCheckouts"), ("source", "all")]),
            Endpoint::Holds => client
                .get(&url)
                .query(&[("method", "getHolds"), ("source", "all")]),
            Endpoint::Renew { item_id } => client.post(&url).form(&[
                ("method", "renewItem"),
                ("itemId", item_id.as_str()),
                ("itemBarcode", item_id.as_str()),
            ]),
            Endpoint::Search { .. } | Endpoint::HoldForm { .. } | Endpoint::SubmitHold { .. } => {
                return Err(TransportError::Unsupported {
                    endpoint: endpoint.name(),
                    mode: Mode::Http,
                })
            }
        };
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<String, TransportError> {
        let response = request.send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if is_fingerprint_block(status, &headers, &body) {
            log::warn!("{} request fingerprinted and blocked ({})", what, status);
            return Err(TransportError::Fingerprinted {
                status: status.as_u16(),
                url: final_url,
            });
        }
        if final_url.contains("/MyAccount/Login") || reports_logged_out(&body) {
            log::warn!("{} request bounced to login", what);
            return Err(TransportError::SessionExpired(final_url));
        }
        if !status.is_success() {
            return Err(TransportError::Network(format!(
                "{} returned {} for {}",
                what, status, final_url
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn mode(&self) -> Mode {
        Mode::Http
    }

    fn install(&mut self, artifact: &SessionArtifact) -> Result<(), TransportError> {
        check_artifact_mode(Mode::Http, artifact)?;
        let SessionArtifact::Http(set) = artifact else {
            return Ok(());
        };

        let origin = Url::parse(&self.base_url)
            .map_err(|e| TransportError::Network(format!("Invalid base URL {}: {}", self.base_url, e)))?;
        let jar = Arc::new(Jar::default());
        for (name, value) in &set.cookies {
            jar.add_cookie_str(&format!("{}={}; Path=/", name, value), &origin);
        }
        self.client = Some(self.build_client(jar)?);
        log::debug!("Installed {} cookies into the HTTP client", set.cookies.len());
        Ok(())
    }

    fn navigator(&mut self) -> Result<&mut Navigator, TransportError> {
        if self.login_page.is_none() {
            let page = (self.launcher)()?;
            self.login_page = Some(Navigator::new(page, RoutePolicy::permissive()));
        }
        self.login_page
            .as_mut()
            .ok_or_else(|| TransportError::Browser("login page unavailable".to_string()))
    }

    fn release_navigator(&mut self) {
        if self.login_page.take().is_some() {
            log::debug!("Closed login browser");
        }
    }

    async fn fetch(&mut self, endpoint: &Endpoint) -> Result<RawPayload, TransportError> {
        let request = self.request(endpoint)?;
        let body = self.send(request, endpoint.name()).await?;
        Ok(RawPayload::new(Mode::Http, body))
    }
}
