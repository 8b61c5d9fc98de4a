//! Shared fakes for the integration tests: a scripted page and a scripted transport.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use hmcpl_scraper::browser::{Navigator, PageDriver, RoutePolicy};
use hmcpl_scraper::session::{BrowserState, StorageOrigin, StoredCookie};
use hmcpl_scraper::{
    Authenticator, Credential, Endpoint, LoginOptions, Mode, RawPayload, SessionArtifact, SessionStore,
    Transport, TransportError,
};
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const BASE_URL: &str = "https://catalog.hmcpl.org";

pub const SIGNED_IN_HOME: &str = r#"<html><head><title>My Account</title></head><body>
    <a href="/MyAccount/Logout" id="logoutLink">Sign Out</a>
    <div id="main-content">Checked Out Titles 0</div></body></html>"#;

pub const LOGIN_FORM: &str = r#"<html><head><title>Login to Your Account</title></head><body>
    <div id="main-content"><form id="loginForm">
      <input id="username" name="username"><input id="password" name="password" type="password">
      <input id="rememberMe" type="checkbox"><button id="loginFormSubmit" type="submit">Sign In</button>
    </form></div></body></html>"#;

pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("missing fixture {}: {}", path, e))
}

pub fn credential() -> Credential {
    Credential::new("21234000123456", "4321")
}

pub fn store(dir: &TempDir) -> SessionStore {
    SessionStore::new(
        dir.path().join("state.json"),
        dir.path().join("browser_state.json"),
        Duration::from_secs(3600),
    )
}

pub fn session_cookie() -> StoredCookie {
    StoredCookie {
        name: "aspen_session".to_string(),
        value: "abc123".to_string(),
        domain: "catalog.hmcpl.org".to_string(),
        path: "/".to_string(),
        expires: None,
        http_only: true,
        secure: true,
    }
}

/// Save a valid artifact for `mode` so no login is needed.
pub fn seed_session(store: &SessionStore, mode: Mode) -> SessionArtifact {
    let artifact =
        SessionArtifact::from_capture(mode, vec![session_cookie()], vec![], store.expiry_from(Utc::now()));
    store.save(&artifact).unwrap();
    artifact
}

pub fn options() -> LoginOptions {
    LoginOptions {
        interactive: false,
        timeout: Duration::from_secs(2),
    }
}

pub fn authenticator(store: SessionStore) -> Authenticator {
    Authenticator::new(store, BASE_URL)
}

/// What a [`FakePage`] was asked to do.
#[derive(Default)]
pub struct PageLog {
    pub loads: Mutex<Vec<String>>,
    pub filled: Mutex<Vec<(String, String)>>,
    pub submits: AtomicUsize,
    pub restores: AtomicUsize,
}

impl PageLog {
    pub fn load_count(&self) -> usize {
        self.loads.lock().unwrap().len()
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }
}

/// In-memory page serving markup by URL substring.
pub struct FakePage {
    url: String,
    pages: Vec<(String, String)>,
    after_submit: Option<(String, String)>,
    shown_override: Option<String>,
    patron_name: String,
    renew_response: String,
    log: Arc<PageLog>,
}

impl FakePage {
    pub fn new(log: Arc<PageLog>) -> Self {
        Self {
            url: String::new(),
            pages: Vec::new(),
            after_submit: None,
            shown_override: None,
            patron_name: String::new(),
            renew_response: r#"{"success": true, "message": "Renewed"}"#.to_string(),
            log,
        }
    }

    /// Serve `html` for any URL containing `fragment`.
    pub fn page(mut self, fragment: &str, html: impl Into<String>) -> Self {
        self.pages.push((fragment.to_string(), html.into()));
        self
    }

    /// After the next submit, show `html` at `url`.
    pub fn on_submit(mut self, url: &str, html: impl Into<String>) -> Self {
        self.after_submit = Some((url.to_string(), html.into()));
        self
    }

    pub fn patron_name(mut self, name: &str) -> Self {
        self.patron_name = name.to_string();
        self
    }

    pub fn renew_response(mut self, body: &str) -> Self {
        self.renew_response = body.to_string();
        self
    }

    fn markup(&self) -> String {
        if let Some(html) = &self.shown_override {
            return html.clone();
        }
        self.pages
            .iter()
            .find(|(fragment, _)| self.url.contains(fragment.as_str()))
            .map(|(_, html)| html.clone())
            .unwrap_or_else(|| "<html><head><title>Not Found</title></head><body></body></html>".to_string())
    }

    fn matches(&self, selector: &str) -> bool {
        let Ok(selector) = Selector::parse(selector) else {
            return false;
        };
        Html::parse_document(&self.markup()).select(&selector).next().is_some()
    }
}

impl PageDriver for FakePage {
    fn load(&mut self, url: &str) -> Result<(), TransportError> {
        self.log.loads.lock().unwrap().push(url.to_string());
        self.url = url.to_string();
        self.shown_override = None;
        Ok(())
    }

    fn current_url(&self) -> String {
        self.url.clone()
    }

    fn title(&self) -> Result<String, TransportError> {
        let document = Html::parse_document(&self.markup());
        let Ok(selector) = Selector::parse("title") else {
            return Ok(String::new());
        };
        Ok(document
            .select(&selector)
            .next()
            .map(|t| t.text().collect::<String>())
            .unwrap_or_default())
    }

    fn content(&self) -> Result<String, TransportError> {
        Ok(self.markup())
    }

    fn evaluate(&mut self, expression: &str, _await_promise: bool) -> Result<Value, TransportError> {
        if expression.contains("renewItem") {
            return Ok(Value::String(self.renew_response.clone()));
        }
        if expression.contains("menu-bar-label") {
            return Ok(Value::String(self.patron_name.clone()));
        }
        Ok(Value::Null)
    }

    fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<(), TransportError> {
        if self.matches(selector) {
            Ok(())
        } else {
            Err(TransportError::Timeout(format!("{} never appeared", selector)))
        }
    }

    fn exists(&self, selector: &str) -> Result<bool, TransportError> {
        Ok(self.matches(selector))
    }

    fn fill(&mut self, selector: &str, value: &str) -> Result<(), TransportError> {
        self.log
            .filled
            .lock()
            .unwrap()
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    fn select_option(&mut self, _selector: &str, _value: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn submit(&mut self, _selector: &str) -> Result<(), TransportError> {
        self.log.submits.fetch_add(1, Ordering::SeqCst);
        if let Some((url, html)) = self.after_submit.take() {
            self.url = url;
            self.shown_override = Some(html);
        }
        Ok(())
    }

    fn cookies(&self) -> Result<Vec<StoredCookie>, TransportError> {
        Ok(vec![session_cookie()])
    }

    fn local_storage(&mut self) -> Result<Vec<StorageOrigin>, TransportError> {
        Ok(vec![])
    }

    fn restore(&mut self, _state: &BrowserState) -> Result<(), TransportError> {
        self.log.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a [`FakeTransport`] was asked to do.
#[derive(Default)]
pub struct TransportLog {
    pub navigator_calls: AtomicUsize,
    pub installs: AtomicUsize,
    pub fetches: Mutex<Vec<&'static str>>,
}

impl TransportLog {
    pub fn fetched(&self) -> Vec<&'static str> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn navigator_calls(&self) -> usize {
        self.navigator_calls.load(Ordering::SeqCst)
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

/// Transport answering each endpoint from a queue of scripted bodies.
pub struct FakeTransport {
    mode: Mode,
    responses: HashMap<&'static str, VecDeque<Result<String, TransportError>>>,
    navigator: Option<Navigator>,
    log: Arc<TransportLog>,
}

impl FakeTransport {
    pub fn new(mode: Mode) -> (Self, Arc<TransportLog>) {
        let log = Arc::new(TransportLog::default());
        let transport = Self {
            mode,
            responses: HashMap::new(),
            navigator: None,
            log: log.clone(),
        };
        (transport, log)
    }

    /// Queue a response for the endpoint with this `Endpoint::name`.
    pub fn respond(mut self, endpoint: &'static str, response: Result<String, TransportError>) -> Self {
        self.responses.entry(endpoint).or_default().push_back(response);
        self
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn install(&mut self, artifact: &SessionArtifact) -> Result<(), TransportError> {
        if artifact.mode() != self.mode {
            return Err(TransportError::ArtifactMismatch {
                expected: self.mode,
                found: artifact.mode(),
            });
        }
        self.log.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn navigator(&mut self) -> Result<&mut Navigator, TransportError> {
        self.log.navigator_calls.fetch_add(1, Ordering::SeqCst);
        let navigator = self.navigator.get_or_insert_with(|| {
            let page = FakePage::new(Arc::new(PageLog::default())).page("/MyAccount", SIGNED_IN_HOME);
            Navigator::new(Box::new(page), RoutePolicy::permissive())
        });
        Ok(navigator)
    }

    fn release_navigator(&mut self) {
        self.navigator = None;
    }

    async fn fetch(&mut self, endpoint: &Endpoint) -> Result<RawPayload, TransportError> {
        self.log.fetches.lock().unwrap().push(endpoint.name());
        let body = self
            .responses
            .get_mut(endpoint.name())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(TransportError::Network(format!("nothing scripted for {}", endpoint.name()))))?;
        Ok(RawPayload::new(self.mode, body))
    }
}
