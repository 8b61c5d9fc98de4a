//! Session establishment: reuse a stored artifact or run the portal login form.

use crate::browser::Navigator;
use crate::error::AuthError;
use crate::models::{Credential, Mode};
use crate::session::{SessionArtifact, SessionStore};
use crate::transport::Transport;
use chrono::Utc;
use rand::Rng;
use scraper::{Html, Selector};
use std::time::Duration;

const LOGIN_SUBMIT: &str = "#loginFormSubmit, button[type='submit'], input[type='submit']";
const LOGIN_ERROR: &str = ".alert-danger, .loginError, .alert-warning, .error";
const LOGOUT_LINK: &str = "a[href*='Logout'], .logoutLink, #logoutLink";
const LOGIN_FORM: &str = "#username";

const REMEMBER_ME_SCRIPT: &str = "(() => { \
    const box = document.querySelector('#rememberMe'); \
    if (box && !box.checked) box.click(); \
    return box !== null; })()";

#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// Discard any stored artifact and log in again.
    pub interactive: bool,
    /// Upper bound on waiting for the challenge and the login form.
    pub timeout: Duration,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            interactive: false,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    SignedIn,
    Rejected(String),
    Unrecognized,
}

fn first_match(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next().map(|el| {
        el.text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    })
}

/// Classify the page the portal shows after a login attempt.
pub fn login_outcome(title: &str, html: &str) -> LoginOutcome {
    let document = Html::parse_document(html);
    let login_form = first_match(&document, LOGIN_FORM).is_some();
    let logout_link = first_match(&document, LOGOUT_LINK).is_some();
    let account_title = title.contains("My Account") || title.contains("Checked Out");

    if logout_link || (account_title && !login_form) {
        return LoginOutcome::SignedIn;
    }
    if let Some(message) = first_match(&document, LOGIN_ERROR).filter(|m| !m.is_empty()) {
        return LoginOutcome::Rejected(message);
    }
    if login_form {
        return LoginOutcome::Rejected("portal kept showing the login form".to_string());
    }
    LoginOutcome::Unrecognized
}

fn masked(identifier: &str) -> String {
    let visible: String = identifier
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{}", visible)
}

/// Short random pause between form fields.
async fn typing_pause() {
    let millis = rand::thread_rng().gen_range(150..=400);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

pub struct Authenticator {
    store: SessionStore,
    base_url: String,
}

impl Authenticator {
    pub fn new(store: SessionStore, base_url: &str) -> Self {
        Self {
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Return a usable session artifact for the transport's mode.
    ///
    /// A stored, unexpired artifact is returned as is with no network
    /// activity unless `interactive` is set. Otherwise the login form is
    /// submitted on the transport's page and the fresh artifact is persisted
    /// before it is returned.
    pub async fn establish_session(
        &self,
        credential: &Credential,
        transport: &mut dyn Transport,
        options: &LoginOptions,
    ) -> Result<SessionArtifact, AuthError> {
        let mode = transport.mode();

        if options.interactive {
            log::info!("Fresh login requested, discarding stored {} session", mode);
            self.store.invalidate(mode)?;
        } else if let Some(artifact) = self.store.load_valid(mode, Utc::now())? {
            log::info!("Reusing stored {} session (expires {})", mode, artifact.expires_at());
            return Ok(artifact);
        }

        log::info!("Logging in as {} ({} mode)", masked(&credential.identifier), mode);
        let result = self.login(credential, transport, options).await;
        transport.release_navigator();

        let artifact = result?;
        self.store.save(&artifact)?;
        Ok(artifact)
    }

    async fn login(
        &self,
        credential: &Credential,
        transport: &mut dyn Transport,
        options: &LoginOptions,
    ) -> Result<SessionArtifact, AuthError> {
        let mode = transport.mode();
        let nav = transport.navigator()?;

        nav.go_to(&format!("{}/MyAccount/Home", self.base_url))?;
        nav.await_clearance(options.timeout).await?;

        if current_outcome(nav)? == LoginOutcome::SignedIn {
            log::info!("Browser already signed in, skipping the login form");
        } else {
            submit_credentials(nav, credential, options).await?;
            nav.await_clearance(options.timeout).await?;

            match current_outcome(nav)? {
                LoginOutcome::SignedIn => log::info!("Login succeeded"),
                LoginOutcome::Rejected(message) => {
                    log::warn!("Login rejected: {}", message);
                    return Err(AuthError::InvalidCredentials(message));
                }
                LoginOutcome::Unrecognized => {
                    return Err(AuthError::UnexpectedPage(nav.page().current_url()));
                }
            }
        }

        let cookies = nav.page().cookies()?;
        if cookies.is_empty() {
            return Err(AuthError::UnexpectedPage(
                "signed in but the portal set no cookies".to_string(),
            ));
        }
        let origins = match mode {
            Mode::Rendered => nav.interact(|page| page.local_storage())?,
            Mode::Http => Vec::new(),
        };

        let expires_at = self.store.expiry_from(Utc::now());
        Ok(SessionArtifact::from_capture(mode, cookies, origins, expires_at))
    }
}

fn current_outcome(nav: &Navigator) -> Result<LoginOutcome, AuthError> {
    let title = nav.page().title()?;
    let html = nav.content()?;
    Ok(login_outcome(&title, &html))
}

async fn submit_credentials(
    nav: &mut Navigator,
    credential: &Credential,
    options: &LoginOptions,
) -> Result<(), AuthError> {
    nav.page().wait_for(LOGIN_FORM, options.timeout).map_err(|_| {
        AuthError::UnexpectedPage(format!("no login form at {}", nav.page().current_url()))
    })?;

    nav.interact(|page| page.fill("#username", &credential.identifier))?;
    typing_pause().await;
    nav.interact(|page| page.fill("#password", &credential.secret))?;
    typing_pause().await;

    nav.interact(|page| {
        page.evaluate(REMEMBER_ME_SCRIPT, false)?;
        page.submit(LOGIN_SUBMIT)
    })?;
    Ok(())
}
