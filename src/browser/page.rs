use super::config::BrowserConfig;
use crate::error::TransportError;
use crate::session::{BrowserState, StorageEntry, StorageOrigin, StoredCookie};
use headless_chrome::protocol::cdp::Network::CookieParam;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

/// Operations on the one document the process drives.
///
/// Implemented by [`ChromePage`] for real runs and by in-memory fakes in tests.
/// Nothing here opens another tab or page.
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the load to finish.
    fn load(&mut self, url: &str) -> Result<(), TransportError>;

    fn current_url(&self) -> String;

    fn title(&self) -> Result<String, TransportError>;

    fn content(&self) -> Result<String, TransportError>;

    /// Evaluate a script. Only primitive results come back; wrap objects in
    /// `JSON.stringify`.
    fn evaluate(&mut self, expression: &str, await_promise: bool) -> Result<Value, TransportError>;

    fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), TransportError>;

    fn exists(&self, selector: &str) -> Result<bool, TransportError>;

    fn fill(&mut self, selector: &str, value: &str) -> Result<(), TransportError>;

    fn select_option(&mut self, selector: &str, value: &str) -> Result<(), TransportError>;

    /// Click a submit control and wait for the resulting navigation.
    fn submit(&mut self, selector: &str) -> Result<(), TransportError>;

    fn cookies(&self) -> Result<Vec<StoredCookie>, TransportError>;

    /// Local storage of the currently loaded origin.
    fn local_storage(&mut self) -> Result<Vec<StorageOrigin>, TransportError>;

    /// Put a saved snapshot back: cookies now, local storage on the next load
    /// of a matching origin.
    fn restore(&mut self, state: &BrowserState) -> Result<(), TransportError>;
}

fn chrome_error(context: &str, e: impl std::fmt::Display) -> TransportError {
    let message = format!("{}: {}", context, e);
    if message.to_lowercase().contains("timeout") || message.to_lowercase().contains("timed out") {
        TransportError::Timeout(message)
    } else {
        TransportError::Browser(message)
    }
}

fn js_string(value: &str) -> String {
    // serde_json string literals are valid JavaScript string literals
    Value::String(value.to_string()).to_string()
}

/// Page origin (`scheme://host[:port]`) of a URL.
pub(crate) fn origin_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    Some(parsed.origin().ascii_serialization()).filter(|o| o != "null")
}

/// The single Chrome tab.
pub struct ChromePage {
    // Dropping the browser kills Chrome, so it lives as long as the tab
    _browser: Browser,
    tab: Arc<Tab>,
    element_timeout: Duration,
    pending_storage: Vec<StorageOrigin>,
}

impl ChromePage {
    /// Launch Chrome and take over its initial tab.
    pub fn launch(config: &BrowserConfig) -> Result<Self, TransportError> {
        let images_arg = config
            .disable_images
            .then(|| "--blink-settings=imagesEnabled=false".to_string());
        let user_agent_arg = config.user_agent.as_ref().map(|ua| format!("--user-agent={}", ua));

        let mut args: Vec<&OsStr> = config.chrome_flags.iter().map(OsStr::new).collect();
        if let Some(ref img) = images_arg {
            args.push(OsStr::new(img));
        }
        if let Some(ref ua) = user_agent_arg {
            args.push(OsStr::new(ua));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some(config.window_size))
            .idle_browser_timeout(config.navigation_timeout() * 5)
            .args(args)
            .build()
            .map_err(|e| chrome_error("Invalid launch options", e))?;

        log::info!(
            "Launching Chrome ({})",
            if config.headless { "headless" } else { "headed" }
        );
        let browser = Browser::new(launch_options).map_err(|e| chrome_error("Chrome failed to start", e))?;
        let tab = browser
            .wait_for_initial_tab()
            .map_err(|e| chrome_error("No initial tab", e))?;

        tab.set_default_timeout(config.navigation_timeout());
        tab.enable_stealth_mode()
            .map_err(|e| chrome_error("Stealth setup failed", e))?;
        if let Some(ua) = &config.user_agent {
            tab.set_user_agent(ua, Some("en-US,en;q=0.9"), None)
                .map_err(|e| chrome_error("User agent override failed", e))?;
        }

        Ok(Self {
            _browser: browser,
            tab,
            element_timeout: config.navigation_timeout(),
            pending_storage: Vec::new(),
        })
    }

    fn apply_pending_storage(&mut self) -> Result<(), TransportError> {
        let Some(origin) = origin_of(&self.tab.get_url()) else {
            return Ok(());
        };
        let Some(index) = self.pending_storage.iter().position(|o| o.origin == origin) else {
            return Ok(());
        };

        let entries = self.pending_storage.remove(index).local_storage;
        let script = format!(
            "(() => {{ const entries = {}; for (const e of entries) localStorage.setItem(e.name, e.value); return entries.length; }})()",
            json!(entries)
        );
        self.tab
            .evaluate(&script, false)
            .map_err(|e| chrome_error("Restoring local storage failed", e))?;
        log::debug!("Restored {} local storage entries for {}", entries.len(), origin);
        Ok(())
    }
}

impl PageDriver for ChromePage {
    fn load(&mut self, url: &str) -> Result<(), TransportError> {
        self.tab
            .navigate_to(url)
            .map_err(|e| chrome_error(&format!("Failed to navigate to {}", url), e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| chrome_error(&format!("Navigation timeout for {}", url), e))?;
        self.apply_pending_storage()
    }

    fn current_url(&self) -> String {
        self.tab.get_url()
    }

    fn title(&self) -> Result<String, TransportError> {
        self.tab.get_title().map_err(|e| chrome_error("Reading title failed", e))
    }

    fn content(&self) -> Result<String, TransportError> {
        self.tab.get_content().map_err(|e| chrome_error("Reading document failed", e))
    }

    fn evaluate(&mut self, expression: &str, await_promise: bool) -> Result<Value, TransportError> {
        let result = self
            .tab
            .evaluate(expression, await_promise)
            .map_err(|e| chrome_error("Script evaluation failed", e))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), TransportError> {
        self.tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map(|_| ())
            .map_err(|e| TransportError::Timeout(format!("Waiting for {}: {}", selector, e)))
    }

    fn exists(&self, selector: &str) -> Result<bool, TransportError> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        let result = self
            .tab
            .evaluate(&script, false)
            .map_err(|e| chrome_error("Selector probe failed", e))?;
        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn fill(&mut self, selector: &str, value: &str) -> Result<(), TransportError> {
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(selector, self.element_timeout)
            .map_err(|e| chrome_error(&format!("Finding {}", selector), e))?;
        element
            .click()
            .map_err(|e| chrome_error(&format!("Focusing {}", selector), e))?;
        element
            .type_into(value)
            .map_err(|e| chrome_error(&format!("Typing into {}", selector), e))?;
        Ok(())
    }

    fn select_option(&mut self, selector: &str, value: &str) -> Result<(), TransportError> {
        let script = format!(
            "(() => {{ const s = document.querySelector({}); if (!s) return false; s.value = {}; s.dispatchEvent(new Event('change', {{ bubbles: true }})); return s.value === {}; }})()",
            js_string(selector),
            js_string(value),
            js_string(value)
        );
        match self.evaluate(&script, false)?.as_bool() {
            Some(true) => Ok(()),
            _ => Err(TransportError::Navigation(format!(
                "Could not select {:?} in {}",
                value, selector
            ))),
        }
    }

    fn submit(&mut self, selector: &str) -> Result<(), TransportError> {
        let element = self
            .tab
            .find_element(selector)
            .map_err(|e| chrome_error(&format!("Finding {}", selector), e))?;
        element
            .click()
            .map_err(|e| chrome_error(&format!("Clicking {}", selector), e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| chrome_error("Waiting for form submission", e))?;
        self.apply_pending_storage()
    }

    fn cookies(&self) -> Result<Vec<StoredCookie>, TransportError> {
        let cookies = self
            .tab
            .get_cookies()
            .map_err(|e| chrome_error("Reading cookies failed", e))?;
        cookies
            .into_iter()
            .map(|c| {
                serde_json::to_value(c)
                    .and_then(serde_json::from_value::<StoredCookie>)
                    .map_err(|e| TransportError::Browser(format!("Unexpected cookie shape: {}", e)))
            })
            .collect()
    }

    fn local_storage(&mut self) -> Result<Vec<StorageOrigin>, TransportError> {
        let Some(origin) = origin_of(&self.tab.get_url()) else {
            return Ok(Vec::new());
        };
        let raw = self.evaluate(
            "JSON.stringify(Object.keys(localStorage).map(k => ({ name: k, value: localStorage.getItem(k) })))",
            false,
        )?;
        let entries: Vec<StorageEntry> = match raw.as_str() {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| TransportError::Browser(format!("Unexpected local storage shape: {}", e)))?,
            None => Vec::new(),
        };
        Ok(vec![StorageOrigin {
            origin,
            local_storage: entries,
        }])
    }

    fn restore(&mut self, state: &BrowserState) -> Result<(), TransportError> {
        let params = state
            .cookies
            .iter()
            .map(|c| {
                let mut param = json!({
                    "name": c.name,
                    "value": c.value,
                    "domain": c.domain,
                    "path": c.path,
                    "secure": c.secure,
                    "httpOnly": c.http_only,
                });
                if let Some(expires) = c.expires.filter(|e| *e > 0.0) {
                    param["expires"] = json!(expires);
                }
                serde_json::from_value::<CookieParam>(param)
                    .map_err(|e| TransportError::Browser(format!("Invalid stored cookie {}: {}", c.name, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.tab
            .set_cookies(params)
            .map_err(|e| chrome_error("Restoring cookies failed", e))?;
        self.pending_storage = state.origins.clone();
        log::debug!("Restored {} cookies into the browser", state.cookies.len());
        Ok(())
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        log::debug!("Closing browser page");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://catalog.hmcpl.org/MyAccount/Home?x=1").as_deref(),
            Some("https://catalog.hmcpl.org")
        );
        assert_eq!(origin_of("about:blank"), None);
    }

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("a[href*='x']"), r#""a[href*='x']""#);
        assert_eq!(js_string(r#"say "hi""#), r#""say \"hi\"""#);
    }

    #[test]
    #[ignore] // Requires Chrome to be installed
    fn test_launch_single_tab() {
        let page = ChromePage::launch(&BrowserConfig::default()).unwrap();
        assert!(page.current_url().starts_with("about:") || page.current_url().is_empty());
    }
}
