use crate::browser::BrowserConfig;
use crate::http_client::HttpClientConfig;
use crate::models::Mode;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://catalog.hmcpl.org";
const DEFAULT_CONFIG_FILE: &str = "hmcpl.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Portal origin, without trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Operating mode for the whole process
    #[serde(default = "default_mode")]
    pub mode: Mode,

    /// How long login may wait for the anti-bot challenge and the login form
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub http: HttpClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Cookie set used by the HTTP transport
    #[serde(default = "default_http_state_file")]
    pub http_state_file: PathBuf,

    /// Full browser snapshot used by the rendered transport
    #[serde(default = "default_browser_state_file")]
    pub browser_state_file: PathBuf,

    /// Validity window of a freshly stored artifact
    #[serde(default = "default_session_lifetime")]
    pub lifetime_secs: u64,
}

fn default_base_url() -> String { DEFAULT_BASE_URL.to_string() }
fn default_mode() -> Mode { Mode::Rendered }
fn default_login_timeout() -> u64 { 60 }
fn default_session_lifetime() -> u64 { 12 * 60 * 60 }

fn home_file(name: &str) -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(name)
}

fn default_http_state_file() -> PathBuf { home_file(".hmcpl_state.json") }
fn default_browser_state_file() -> PathBuf { home_file(".hmcpl_browser_state.json") }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            http_state_file: default_http_state_file(),
            browser_state_file: default_browser_state_file(),
            lifetime_secs: default_session_lifetime(),
        }
    }
}

impl SessionConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            mode: default_mode(),
            login_timeout_secs: default_login_timeout(),
            session: SessionConfig::default(),
            browser: BrowserConfig::default(),
            http: HttpClientConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
}

impl Config {
    /// Load `$HMCPL_CONFIG` or `./hmcpl.toml`, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("HMCPL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut config = Self::load_from(Path::new(&path))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(config)
    }

    /// Apply `HMCPL_MODE`, `HMCPL_TIMEOUT` and `HMCPL_HEADLESS`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("HMCPL_MODE") {
            self.mode = value
                .parse()
                .map_err(|_| ConfigError::Env { key: "HMCPL_MODE", value })?;
        }
        if let Ok(value) = std::env::var("HMCPL_TIMEOUT") {
            self.login_timeout_secs = value
                .parse()
                .map_err(|_| ConfigError::Env { key: "HMCPL_TIMEOUT", value })?;
        }
        if let Ok(value) = std::env::var("HMCPL_HEADLESS") {
            self.browser.headless = value != "0" && value.to_lowercase() != "false";
        }
        Ok(())
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.mode, Mode::Rendered);
        assert_eq!(config.login_timeout(), Duration::from_secs(60));
        assert!(config.session.http_state_file.ends_with(".hmcpl_state.json"));
        assert!(config.session.browser_state_file.ends_with(".hmcpl_browser_state.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            base_url = "https://catalog.example.org/"
            mode = "http"

            [session]
            lifetime_secs = 600

            [browser]
            headless = false
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://catalog.example.org");
        assert_eq!(config.mode, Mode::Http);
        assert_eq!(config.session.lifetime(), Duration::from_secs(600));
        assert!(config.session.http_state_file.ends_with(".hmcpl_state.json"));
        assert!(!config.browser.headless);
        assert_eq!(config.browser.window_size, (1920, 1080));
        assert_eq!(config.http.timeout_secs, 30);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_invalid_mode_is_an_error() {
        assert!(Config::from_toml(r#"mode = "carrier-pigeon""#).is_err());
    }
}
