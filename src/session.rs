//! On-disk session artifacts.
//!
//! Two independent files, one per transport mode. The HTTP file holds a bare
//! cookie map, the browser file a full snapshot of cookies and local storage.
//! Neither can stand in for the other.
//!
//! Writes go through a temp file and an atomic rename, so a crash leaves
//! either the old artifact or the new one. There is no locking: two processes
//! saving at once means last writer wins.

use crate::config::SessionConfig;
use crate::error::StoreError;
use crate::models::Mode;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cookie map for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieSet {
    pub cookies: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

/// A browser cookie in DevTools wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    /// Seconds since the epoch; negative for session cookies
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn root_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageOrigin {
    pub origin: String,
    pub local_storage: Vec<StorageEntry>,
}

/// Everything needed to resume a rendered session without logging in again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserState {
    pub cookies: Vec<StoredCookie>,
    pub origins: Vec<StorageOrigin>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionArtifact {
    Http(CookieSet),
    Rendered(BrowserState),
}

impl SessionArtifact {
    pub fn mode(&self) -> Mode {
        match self {
            SessionArtifact::Http(_) => Mode::Http,
            SessionArtifact::Rendered(_) => Mode::Rendered,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            SessionArtifact::Http(set) => set.expires_at,
            SessionArtifact::Rendered(state) => state.expires_at,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    /// Build the artifact for `mode` from cookies captured off a logged-in page.
    pub fn from_capture(
        mode: Mode,
        cookies: Vec<StoredCookie>,
        origins: Vec<StorageOrigin>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        match mode {
            Mode::Http => SessionArtifact::Http(CookieSet {
                cookies: cookies.into_iter().map(|c| (c.name, c.value)).collect(),
                expires_at,
            }),
            Mode::Rendered => SessionArtifact::Rendered(BrowserState {
                cookies,
                origins,
                expires_at,
            }),
        }
    }
}

/// The two artifact files plus the lifetime stamped on new artifacts.
#[derive(Debug, Clone)]
pub struct SessionStore {
    http_path: PathBuf,
    browser_path: PathBuf,
    lifetime: Duration,
}

impl SessionStore {
    pub fn new(http_path: PathBuf, browser_path: PathBuf, lifetime: Duration) -> Self {
        Self {
            http_path,
            browser_path,
            lifetime,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.http_state_file.clone(),
            config.browser_state_file.clone(),
            config.lifetime(),
        )
    }

    pub fn path_for(&self, mode: Mode) -> &Path {
        match mode {
            Mode::Http => &self.http_path,
            Mode::Rendered => &self.browser_path,
        }
    }

    pub fn exists(&self, mode: Mode) -> bool {
        self.path_for(mode).exists()
    }

    /// Expiry to stamp on an artifact created now.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lifetime = chrono::Duration::from_std(self.lifetime).unwrap_or(chrono::Duration::hours(12));
        now + lifetime
    }

    /// Read the artifact for `mode`. Unreadable or foreign content counts as absent.
    pub fn load(&self, mode: Mode) -> Result<Option<SessionArtifact>, StoreError> {
        let artifact = match mode {
            Mode::Http => read_json::<CookieSet>(&self.http_path)?.map(SessionArtifact::Http),
            Mode::Rendered => read_json::<BrowserState>(&self.browser_path)?.map(SessionArtifact::Rendered),
        };
        Ok(artifact)
    }

    /// Stored artifact for `mode` if one exists and has not expired.
    pub fn load_valid(&self, mode: Mode, now: DateTime<Utc>) -> Result<Option<SessionArtifact>, StoreError> {
        match self.load(mode)? {
            Some(artifact) if artifact.is_valid_at(now) => Ok(Some(artifact)),
            Some(artifact) => {
                log::info!("Stored {} session expired at {}", mode, artifact.expires_at());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn save(&self, artifact: &SessionArtifact) -> Result<(), StoreError> {
        let path = self.path_for(artifact.mode());
        let body = match artifact {
            SessionArtifact::Http(set) => serde_json::to_string_pretty(set)?,
            SessionArtifact::Rendered(state) => serde_json::to_string_pretty(state)?,
        };
        write_atomic(path, body.as_bytes())?;
        log::info!("Saved {} session to {}", artifact.mode(), path.display());
        Ok(())
    }

    pub fn invalidate(&self, mode: Mode) -> Result<(), StoreError> {
        let path = self.path_for(mode);
        match fs::remove_file(path) {
            Ok(()) => {
                log::info!("Removed {} session at {}", mode, path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(path, source)),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(io_error(path, source)),
    };

    match serde_json::from_str(&content) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            log::warn!("Ignoring unreadable session file {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp_path).map_err(|e| io_error(&tmp_path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| io_error(&tmp_path, e))?;
    }
    file.write_all(bytes).map_err(|e| io_error(&tmp_path, e))?;
    file.sync_all().map_err(|e| io_error(&tmp_path, e))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| io_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SessionStore {
        SessionStore::new(
            dir.path().join("state.json"),
            dir.path().join("browser_state.json"),
            Duration::from_secs(3600),
        )
    }

    fn cookie(name: &str, value: &str) -> StoredCookie {
        StoredCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: "catalog.hmcpl.org".to_string(),
            path: "/".to_string(),
            expires: None,
            http_only: true,
            secure: true,
        }
    }

    #[test]
    fn test_save_and_load_http_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let now = Utc::now();
        let artifact = SessionArtifact::from_capture(
            Mode::Http,
            vec![cookie("aspen_session", "abc")],
            vec![],
            store.expiry_from(now),
        );

        store.save(&artifact).unwrap();
        let loaded = store.load_valid(Mode::Http, now).unwrap();
        assert_eq!(loaded, Some(artifact));
        assert!(store.load(Mode::Rendered).unwrap().is_none());
    }

    #[test]
    fn test_expired_artifact_is_not_valid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let now = Utc::now();
        let artifact = SessionArtifact::from_capture(
            Mode::Rendered,
            vec![cookie("aspen_session", "abc")],
            vec![],
            now - chrono::Duration::minutes(1),
        );

        store.save(&artifact).unwrap();
        assert!(store.load(Mode::Rendered).unwrap().is_some());
        assert!(store.load_valid(Mode::Rendered, now).unwrap().is_none());
    }

    #[test]
    fn test_browser_snapshot_is_not_read_as_cookie_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let snapshot = SessionArtifact::from_capture(
            Mode::Rendered,
            vec![cookie("aspen_session", "abc")],
            vec![],
            store.expiry_from(Utc::now()),
        );
        store.save(&snapshot).unwrap();

        // Put the snapshot where the cookie set belongs
        fs::copy(store.path_for(Mode::Rendered), store.path_for(Mode::Http)).unwrap();
        assert!(store.load(Mode::Http).unwrap().is_none());
    }

    #[test]
    fn test_invalidate_removes_only_one_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let expires = store.expiry_from(Utc::now());
        store
            .save(&SessionArtifact::from_capture(Mode::Http, vec![cookie("a", "1")], vec![], expires))
            .unwrap();
        store
            .save(&SessionArtifact::from_capture(Mode::Rendered, vec![cookie("a", "1")], vec![], expires))
            .unwrap();

        store.invalidate(Mode::Http).unwrap();
        assert!(!store.exists(Mode::Http));
        assert!(store.exists(Mode::Rendered));

        // Invalidating twice is fine
        store.invalidate(Mode::Http).unwrap();
    }

    #[test]
    fn test_cdp_cookie_json_deserializes() {
        let json = r#"{
            "name": "aspen_session", "value": "xyz", "domain": ".hmcpl.org",
            "path": "/", "expires": -1, "size": 20, "httpOnly": true,
            "secure": true, "session": true, "priority": "Medium"
        }"#;
        let cookie: StoredCookie = serde_json::from_str(json).unwrap();
        assert_eq!(cookie.name, "aspen_session");
        assert!(cookie.http_only);
        assert_eq!(cookie.expires, Some(-1.0));
    }
}
