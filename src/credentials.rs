//! Credential sources for the browser worker.
//!
//! Two kinds of credential exist: a persisted session artifact (a storage
//! state document written by an interactive login) and an ephemeral `li_at`
//! cookie handed over by a separate registration step. The browser session
//! asks a [`CredentialProvider`] for them in that order.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Environment variable carrying the ephemeral cookie.
pub const COOKIE_ENV_VAR: &str = "LINKEDIN_COOKIE";

/// File name of the registered cookie inside the temp directory.
pub const COOKIE_FILE_NAME: &str = "linkedin_cookie.txt";

/// `~/.linkedin-mcp/session.json`, or a relative path when no home directory
/// is known.
pub fn default_session_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".linkedin-mcp")
        .join("session.json")
}

/// `$TMPDIR/linkedin_cookie.txt`.
pub fn default_cookie_path() -> PathBuf {
    std::env::temp_dir().join(COOKIE_FILE_NAME)
}

/// A loaded session artifact.
#[derive(Debug, Clone)]
pub struct SessionArtifact {
    /// Where the artifact was read from.
    pub path: PathBuf,
    /// Opaque storage state applied to the browser.
    pub state: Value,
}

/// Source of browser credentials.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The persisted session artifact, if one exists.
    async fn persisted_session(&self) -> Result<Option<SessionArtifact>>;

    /// The ephemeral cookie, if one was registered.
    async fn ephemeral_cookie(&self) -> Result<Option<String>>;
}

/// Reads credentials from the well-known paths.
#[derive(Debug, Clone)]
pub struct FileCredentialProvider {
    session_path: PathBuf,
    cookie_path: PathBuf,
    env_fallback: bool,
}

impl Default for FileCredentialProvider {
    fn default() -> Self {
        Self::new(default_session_path(), default_cookie_path())
    }
}

impl FileCredentialProvider {
    /// Read from explicit paths. The `LINKEDIN_COOKIE` fallback is enabled.
    pub fn new(session_path: impl Into<PathBuf>, cookie_path: impl Into<PathBuf>) -> Self {
        Self {
            session_path: session_path.into(),
            cookie_path: cookie_path.into(),
            env_fallback: true,
        }
    }

    /// Enable or disable the environment variable fallback.
    pub fn with_env_fallback(mut self, enabled: bool) -> Self {
        self.env_fallback = enabled;
        self
    }

    /// Session artifact location.
    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    /// Cookie file location.
    pub fn cookie_path(&self) -> &Path {
        &self.cookie_path
    }

    /// Store `cookie` where the worker will pick it up.
    pub async fn register_cookie(&self, cookie: &str) -> Result<()> {
        let cookie = cookie.trim();
        if cookie.is_empty() {
            return Err(Error::InvalidParams("cookie must not be empty".into()));
        }
        if let Some(parent) = self.cookie_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.cookie_path, cookie).await?;
        info!(path = %self.cookie_path.display(), "session cookie registered");
        Ok(())
    }

    /// Whether a non-empty cookie file exists.
    pub async fn has_cookie(&self) -> bool {
        matches!(read_trimmed(&self.cookie_path).await, Ok(Some(_)))
    }
}

#[async_trait::async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn persisted_session(&self) -> Result<Option<SessionArtifact>> {
        let raw = match tokio::fs::read_to_string(&self.session_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.session_path.display(), "no persisted session");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str(&raw)?;
        Ok(Some(SessionArtifact {
            path: self.session_path.clone(),
            state,
        }))
    }

    async fn ephemeral_cookie(&self) -> Result<Option<String>> {
        match read_trimmed(&self.cookie_path).await {
            Ok(Some(cookie)) => return Ok(Some(cookie)),
            Ok(None) => {}
            Err(e) => warn!(path = %self.cookie_path.display(), "failed to read cookie file: {}", e),
        }

        if !self.env_fallback {
            return Ok(None);
        }
        Ok(std::env::var(COOKIE_ENV_VAR)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }
}

async fn read_trimmed(path: &Path) -> std::io::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let trimmed = raw.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// In-memory credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    /// Session artifact to hand out.
    pub session: Option<SessionArtifact>,
    /// Cookie to hand out.
    pub cookie: Option<String>,
}

impl StaticCredentials {
    /// No credentials at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Only a cookie.
    pub fn cookie(cookie: impl Into<String>) -> Self {
        Self {
            session: None,
            cookie: Some(cookie.into()),
        }
    }

    /// Only a session artifact.
    pub fn session(state: Value) -> Self {
        Self {
            session: Some(SessionArtifact {
                path: PathBuf::from("<memory>"),
                state,
            }),
            cookie: None,
        }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentials {
    async fn persisted_session(&self) -> Result<Option<SessionArtifact>> {
        Ok(self.session.clone())
    }

    async fn ephemeral_cookie(&self) -> Result<Option<String>> {
        Ok(self.cookie.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn provider(dir: &TempDir) -> FileCredentialProvider {
        FileCredentialProvider::new(
            dir.path().join("session.json"),
            dir.path().join(COOKIE_FILE_NAME),
        )
        .with_env_fallback(false)
    }

    #[tokio::test]
    async fn test_missing_files_yield_nothing() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir);
        assert!(provider.persisted_session().await.unwrap().is_none());
        assert!(provider.ephemeral_cookie().await.unwrap().is_none());
        assert!(!provider.has_cookie().await);
    }

    #[tokio::test]
    async fn test_register_then_read_cookie() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir);

        provider.register_cookie("  AQEDAR-cookie\n").await.unwrap();
        assert!(provider.has_cookie().await);
        assert_eq!(
            provider.ephemeral_cookie().await.unwrap().as_deref(),
            Some("AQEDAR-cookie")
        );
    }

    #[tokio::test]
    async fn test_register_rejects_empty_cookie() {
        let dir = TempDir::new().unwrap();
        let err = provider(&dir).register_cookie("   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_blank_cookie_file_is_absent() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir);
        std::fs::write(provider.cookie_path(), "\n").unwrap();
        assert!(provider.ephemeral_cookie().await.unwrap().is_none());
        assert!(!provider.has_cookie().await);
    }

    #[tokio::test]
    async fn test_session_artifact_is_loaded() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir);
        std::fs::write(
            provider.session_path(),
            r#"{"cookies":[{"name":"li_at","value":"x"}],"origins":[]}"#,
        )
        .unwrap();

        let artifact = provider.persisted_session().await.unwrap().unwrap();
        assert_eq!(artifact.path, provider.session_path());
        assert_eq!(artifact.state["cookies"][0]["name"], "li_at");
    }

    #[tokio::test]
    async fn test_corrupt_session_artifact_is_an_error() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir);
        std::fs::write(provider.session_path(), "{not json").unwrap();
        assert!(matches!(
            provider.persisted_session().await,
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let creds = StaticCredentials::session(json!({"cookies": []}));
        assert!(creds.persisted_session().await.unwrap().is_some());
        assert!(creds.ephemeral_cookie().await.unwrap().is_none());

        let creds = StaticCredentials::cookie("abc");
        assert_eq!(creds.ephemeral_cookie().await.unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_default_paths() {
        assert!(default_session_path().ends_with(".linkedin-mcp/session.json"));
        assert!(default_cookie_path().ends_with(COOKIE_FILE_NAME));
    }
}
