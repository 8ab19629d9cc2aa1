//! Browser resource and its authentication state machine.
//!
//! The worker keeps one expensive browser per process. [`BrowserSession`] is
//! the handle that owns it: created once, passed to every tool, and driven
//! through these states:
//!
//! ```text
//! NoResource ─▶ Starting ─▶ AuthPending ─▶ Authenticated ⇄ Degraded
//!      ▲                        ▲   │            │              │
//!      │                        │   └─(no creds: stays pending) │
//!      │                        └──── login lapsed ◀────────────┘
//!   Closed ◀──────────────────────── close() ──────────────────────
//! ```
//!
//! Automation itself happens behind [`BrowserLauncher`] and [`BrowserPage`],
//! so the state machine can be exercised without a real browser.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::CredentialProvider;
use crate::error::{Error, Result};

/// Page navigated to when validating credentials.
pub const FEED_URL: &str = "https://www.linkedin.com/feed/";

/// Resource types dropped by the request filter.
pub const BLOCKED_RESOURCE_TYPES: &[&str] = &["image", "media", "font", "stylesheet", "other", "ping"];

/// User agent presented by launched browsers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Page timeout while credentials are being validated.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(120);

/// Page timeout once authenticated.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Browser window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    /// Width in CSS pixels.
    pub width: u32,
    /// Height in CSS pixels.
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Settings applied when the browser is launched.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run without a visible window.
    pub headless: bool,
    /// Window size.
    pub viewport: Viewport,
    /// Page timeout after authentication.
    pub default_timeout: Duration,
    /// Page timeout during credential validation.
    pub auth_timeout: Duration,
    /// User agent string.
    pub user_agent: String,
    /// Custom browser executable.
    pub chrome_path: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            default_timeout: DEFAULT_PAGE_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.into(),
            chrome_path: None,
        }
    }
}

impl BrowserConfig {
    /// Defaults overridden by `LINKEDIN_HEADLESS`, `LINKEDIN_VIEWPORT_WIDTH`,
    /// `LINKEDIN_VIEWPORT_HEIGHT`, `LINKEDIN_DEFAULT_TIMEOUT_MS` and
    /// `CHROME_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`BrowserConfig::from_env`] with a custom variable source.
    /// Unparseable values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("LINKEDIN_HEADLESS") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.headless = true,
                "0" | "false" | "no" => config.headless = false,
                other => warn!("ignoring LINKEDIN_HEADLESS={}", other),
            }
        }
        if let Some(width) = parse_var(&lookup, "LINKEDIN_VIEWPORT_WIDTH") {
            config.viewport.width = width;
        }
        if let Some(height) = parse_var(&lookup, "LINKEDIN_VIEWPORT_HEIGHT") {
            config.viewport.height = height;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LINKEDIN_DEFAULT_TIMEOUT_MS") {
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Some(path) = lookup("CHROME_PATH").filter(|p| !p.trim().is_empty()) {
            config.chrome_path = Some(PathBuf::from(path));
        }
        config
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {}={}", key, raw);
            None
        }
    }
}

/// One automated browser tab.
#[async_trait::async_trait]
pub trait BrowserPage: Send + Sync {
    /// Resize the window.
    async fn set_viewport(&self, viewport: Viewport) -> Result<()>;

    /// Timeout applied to navigation and element lookups.
    async fn set_default_timeout(&self, timeout: Duration) -> Result<()>;

    /// Abort requests for the given resource types.
    async fn block_resource_types(&self, types: &[&str]) -> Result<()>;

    /// Apply a persisted storage state (cookies and local storage).
    async fn load_storage_state(&self, state: &Value) -> Result<()>;

    /// Install the `li_at` session cookie.
    async fn add_session_cookie(&self, cookie: &str) -> Result<()>;

    /// Navigate and wait for the DOM to load.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Whether the current page shows a logged-in member.
    async fn is_logged_in(&self) -> Result<bool>;

    /// A description of the throttling signal on the current page, if any.
    async fn rate_limit_signal(&self) -> Result<Option<String>>;

    /// Document title.
    async fn title(&self) -> Result<String>;

    /// Serialized document.
    async fn content(&self) -> Result<String>;

    /// Shut the browser down.
    async fn close(&self) -> Result<()>;
}

/// Starts browsers.
#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser configured with `config` and return its page.
    async fn launch(&self, config: &BrowserConfig) -> Result<Arc<dyn BrowserPage>>;
}

/// Authentication state of the browser resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// No browser exists.
    NoResource,
    /// Browser launching.
    Starting,
    /// Browser running, not logged in.
    AuthPending,
    /// Logged in and usable.
    Authenticated,
    /// Logged in but throttled.
    Degraded,
    /// Browser shut down.
    Closed,
}

/// Which credential produced the current login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Persisted session artifact.
    PersistedSession,
    /// Ephemeral cookie.
    Cookie,
}

/// Snapshot reported by [`BrowserSession::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Current state.
    pub state: AuthState,
    /// Credential behind the current login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_source: Option<CredentialSource>,
    /// When the current login was established.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated_at: Option<DateTime<Utc>>,
    /// Last throttling signal seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<String>,
}

struct SessionInner {
    state: AuthState,
    page: Option<Arc<dyn BrowserPage>>,
    source: Option<CredentialSource>,
    authenticated_at: Option<DateTime<Utc>>,
    rate_limit: Option<String>,
}

impl SessionInner {
    fn reset(&mut self, state: AuthState) {
        self.state = state;
        self.page = None;
        self.source = None;
        self.authenticated_at = None;
        self.rate_limit = None;
    }
}

/// Process-wide browser handle gated by login state.
pub struct BrowserSession {
    config: BrowserConfig,
    launcher: Arc<dyn BrowserLauncher>,
    credentials: Arc<dyn CredentialProvider>,
    inner: Mutex<SessionInner>,
}

impl BrowserSession {
    /// Create a handle. Nothing is launched until the first
    /// [`ensure_authenticated`](Self::ensure_authenticated).
    pub fn new(
        config: BrowserConfig,
        launcher: Arc<dyn BrowserLauncher>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            config,
            launcher,
            credentials,
            inner: Mutex::new(SessionInner {
                state: AuthState::NoResource,
                page: None,
                source: None,
                authenticated_at: None,
                rate_limit: None,
            }),
        }
    }

    /// Launch configuration.
    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Current state.
    pub async fn state(&self) -> AuthState {
        self.inner.lock().await.state
    }

    /// Current state with login details.
    pub async fn status(&self) -> SessionStatus {
        let inner = self.inner.lock().await;
        SessionStatus {
            state: inner.state,
            credential_source: inner.source,
            authenticated_at: inner.authenticated_at,
            rate_limit: inner.rate_limit.clone(),
        }
    }

    /// Return a logged-in page, launching and authenticating as needed.
    ///
    /// An already authenticated browser is re-validated; a lapsed login
    /// moves back to `AuthPending` and fails with `Authentication` instead
    /// of logging in again silently.
    pub async fn ensure_authenticated(&self) -> Result<Arc<dyn BrowserPage>> {
        let mut inner = self.inner.lock().await;

        let existing = match inner.state {
            AuthState::AuthPending | AuthState::Authenticated | AuthState::Degraded => {
                inner.page.clone()
            }
            _ => None,
        };
        let page = match existing {
            Some(page) => page,
            None => self.start(&mut inner).await?,
        };

        if inner.state == AuthState::AuthPending {
            return match self.resolve_credentials(&mut inner, &page).await {
                Ok(()) => Ok(page),
                Err(e) if e.is_authentication() => Err(e),
                Err(e) => {
                    self.discard(&mut inner, page.as_ref(), &e).await;
                    Err(e)
                }
            };
        }

        match page.is_logged_in().await {
            Ok(true) => Ok(page),
            Ok(false) => {
                warn!("browser session lapsed");
                inner.state = AuthState::AuthPending;
                inner.source = None;
                inner.authenticated_at = None;
                Err(Error::Authentication("Session expired or invalid.".into()))
            }
            Err(e) => {
                self.discard(&mut inner, page.as_ref(), &e).await;
                Err(e)
            }
        }
    }

    /// Inspect the current page for throttling.
    ///
    /// A signal moves an authenticated session to `Degraded` and fails with
    /// `RateLimit`; a clear page restores `Authenticated`.
    pub async fn check_rate_limit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(page) = inner.page.clone() else {
            return Ok(());
        };

        let signal = match page.rate_limit_signal().await {
            Ok(signal) => signal,
            Err(e) => {
                self.discard(&mut inner, page.as_ref(), &e).await;
                return Err(e);
            }
        };

        match signal {
            Some(signal) => {
                warn!(%signal, "rate limit detected");
                if inner.state == AuthState::Authenticated {
                    inner.state = AuthState::Degraded;
                }
                inner.rate_limit = Some(signal.clone());
                Err(Error::RateLimit(signal))
            }
            None => {
                if inner.state == AuthState::Degraded {
                    info!("rate limit cleared");
                    inner.state = AuthState::Authenticated;
                    inner.rate_limit = None;
                }
                Ok(())
            }
        }
    }

    /// Shut the browser down. Returns whether one was running.
    pub async fn close(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(page) = inner.page.take() else {
            return Ok(false);
        };

        info!("closing browser");
        let result = page.close().await;
        inner.reset(AuthState::Closed);
        result.map(|()| true)
    }

    async fn start(&self, inner: &mut SessionInner) -> Result<Arc<dyn BrowserPage>> {
        inner.reset(AuthState::Starting);
        info!(
            headless = self.config.headless,
            width = self.config.viewport.width,
            height = self.config.viewport.height,
            "launching browser"
        );

        let page = match self.launcher.launch(&self.config).await {
            Ok(page) => page,
            Err(e) => {
                inner.state = AuthState::NoResource;
                return Err(e);
            }
        };

        if let Err(e) = self.configure(page.as_ref()).await {
            if let Err(close_err) = page.close().await {
                debug!("close after failed configuration: {}", close_err);
            }
            inner.state = AuthState::NoResource;
            return Err(e);
        }

        inner.page = Some(page.clone());
        inner.state = AuthState::AuthPending;
        Ok(page)
    }

    /// Drop a page that stopped responding so the next call relaunches.
    async fn discard(&self, inner: &mut SessionInner, page: &dyn BrowserPage, cause: &Error) {
        warn!(state = ?inner.state, "browser unresponsive, discarding it: {}", cause);
        if let Err(e) = page.close().await {
            debug!("close of unresponsive browser failed: {}", e);
        }
        inner.reset(AuthState::NoResource);
    }

    async fn configure(&self, page: &dyn BrowserPage) -> Result<()> {
        page.set_viewport(self.config.viewport).await?;
        page.set_default_timeout(self.config.auth_timeout).await?;
        page.block_resource_types(BLOCKED_RESOURCE_TYPES).await
    }

    async fn resolve_credentials(
        &self,
        inner: &mut SessionInner,
        page: &Arc<dyn BrowserPage>,
    ) -> Result<()> {
        match self.credentials.persisted_session().await {
            Ok(Some(artifact)) => match self.try_session(page.as_ref(), &artifact.state).await {
                Ok(true) => {
                    info!(path = %artifact.path.display(), "authenticated with persisted session");
                    return self.mark_authenticated(inner, page.as_ref(), CredentialSource::PersistedSession).await;
                }
                Ok(false) => warn!("session loaded but expired, trying cookie"),
                Err(e) => return Err(e),
            },
            Ok(None) => {}
            Err(e) => warn!("failed to read session artifact: {}", e),
        }

        match self.credentials.ephemeral_cookie().await {
            Ok(Some(cookie)) => match self.try_cookie(page.as_ref(), &cookie).await {
                Ok(true) => {
                    info!("authenticated with session cookie");
                    return self.mark_authenticated(inner, page.as_ref(), CredentialSource::Cookie).await;
                }
                Ok(false) => warn!("cookie authentication rejected"),
                Err(e) => return Err(e),
            },
            Ok(None) => {}
            Err(e) => warn!("failed to read cookie: {}", e),
        }

        Err(Error::Authentication(
            "No authentication found. Register a session cookie or create a session file.".into(),
        ))
    }

    /// `Ok(false)` when the credential is unusable; `Err` only when the
    /// browser itself failed.
    async fn try_session(&self, page: &dyn BrowserPage, state: &Value) -> Result<bool> {
        if let Err(e) = page.load_storage_state(state).await {
            warn!("failed to load session: {}", e);
            return Ok(false);
        }
        page.navigate(FEED_URL).await?;
        page.is_logged_in().await
    }

    async fn try_cookie(&self, page: &dyn BrowserPage, cookie: &str) -> Result<bool> {
        if let Err(e) = page.add_session_cookie(cookie).await {
            warn!("failed to set session cookie: {}", e);
            return Ok(false);
        }
        page.navigate(FEED_URL).await?;
        page.is_logged_in().await
    }

    async fn mark_authenticated(
        &self,
        inner: &mut SessionInner,
        page: &dyn BrowserPage,
        source: CredentialSource,
    ) -> Result<()> {
        page.set_default_timeout(self.config.default_timeout).await?;
        inner.state = AuthState::Authenticated;
        inner.source = Some(source);
        inner.authenticated_at = Some(Utc::now());
        inner.rate_limit = None;
        Ok(())
    }
}
