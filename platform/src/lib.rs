//! Hosted platform boundary for the wallet client.
//!
//! # Architecture
//!
//! The balance engine never talks to the network directly. It consumes three
//! boundary traits:
//!
//! - [`SessionSource`] - resolves the cached session once and streams auth-state changes
//! - [`BalanceSource`] - point query of the balance column for one user
//! - [`ChangeFeed`] - push subscription to row changes for one user
//!
//! [`Platform`] bundles the concrete implementations:
//!
//! | Client | Trait | Endpoint |
//! |--------|-------|----------|
//! | [`auth::AuthClient`] | `SessionSource` | `/auth/v1` (token grant, logout) |
//! | [`rest::RestClient`] | `BalanceSource` | `/rest/v1/{table}` |
//! | [`realtime::RealtimeClient`] | `ChangeFeed` | `/realtime/v1/websocket` (Phoenix channels) |
//!
//! # Subscriptions
//!
//! Every listener registration hands back a [`Disposer`]. Disposing is
//! idempotent, and dropping a subscription disposes it, so a registration
//! can never outlive its owner.
//!
//! # Error Handling
//!
//! All clients return [`PlatformError`]. Nothing here retries; callers decide
//! how a failure degrades.

pub mod auth;
pub mod realtime;
pub mod rest;
pub mod session;

mod disposer;
mod phoenix;

pub use auth::{AuthClient, CacheWatch, SESSION_POLL_INTERVAL};
pub use disposer::Disposer;
pub use realtime::RealtimeClient;
pub use rest::RestClient;
pub use session::{Session, SessionCache, SessionUser};

pub use wallet_types;

use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;
use wallet_config::{BalanceTable, WalletConfig};
use wallet_types::{AuthChange, BalanceChange, Decimal, Identity, SecretString, UserId};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Client identification header value.
pub const CLIENT_INFO: &str = concat!("wallet-rs/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("session cache {}: {source}", .path.display())]
    SessionCache {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid platform settings: {0}")]
    Settings(String),
    #[error("realtime channel: {0}")]
    Realtime(String),
}

impl PlatformError {
    /// HTTP status for API errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T, E = PlatformError> = std::result::Result<T, E>;

// ============================================================================
// Boundary traits
// ============================================================================

/// Authentication boundary.
pub trait SessionSource: Send + Sync + 'static {
    /// Resolve the current principal from the (possibly cached) session.
    fn resolve_session(&self) -> impl Future<Output = Result<Identity>> + Send;

    /// Register a listener for auth-state changes.
    fn auth_changes(&self) -> AuthSubscription;
}

/// Point query of a user's balance.
pub trait BalanceSource: Send + Sync + 'static {
    fn fetch_balance(&self, user: &UserId) -> impl Future<Output = Result<Decimal>> + Send;
}

/// Push subscription to balance row changes.
pub trait ChangeFeed: Send + Sync + 'static {
    /// Open a channel scoped to `user`.
    ///
    /// Establishment happens in the background. A channel that fails to
    /// establish simply never delivers and then reports closed.
    fn subscribe(&self, user: &UserId) -> ChangeSubscription;
}

impl<T: SessionSource> SessionSource for Arc<T> {
    fn resolve_session(&self) -> impl Future<Output = Result<Identity>> + Send {
        T::resolve_session(self)
    }

    fn auth_changes(&self) -> AuthSubscription {
        T::auth_changes(self)
    }
}

impl<T: BalanceSource> BalanceSource for Arc<T> {
    fn fetch_balance(&self, user: &UserId) -> impl Future<Output = Result<Decimal>> + Send {
        T::fetch_balance(self, user)
    }
}

impl<T: ChangeFeed> ChangeFeed for Arc<T> {
    fn subscribe(&self, user: &UserId) -> ChangeSubscription {
        T::subscribe(self, user)
    }
}

// ============================================================================
// Subscription handles
// ============================================================================

/// Listener registration on the auth-state stream.
#[derive(Debug)]
pub struct AuthSubscription {
    rx: mpsc::UnboundedReceiver<AuthChange>,
    disposer: Disposer,
}

impl AuthSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<AuthChange>, disposer: Disposer) -> Self {
        Self { rx, disposer }
    }

    /// Next auth-state change. `None` once unsubscribed or the source is gone.
    pub async fn recv(&mut self) -> Option<AuthChange> {
        if self.disposer.is_disposed() {
            return None;
        }
        self.rx.recv().await
    }

    /// Release the listener. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.disposer.dispose() {
            self.rx.close();
            while self.rx.try_recv().is_ok() {}
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.disposer.is_disposed()
    }
}

/// An open change-feed channel bound to exactly one user.
#[derive(Debug)]
pub struct ChangeSubscription {
    user: UserId,
    topic: String,
    rx: mpsc::Receiver<BalanceChange>,
    disposer: Disposer,
}

impl ChangeSubscription {
    pub fn new(
        user: UserId,
        topic: impl Into<String>,
        rx: mpsc::Receiver<BalanceChange>,
        disposer: Disposer,
    ) -> Self {
        Self {
            user,
            topic: topic.into(),
            rx,
            disposer,
        }
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next pushed change. `None` once unsubscribed or the channel closed.
    pub async fn recv(&mut self) -> Option<BalanceChange> {
        if self.disposer.is_disposed() {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop delivery. Buffered changes are discarded. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.disposer.dispose() {
            self.rx.close();
            while self.rx.try_recv().is_ok() {}
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.disposer.is_disposed()
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Validated endpoint, credentials and row location.
#[derive(Debug, Clone)]
pub struct PlatformSettings {
    base_url: Url,
    anon_key: SecretString,
    allow_insecure: bool,
    request_timeout: Duration,
    table: BalanceTable,
    session_path: Option<PathBuf>,
}

impl PlatformSettings {
    pub fn new(base_url: &str, anon_key: impl Into<SecretString>, allow_insecure: bool) -> Result<Self> {
        let mut url = Url::parse(base_url.trim())
            .map_err(|e| PlatformError::Settings(format!("platform url {base_url:?}: {e}")))?;
        match url.scheme() {
            "https" => {}
            "http" if allow_insecure => {}
            "http" => {
                return Err(PlatformError::Settings(
                    "platform url must use https (set allow_insecure for local development)"
                        .to_string(),
                ));
            }
            other => {
                return Err(PlatformError::Settings(format!(
                    "unsupported platform url scheme {other:?}"
                )));
            }
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.set_query(None);

        let anon_key = anon_key.into();
        if anon_key.is_empty() {
            return Err(PlatformError::Settings("anon key is empty".to_string()));
        }

        Ok(Self {
            base_url: url,
            anon_key,
            allow_insecure,
            request_timeout: Duration::from_secs(wallet_config::DEFAULT_REQUEST_TIMEOUT_SECS),
            table: BalanceTable::default(),
            session_path: None,
        })
    }

    /// Build settings from the config file plus env overrides.
    pub fn from_config(config: &WalletConfig) -> Result<Self> {
        let url = config.platform_url().ok_or_else(|| {
            PlatformError::Settings(format!(
                "no platform url configured (set [platform] url or {})",
                wallet_config::URL_ENV
            ))
        })?;
        let anon_key = config.anon_key().ok_or_else(|| {
            PlatformError::Settings(format!(
                "no anon key configured (set [platform] anon_key or {})",
                wallet_config::ANON_KEY_ENV
            ))
        })?;

        let settings = Self::new(&url, anon_key, config.allow_insecure())?
            .with_request_timeout(Duration::from_secs(config.request_timeout_secs()))
            .with_table(config.balance_table());
        Ok(match config.session_path() {
            Some(path) => settings.with_session_path(path),
            None => settings,
        })
    }

    #[must_use]
    pub fn with_table(mut self, table: BalanceTable) -> Self {
        self.table = table;
        self
    }

    #[must_use]
    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn anon_key(&self) -> &SecretString {
        &self.anon_key
    }

    #[must_use]
    pub const fn allow_insecure(&self) -> bool {
        self.allow_insecure
    }

    #[must_use]
    pub fn table(&self) -> &BalanceTable {
        &self.table
    }

    #[must_use]
    pub fn session_path(&self) -> Option<&PathBuf> {
        self.session_path.as_ref()
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PlatformError::Settings(format!("cannot build {path:?} url: {e}")))
    }

    /// `{base}/auth/v1/{path}`
    pub fn auth_url(&self, path: &str) -> Result<Url> {
        self.join(&format!("auth/v1/{path}"))
    }

    /// `{base}/rest/v1/{table}`
    pub fn rest_url(&self) -> Result<Url> {
        self.join(&format!("rest/v1/{}", self.table.table))
    }

    /// `ws(s)://{host}/realtime/v1/websocket?apikey=...&vsn=1.0.0`
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.join("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| PlatformError::Settings("cannot derive websocket url".to_string()))?;
        url.query_pairs_mut()
            .append_pair("apikey", self.anon_key.expose_secret())
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

// ============================================================================
// HTTP plumbing
// ============================================================================

/// Build the shared HTTP client. Every request carries the `apikey` header.
pub fn http_client(settings: &PlatformSettings) -> Result<reqwest::Client> {
    use reqwest::header::{HeaderMap, HeaderValue};

    let mut apikey = HeaderValue::from_str(settings.anon_key.expose_secret())
        .map_err(|_| PlatformError::Settings("anon key is not a valid header value".to_string()))?;
    apikey.set_sensitive(true);

    let mut default_headers = HeaderMap::new();
    default_headers.insert("apikey", apikey);
    default_headers.insert("X-Client-Info", HeaderValue::from_static(CLIENT_INFO));

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(settings.request_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .https_only(!settings.allow_insecure)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .default_headers(default_headers)
        .build()?;
    Ok(client)
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Map a non-success response to [`PlatformError::Api`].
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_capped_error_body(response).await;
    Err(PlatformError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Read `column` out of a row object as an exact decimal.
///
/// Numeric columns arrive as JSON numbers or, for `numeric` types, strings.
pub fn parse_balance(row: &serde_json::Value, column: &str) -> Result<Decimal> {
    let value = row
        .get(column)
        .ok_or_else(|| PlatformError::Decode(format!("row has no {column:?} column")))?;
    let text = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Null => {
            return Err(PlatformError::Decode(format!("{column:?} is null")));
        }
        other => {
            return Err(PlatformError::Decode(format!(
                "{column:?} is not numeric: {other}"
            )));
        }
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| PlatformError::Decode(format!("{column:?} = {text}: {e}")))
}

// ============================================================================
// Bundle
// ============================================================================

/// The three concrete clients sharing one HTTP client and session.
#[derive(Debug, Clone)]
pub struct Platform {
    pub auth: Arc<AuthClient>,
    pub rest: Arc<RestClient>,
    pub realtime: Arc<RealtimeClient>,
}

impl Platform {
    pub fn connect(settings: PlatformSettings) -> Result<Self> {
        let settings = Arc::new(settings);
        let http = http_client(&settings)?;
        let cache = SessionCache::new(settings.session_path().cloned());
        let auth = Arc::new(AuthClient::new(http.clone(), Arc::clone(&settings), cache));
        let rest = Arc::new(RestClient::new(
            http,
            Arc::clone(&settings),
            Arc::clone(&auth),
        ));
        let realtime = Arc::new(RealtimeClient::new(settings, Arc::clone(&auth)));
        Ok(Self {
            auth,
            rest,
            realtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{PlatformError, PlatformSettings, parse_balance};
    use wallet_types::Decimal;

    #[test]
    fn settings_reject_plain_http_without_opt_in() {
        let err = PlatformSettings::new("http://localhost:54321", "anon", false).unwrap_err();
        assert!(matches!(err, PlatformError::Settings(_)));
        assert!(PlatformSettings::new("http://localhost:54321", "anon", true).is_ok());
    }

    #[test]
    fn settings_reject_empty_anon_key() {
        assert!(PlatformSettings::new("https://project.example.co", "  ", false).is_err());
    }

    #[test]
    fn urls_are_joined_under_base_path() {
        let settings =
            PlatformSettings::new("https://project.example.co/base", "anon", false).unwrap();
        assert_eq!(
            settings.rest_url().unwrap().as_str(),
            "https://project.example.co/base/rest/v1/users"
        );
        assert_eq!(
            settings.auth_url("token").unwrap().as_str(),
            "https://project.example.co/base/auth/v1/token"
        );
    }

    #[test]
    fn realtime_url_uses_websocket_scheme() {
        let secure = PlatformSettings::new("https://project.example.co", "anon", false).unwrap();
        assert_eq!(
            secure.realtime_url().unwrap().as_str(),
            "wss://project.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let local = PlatformSettings::new("http://127.0.0.1:54321", "anon", true).unwrap();
        assert_eq!(local.realtime_url().unwrap().scheme(), "ws");
    }

    #[test]
    fn parse_balance_accepts_numbers_and_strings() {
        let expected = Decimal::new(4250, 2);
        let number = serde_json::json!({ "balance": 42.50 });
        let string = serde_json::json!({ "balance": "42.50" });
        assert_eq!(parse_balance(&number, "balance").unwrap(), expected);
        assert_eq!(parse_balance(&string, "balance").unwrap(), expected);
    }

    #[test]
    fn parse_balance_rejects_missing_and_null() {
        let missing = serde_json::json!({ "other": 1 });
        let null = serde_json::json!({ "balance": null });
        assert!(matches!(
            parse_balance(&missing, "balance"),
            Err(PlatformError::Decode(_))
        ));
        assert!(matches!(
            parse_balance(&null, "balance"),
            Err(PlatformError::Decode(_))
        ));
    }
}
