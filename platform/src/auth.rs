//! Auth endpoint client and the auth-state listener registry.
//!
//! The current session lives behind an async mutex so that a refresh and a
//! concurrent token read can never race into two refresh requests.
//!
//! `wallet login` and `wallet logout` run as separate processes; a long-lived
//! client sees their effect through [`AuthClient::watch_cache`], which polls
//! the session file and turns a changed principal into an auth-state event.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use wallet_types::{AuthChange, AuthEvent, Identity, SecretString, UserId};

use crate::session::{Session, SessionCache, TokenResponse};
use crate::{
    AuthSubscription, Disposer, PlatformError, PlatformSettings, Result, SessionSource,
    ensure_success,
};

/// How often a watching client re-reads the session file.
pub const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct Listeners {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<AuthChange>>,
}

#[derive(Debug)]
pub struct AuthClient {
    http: reqwest::Client,
    settings: Arc<PlatformSettings>,
    cache: SessionCache,
    session: tokio::sync::Mutex<Option<Session>>,
    listeners: Arc<Mutex<Listeners>>,
}

impl AuthClient {
    pub fn new(http: reqwest::Client, settings: Arc<PlatformSettings>, cache: SessionCache) -> Self {
        Self {
            http,
            settings,
            cache,
            session: tokio::sync::Mutex::new(None),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    /// Number of live auth-state listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .senders
            .len()
    }

    pub async fn current_user(&self) -> Option<UserId> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.user_id().clone())
    }

    /// Load the cached session, refreshing it first when it is about to expire.
    pub async fn resolve(&self) -> Result<Identity> {
        let mut guard = self.session.lock().await;
        let cached = match guard.clone() {
            Some(session) => Some(session),
            None => self.cache.load()?,
        };
        let Some(session) = cached else {
            tracing::debug!("No cached session");
            return Ok(None);
        };

        let session = if session.needs_refresh() {
            match self.refresh_locked(&session).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    if is_rejection(&e) {
                        self.forget_rejected(&mut guard);
                    }
                    return Err(e);
                }
            }
        } else {
            session
        };

        let user = session.user_id().clone();
        *guard = Some(session);
        tracing::info!(user = %user, "Session resolved");
        Ok(Some(user))
    }

    /// Password grant. Persists the session and notifies listeners.
    pub async fn sign_in_with_password(&self, email: &str, password: &SecretString) -> Result<UserId> {
        let url = self.grant_url("password")?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "email": email, "password": password.expose_secret() }))
            .send()
            .await?;
        let session = self.read_token_response(response).await?;
        let user = session.user_id().clone();

        let mut guard = self.session.lock().await;
        self.store(&session);
        *guard = Some(session);
        drop(guard);

        tracing::info!(user = %user, "Signed in");
        self.emit(&AuthChange::signed_in(user.clone()));
        Ok(user)
    }

    /// Revoke the session server-side (best effort) and forget it locally.
    pub async fn sign_out(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = match guard.take() {
            Some(session) => Some(session),
            None => self.cache.load().unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable session cache on sign-out: {e}");
                None
            }),
        };

        if let Some(session) = session {
            let url = self.settings.auth_url("logout")?;
            let outcome = self
                .http
                .post(url)
                .bearer_auth(session.access_token.expose_secret())
                .send()
                .await;
            match outcome {
                Ok(response) => {
                    if let Err(e) = ensure_success(response).await {
                        tracing::warn!("Server-side logout failed: {e}");
                    }
                }
                Err(e) => tracing::warn!("Server-side logout failed: {e}"),
            }
        }

        self.cache.clear()?;
        drop(guard);

        tracing::info!("Signed out");
        self.emit(&AuthChange::signed_out());
        Ok(())
    }

    /// Bearer token for data requests.
    ///
    /// Refreshes an expiring session first. Signed-out callers get the anon key.
    pub async fn access_token(&self) -> Result<SecretString> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_ref() else {
            return Ok(self.settings.anon_key().clone());
        };
        if !session.needs_refresh() {
            return Ok(session.access_token.clone());
        }

        let current = session.clone();
        match self.refresh_locked(&current).await {
            Ok(refreshed) => {
                let token = refreshed.access_token.clone();
                *guard = Some(refreshed);
                Ok(token)
            }
            Err(e) => {
                if is_rejection(&e) {
                    self.forget_rejected(&mut guard);
                    drop(guard);
                    self.emit(&AuthChange::signed_out());
                }
                Err(e)
            }
        }
    }

    /// Adopt whatever another process left in the session file.
    ///
    /// Newer tokens for the same principal are taken silently. A different
    /// principal (or none) is announced as `SignedIn`/`SignedOut` and returned.
    pub async fn reload_cache(&self) -> Result<Option<AuthChange>> {
        if self.cache.path().is_none() {
            return Ok(None);
        }
        let mut guard = self.session.lock().await;
        let stored = self.cache.load()?;
        if *guard == stored {
            return Ok(None);
        }

        let previous = guard.as_ref().map(|s| s.user_id().clone());
        let current = stored.as_ref().map(|s| s.user_id().clone());
        *guard = stored;
        drop(guard);

        if previous == current {
            tracing::debug!("Adopted session tokens written by another process");
            return Ok(None);
        }
        let change = match current {
            Some(user) => {
                tracing::info!(user = %user, "Session file now holds another principal");
                AuthChange::signed_in(user)
            }
            None => {
                tracing::info!("Session file cleared by another process");
                AuthChange::signed_out()
            }
        };
        self.emit(&change);
        Ok(Some(change))
    }

    /// Poll the session file every `every` until the returned handle is
    /// dropped or the client goes away.
    #[must_use]
    pub fn watch_cache(self: &Arc<Self>, every: Duration) -> CacheWatch {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + every, every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(client) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = client.reload_cache().await {
                    tracing::debug!("Skipping unreadable session file: {e}");
                }
            }
        });
        CacheWatch { task }
    }

    /// Drop a session the server refused. Caller holds the session lock.
    fn forget_rejected(&self, guard: &mut Option<Session>) {
        tracing::info!("Session was rejected; clearing it");
        *guard = None;
        if let Err(e) = self.cache.clear() {
            tracing::warn!("Failed to clear session cache: {e}");
        }
    }

    /// Exchange the refresh token. Caller holds the session lock.
    async fn refresh_locked(&self, session: &Session) -> Result<Session> {
        let url = self.grant_url("refresh_token")?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "refresh_token": session.refresh_token.expose_secret() }))
            .send()
            .await?;
        let refreshed = self.read_token_response(response).await?;
        self.store(&refreshed);

        let previous = session.user_id();
        let current = refreshed.user_id().clone();
        tracing::debug!(user = %current, "Session refreshed");
        let event = if *previous == current {
            AuthEvent::TokenRefreshed
        } else {
            AuthEvent::SignedIn
        };
        self.emit(&AuthChange {
            event,
            identity: Some(current),
        });
        Ok(refreshed)
    }

    fn grant_url(&self, grant_type: &str) -> Result<url::Url> {
        let mut url = self.settings.auth_url("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        Ok(url)
    }

    async fn read_token_response(&self, response: reqwest::Response) -> Result<Session> {
        let response = ensure_success(response).await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(format!("token response: {e}")))?;
        Ok(body.into_session(chrono::Utc::now().timestamp()))
    }

    fn store(&self, session: &Session) {
        if let Err(e) = self.cache.save(session) {
            tracing::warn!("Failed to persist session: {e}");
        }
    }

    fn emit(&self, change: &AuthChange) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners
            .senders
            .retain(|_, tx| tx.send(change.clone()).is_ok());
        tracing::debug!(
            event = change.event.as_str(),
            listeners = listeners.senders.len(),
            "Auth state change"
        );
    }

    fn register(&self) -> AuthSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let id = listeners.next_id;
            listeners.next_id = listeners.next_id.wrapping_add(1);
            listeners.senders.insert(id, tx);
            id
        };

        let registry = Arc::downgrade(&self.listeners);
        let disposer = Disposer::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .senders
                    .remove(&id);
            }
        });
        AuthSubscription::new(rx, disposer)
    }
}

/// The server refused the credentials themselves, not just the request.
fn is_rejection(err: &PlatformError) -> bool {
    matches!(err.status(), Some(400 | 401 | 403))
}

/// Running session-file poller; stops on drop.
#[derive(Debug)]
pub struct CacheWatch {
    task: JoinHandle<()>,
}

impl Drop for CacheWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SessionSource for AuthClient {
    fn resolve_session(&self) -> impl Future<Output = Result<Identity>> + Send {
        self.resolve()
    }

    fn auth_changes(&self) -> AuthSubscription {
        self.register()
    }
}
