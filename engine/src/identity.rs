//! Current authenticated identity, kept up to date from the session source.

use std::future::Future;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use wallet_platform::SessionSource;
use wallet_types::{AuthChange, Identity};

/// Publishes the current identity.
///
/// Starts signed out, issues exactly one session resolution, and listens to
/// auth-state changes for as long as it lives. Once any auth-state event has
/// arrived the event stream is authoritative and a late resolution result is
/// dropped.
#[derive(Debug)]
pub struct IdentityResolver {
    rx: watch::Receiver<Identity>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl IdentityResolver {
    /// Spawn the resolver task on the current runtime.
    pub fn spawn<S: SessionSource>(source: S) -> Self {
        let (tx, rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(source, tx, stop_rx));
        Self {
            rx,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    #[must_use]
    pub fn current(&self) -> Identity {
        self.rx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Identity> {
        self.rx.clone()
    }

    /// Release the auth listener and wait for the task to finish. Nothing is
    /// published afterwards.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            tracing::error!("Identity resolver task panicked: {e}");
        }
    }
}

impl Drop for IdentityResolver {
    fn drop(&mut self) {
        // Aborting drops the task's subscription, which disposes the listener.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn publish(tx: &watch::Sender<Identity>, identity: Identity) -> bool {
    tx.send_if_modified(|current| {
        if *current == identity {
            false
        } else {
            *current = identity;
            true
        }
    })
}

async fn run<S: SessionSource>(
    source: S,
    tx: watch::Sender<Identity>,
    stop: impl Future + Send,
) {
    let mut changes = source.auth_changes();
    let resolution = source.resolve_session();
    tokio::pin!(resolution);
    tokio::pin!(stop);

    let mut resolving = true;
    let mut listening = true;
    let mut authoritative = false;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            result = &mut resolution, if resolving => {
                resolving = false;
                if authoritative {
                    tracing::debug!("Discarding session resolution that lost to an auth event");
                    continue;
                }
                let identity = result.unwrap_or_else(|e| {
                    tracing::warn!("Session resolution failed, continuing signed out: {e}");
                    None
                });
                match &identity {
                    Some(user) => tracing::info!(user = %user, "Resolved cached session"),
                    None => tracing::info!("No session; signed out"),
                }
                publish(&tx, identity);
            }
            change = changes.recv(), if listening => {
                let Some(AuthChange { event, identity }) = change else {
                    tracing::debug!("Auth-state stream ended");
                    listening = false;
                    continue;
                };
                authoritative = true;
                let changed = publish(&tx, identity);
                tracing::debug!(event = event.as_str(), changed, "Auth-state change");
            }
        }
    }

    changes.unsubscribe();
    tracing::debug!("Identity resolver stopped");
}
