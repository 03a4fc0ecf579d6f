//! Balance synchronizer: one task combining identity and visibility into
//! fetch and subscribe decisions.

use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use wallet_platform::{BalanceSource, ChangeFeed, ChangeSubscription, PlatformError};
use wallet_types::{BalanceChange, BalanceView, Decimal, Identity, UserId, Visibility};

use crate::lifecycle::{SyncAction, SyncTarget, reconcile};

struct FetchOutcome {
    user: UserId,
    result: Result<Decimal, PlatformError>,
}

/// Owns the balance view and the single live change subscription.
///
/// Construct with the identity and visibility receivers, then either
/// [`spawn`](Self::spawn) it or drive [`run`](Self::run) yourself. The
/// view starts `Unknown`.
pub struct BalanceSynchronizer<S, F> {
    store: Arc<S>,
    feed: F,
    identity: watch::Receiver<Identity>,
    visibility: watch::Receiver<Visibility>,
    view: watch::Sender<BalanceView>,
    /// Last non-loading view; what a failed fetch falls back to.
    settled: BalanceView,
    target: SyncTarget,
    subscription: Option<ChangeSubscription>,
    fetches: FuturesUnordered<BoxFuture<'static, FetchOutcome>>,
    /// Users with a fetch in `fetches`, one entry per fetch.
    in_flight: Vec<UserId>,
}

impl<S, F> std::fmt::Debug for BalanceSynchronizer<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceSynchronizer")
            .field("view", &*self.view.borrow())
            .field("settled", &self.settled)
            .field("target", &self.target)
            .field("subscription", &self.subscription)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl<S: BalanceSource, F: ChangeFeed> BalanceSynchronizer<S, F> {
    pub fn new(
        store: S,
        feed: F,
        identity: watch::Receiver<Identity>,
        visibility: watch::Receiver<Visibility>,
    ) -> Self {
        let (view, _rx) = watch::channel(BalanceView::Unknown);
        Self {
            store: Arc::new(store),
            feed,
            identity,
            visibility,
            view,
            settled: BalanceView::Unknown,
            target: SyncTarget::SignedOut,
            subscription: None,
            fetches: FuturesUnordered::new(),
            in_flight: Vec::new(),
        }
    }

    #[must_use]
    pub fn view(&self) -> watch::Receiver<BalanceView> {
        self.view.subscribe()
    }

    /// Run until both inputs are gone.
    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await;
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> SynchronizerHandle {
        let view = self.view();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run_until(stop_rx));
        SynchronizerHandle {
            view,
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    async fn run_until(mut self, shutdown: impl Future) {
        tokio::pin!(shutdown);
        let mut identity_open = true;
        let mut visibility_open = true;

        self.reevaluate();

        while identity_open || visibility_open {
            tokio::select! {
                _ = &mut shutdown => break,
                changed = self.identity.changed(), if identity_open => {
                    match changed {
                        Ok(()) => self.reevaluate(),
                        Err(_) => identity_open = false,
                    }
                }
                changed = self.visibility.changed(), if visibility_open => {
                    match changed {
                        Ok(()) => self.reevaluate(),
                        Err(_) => visibility_open = false,
                    }
                }
                Some(outcome) = self.fetches.next(), if !self.fetches.is_empty() => {
                    self.complete_fetch(outcome);
                }
                change = next_change(&mut self.subscription) => match change {
                    Some(change) => self.apply_change(change),
                    None => self.feed_closed(),
                },
            }
        }

        self.teardown();
        tracing::debug!("Balance synchronizer stopped");
    }

    fn reevaluate(&mut self) {
        let identity = self.identity.borrow_and_update().clone();
        let visibility = *self.visibility.borrow_and_update();
        let next = SyncTarget::derive(identity.as_ref(), visibility);
        if next == self.target {
            return;
        }

        let actions = reconcile(&self.target, &next);
        tracing::debug!(from = ?self.target, to = ?next, "Sync target changed");
        self.target = next;
        for action in actions {
            self.apply(action);
        }
    }

    fn apply(&mut self, action: SyncAction) {
        match action {
            SyncAction::Teardown => self.teardown(),
            SyncAction::ResetView => {
                self.settled = BalanceView::Unknown;
                self.publish(BalanceView::Unknown);
            }
            SyncAction::Fetch(user) => self.start_fetch(user),
            SyncAction::Subscribe(user) => self.subscribe(&user),
        }
    }

    fn start_fetch(&mut self, user: UserId) {
        tracing::debug!(user = %user, "Fetching balance");
        self.publish(BalanceView::Loading);
        self.in_flight.push(user.clone());
        let store = Arc::clone(&self.store);
        self.fetches.push(Box::pin(async move {
            let result = store.fetch_balance(&user).await;
            FetchOutcome { user, result }
        }));
    }

    fn complete_fetch(&mut self, outcome: FetchOutcome) {
        let FetchOutcome { user, result } = outcome;
        if let Some(index) = self.in_flight.iter().position(|pending| *pending == user) {
            self.in_flight.swap_remove(index);
        }

        if self.target.user() != Some(&user) {
            tracing::debug!(user = %user, "Discarding balance fetched for a previous identity");
            self.restore_if_idle();
            return;
        }

        match result {
            Ok(balance) => self.settle(BalanceView::Value(balance)),
            Err(e) => {
                tracing::warn!(user = %user, "Balance fetch failed: {e}");
                self.restore_if_idle();
            }
        }
    }

    /// Loading only stands for a fetch of the current target's user; once none
    /// is left, fall back to the settled view.
    fn restore_if_idle(&self) {
        let waiting = self
            .target
            .user()
            .is_some_and(|target| self.in_flight.contains(target));
        if !waiting {
            self.publish(self.settled);
        }
    }

    fn subscribe(&mut self, user: &UserId) {
        self.teardown();
        let subscription = self.feed.subscribe(user);
        tracing::info!(user = %user, topic = subscription.topic(), "Listening for balance changes");
        self.subscription = Some(subscription);
    }

    fn teardown(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
            tracing::debug!(topic = subscription.topic(), "Stopped listening for balance changes");
        }
    }

    fn apply_change(&mut self, change: BalanceChange) {
        let subscribed = self.subscription.as_ref().map(ChangeSubscription::user);
        if subscribed != Some(&change.user) || self.target.user() != Some(&change.user) {
            tracing::debug!(user = %change.user, "Ignoring change for another identity");
            return;
        }
        self.settle(BalanceView::Value(change.balance));
    }

    fn feed_closed(&mut self) {
        if let Some(subscription) = self.subscription.as_ref() {
            tracing::warn!(
                topic = subscription.topic(),
                "Change feed closed; balance refreshes on next foreground"
            );
        }
        self.teardown();
    }

    fn settle(&mut self, view: BalanceView) {
        self.settled = view;
        self.publish(view);
    }

    fn publish(&self, view: BalanceView) {
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

async fn next_change(subscription: &mut Option<ChangeSubscription>) -> Option<BalanceChange> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

/// Running synchronizer task.
#[derive(Debug)]
pub struct SynchronizerHandle {
    view: watch::Receiver<BalanceView>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SynchronizerHandle {
    #[must_use]
    pub fn view(&self) -> watch::Receiver<BalanceView> {
        self.view.clone()
    }

    #[must_use]
    pub fn current(&self) -> BalanceView {
        *self.view.borrow()
    }

    /// Stop the task; the live subscription is disposed before this returns.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            tracing::error!("Balance synchronizer task panicked: {e}");
        }
    }
}

impl Drop for SynchronizerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
