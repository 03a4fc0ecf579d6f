#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use wallet_platform::{
    AuthSubscription, BalanceSource, ChangeFeed, ChangeSubscription, Disposer, PlatformError,
    Result, SessionSource,
};
use wallet_types::{AuthChange, BalanceChange, Decimal, Identity, UserId};

const WAIT: Duration = Duration::from_secs(2);

pub fn user(id: &str) -> UserId {
    UserId::new(id).expect("valid user id")
}

pub fn amount(text: &str) -> Decimal {
    text.parse().expect("decimal literal")
}

pub fn failure() -> PlatformError {
    PlatformError::Api {
        status: 503,
        body: "unavailable".to_string(),
    }
}

/// Poll `condition` until it holds or the wait budget runs out.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub async fn wait_for<T: Clone + std::fmt::Debug>(
    rx: &mut watch::Receiver<T>,
    what: &str,
    predicate: impl FnMut(&T) -> bool,
) -> T {
    let outcome = match tokio::time::timeout(WAIT, rx.wait_for(predicate)).await {
        Ok(Ok(value)) => Ok(value.clone()),
        Ok(Err(_)) => Err("sender dropped"),
        Err(_) => Err("timed out"),
    };
    match outcome {
        Ok(value) => value,
        Err(reason) => panic!("{reason} waiting for {what}; last {:?}", *rx.borrow()),
    }
}

// ============================================================================
// Session source
// ============================================================================

#[derive(Debug, Default)]
pub struct FakeSession {
    resolution: Mutex<Option<oneshot::Receiver<Result<Identity>>>>,
    resolve_calls: AtomicUsize,
    listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<AuthChange>>>>,
    active: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl FakeSession {
    /// A source whose resolution completes when the returned sender fires.
    pub fn gated() -> (Arc<Self>, oneshot::Sender<Result<Identity>>) {
        let (tx, rx) = oneshot::channel();
        let session = Self {
            resolution: Mutex::new(Some(rx)),
            ..Self::default()
        };
        (Arc::new(session), tx)
    }

    pub fn resolving_to(result: Result<Identity>) -> Arc<Self> {
        let (session, tx) = Self::gated();
        let _ = tx.send(result);
        session
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn active_listeners(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn released_listeners(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Deliver to every registered listener; returns how many accepted it.
    pub fn emit(&self, change: &AuthChange) -> usize {
        let listeners = self.listeners.lock().unwrap();
        listeners
            .iter()
            .filter(|tx| tx.send(change.clone()).is_ok())
            .count()
    }
}

impl SessionSource for FakeSession {
    async fn resolve_session(&self) -> Result<Identity> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.resolution.lock().unwrap().take();
        match pending {
            Some(rx) => rx.await.unwrap_or(Ok(None)),
            None => Ok(None),
        }
    }

    fn auth_changes(&self) -> AuthSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().unwrap().push(tx);
        self.active.fetch_add(1, Ordering::SeqCst);

        let active = Arc::clone(&self.active);
        let released = Arc::clone(&self.released);
        AuthSubscription::new(
            rx,
            Disposer::new(move || {
                active.fetch_sub(1, Ordering::SeqCst);
                released.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }
}

// ============================================================================
// Balance source
// ============================================================================

/// Point queries park until the test answers them.
#[derive(Debug, Default)]
pub struct FakeStore {
    calls: Mutex<Vec<UserId>>,
    pending: Mutex<VecDeque<oneshot::Sender<Result<Decimal>>>>,
}

impl FakeStore {
    pub fn calls(&self) -> Vec<UserId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub async fn wait_for_calls(&self, count: usize) {
        eventually(&format!("{count} fetches"), || self.call_count() >= count).await;
    }

    /// Answer the oldest outstanding fetch.
    pub fn respond(&self, result: Result<Decimal>) {
        let tx = self
            .pending
            .lock()
            .unwrap()
            .pop_front()
            .expect("no fetch outstanding");
        let _ = tx.send(result);
    }

    /// Answer the most recent outstanding fetch.
    pub fn respond_newest(&self, result: Result<Decimal>) {
        let tx = self
            .pending
            .lock()
            .unwrap()
            .pop_back()
            .expect("no fetch outstanding");
        let _ = tx.send(result);
    }
}

impl BalanceSource for FakeStore {
    async fn fetch_balance(&self, user: &UserId) -> Result<Decimal> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push_back(tx);
        self.calls.lock().unwrap().push(user.clone());
        rx.await.unwrap_or_else(|_| Err(failure()))
    }
}

// ============================================================================
// Change feed
// ============================================================================

#[derive(Debug, Default)]
struct FeedState {
    open: usize,
    max_open: usize,
    opened: Vec<UserId>,
    disposed: Vec<UserId>,
    channels: Vec<(UserId, mpsc::Sender<BalanceChange>)>,
}

#[derive(Debug, Default)]
pub struct FakeFeed {
    state: Arc<Mutex<FeedState>>,
}

impl FakeFeed {
    pub fn open(&self) -> usize {
        self.state.lock().unwrap().open
    }

    pub fn max_open(&self) -> usize {
        self.state.lock().unwrap().max_open
    }

    pub fn opened(&self) -> Vec<UserId> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn disposed(&self) -> Vec<UserId> {
        self.state.lock().unwrap().disposed.clone()
    }

    /// Push a change on the most recent channel opened for `channel_user`.
    pub async fn push(&self, channel_user: &UserId, change: BalanceChange) -> bool {
        let tx = {
            let state = self.state.lock().unwrap();
            state
                .channels
                .iter()
                .rev()
                .find(|(user, _)| user == channel_user)
                .map(|(_, tx)| tx.clone())
        };
        match tx {
            Some(tx) => tx.send(change).await.is_ok(),
            None => false,
        }
    }

    /// Close every channel from the server side.
    pub fn close_all(&self) {
        self.state.lock().unwrap().channels.clear();
    }
}

impl ChangeFeed for FakeFeed {
    fn subscribe(&self, user: &UserId) -> ChangeSubscription {
        let (tx, rx) = mpsc::channel(8);
        {
            let mut state = self.state.lock().unwrap();
            state.open += 1;
            state.max_open = state.max_open.max(state.open);
            state.opened.push(user.clone());
            state.channels.push((user.clone(), tx));
        }

        let state = Arc::clone(&self.state);
        let owner = user.clone();
        ChangeSubscription::new(
            user.clone(),
            format!("realtime:test:{user}"),
            rx,
            Disposer::new(move || {
                let mut state = state.lock().unwrap();
                state.open -= 1;
                state.disposed.push(owner);
            }),
        )
    }
}
