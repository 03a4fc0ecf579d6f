//! Pure derivation of what the synchronizer should be doing.
//!
//! The synchronizer keeps the last [`SyncTarget`] it acted on. Whenever
//! either input changes it derives the next target and runs the
//! [`reconcile`] actions in order. Keeping this free of IO makes the whole
//! lifecycle table checkable without a runtime.

use wallet_types::{UserId, Visibility};

/// Where the synchronizer should be for a given (identity, visibility) pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncTarget {
    /// No identity: nothing fetched, nothing subscribed, view unknown.
    #[default]
    SignedOut,
    /// Identity known but backgrounded: no subscription, view retained.
    Dormant(UserId),
    /// Identity known and foregrounded: fetched once and subscribed.
    Live(UserId),
}

impl SyncTarget {
    #[must_use]
    pub fn derive(identity: Option<&UserId>, visibility: Visibility) -> Self {
        match identity {
            None => Self::SignedOut,
            Some(user) if visibility.is_foreground() => Self::Live(user.clone()),
            Some(user) => Self::Dormant(user.clone()),
        }
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserId> {
        match self {
            Self::SignedOut => None,
            Self::Dormant(user) | Self::Live(user) => Some(user),
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Dispose the current subscription, if any.
    Teardown,
    /// Forget the displayed and settled balance.
    ResetView,
    /// Point fetch; the view goes to `Loading` at issue time.
    Fetch(UserId),
    Subscribe(UserId),
}

/// Ordered actions that move the synchronizer from `previous` to `next`.
///
/// A subscription is always preceded by a teardown, and a balance never
/// survives a change of identity.
#[must_use]
pub fn reconcile(previous: &SyncTarget, next: &SyncTarget) -> Vec<SyncAction> {
    if previous == next {
        return Vec::new();
    }

    let mut actions = Vec::with_capacity(4);
    if previous.is_live() || next.is_live() {
        actions.push(SyncAction::Teardown);
    }
    if previous.user().is_some() && previous.user() != next.user() {
        actions.push(SyncAction::ResetView);
    }
    if let SyncTarget::Live(user) = next {
        actions.push(SyncAction::Fetch(user.clone()));
        actions.push(SyncAction::Subscribe(user.clone()));
    }
    actions
}
