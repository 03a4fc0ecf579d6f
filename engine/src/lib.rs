//! Visibility-gated balance synchronization.
//!
//! Two independent producers feed one consumer:
//!
//! - [`VisibilitySignal`] - whether the application is in front of the user
//! - [`IdentityResolver`] - the current authenticated identity, if any
//! - [`BalanceSynchronizer`] - combines both into point fetches and a single
//!   push subscription, and publishes the renderable [`BalanceView`]
//!
//! The decisions themselves are the pure [`SyncTarget`]/[`reconcile`] pair in
//! [`lifecycle`]; the synchronizer only executes the resulting actions.
//!
//! Nothing in this crate returns an error to its caller. Resolution failure
//! reads as signed out, fetch failure keeps the previous view, and a change
//! feed that cannot be established leaves fetch-on-foreground as the only
//! source of freshness.
//!
//! [`BalanceView`]: wallet_types::BalanceView

mod identity;
pub mod lifecycle;
mod synchronizer;
mod visibility;

pub use identity::IdentityResolver;
pub use lifecycle::{SyncAction, SyncTarget, reconcile};
pub use synchronizer::{BalanceSynchronizer, SynchronizerHandle};
pub use visibility::VisibilitySignal;
