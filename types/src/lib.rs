//! Core domain types for the wallet client.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod ids;

pub use ids::{Identity, UserId, UserIdError};
pub use rust_decimal::Decimal;

use serde::{Deserialize, Serialize};

// ============================================================================
// Visibility
// ============================================================================

/// Whether the application is currently in front of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Foreground,
    /// Also the fail-closed default when the host cannot report visibility.
    #[default]
    Background,
}

impl Visibility {
    #[must_use]
    pub const fn from_foreground(foreground: bool) -> Self {
        if foreground {
            Self::Foreground
        } else {
            Self::Background
        }
    }

    #[must_use]
    pub const fn is_foreground(self) -> bool {
        matches!(self, Self::Foreground)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Balance
// ============================================================================

/// User-observable projection of the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceView {
    /// A point fetch is in flight.
    Loading,
    Value(Decimal),
    /// No balance is known (signed out, or nothing fetched yet).
    #[default]
    Unknown,
}

impl BalanceView {
    #[must_use]
    pub const fn amount(&self) -> Option<Decimal> {
        match self {
            Self::Value(amount) => Some(*amount),
            Self::Loading | Self::Unknown => None,
        }
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// A pushed row change for the subscribed user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    /// Identity the delivering channel was scoped to.
    pub user: UserId,
    pub balance: Decimal,
}

// ============================================================================
// Auth State Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

impl AuthEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SignedIn => "signed_in",
            Self::SignedOut => "signed_out",
            Self::TokenRefreshed => "token_refreshed",
        }
    }
}

/// One delivery on the auth-state stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub identity: Identity,
}

impl AuthChange {
    #[must_use]
    pub fn signed_in(user: UserId) -> Self {
        Self {
            event: AuthEvent::SignedIn,
            identity: Some(user),
        }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self {
            event: AuthEvent::SignedOut,
            identity: None,
        }
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// A credential that must never show up in logs.
///
/// Note: `Debug` is manually implemented to redact the value, preventing accidental
/// credential disclosure in logs or error messages.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(<redacted>)")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for SecretString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}
