//! Auth session model and its on-disk cache.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use wallet_types::{SecretString, UserId};

use crate::{PlatformError, Result};

/// Refresh this many seconds before the token actually expires.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// An authenticated session as issued by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Unix seconds.
    pub expires_at: i64,
    pub user: SessionUser,
}

impl Session {
    #[must_use]
    pub fn needs_refresh_at(&self, now: i64) -> bool {
        now.saturating_add(EXPIRY_MARGIN_SECS) >= self.expires_at
    }

    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(chrono::Utc::now().timestamp())
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }
}

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: SecretString,
    refresh_token: SecretString,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: SessionUser,
}

impl TokenResponse {
    pub(crate) fn into_session(self, now: i64) -> Session {
        let expires_at = self.expires_at.unwrap_or_else(|| {
            now.saturating_add(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
        });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// File-backed session cache. Without a path it keeps nothing.
#[derive(Debug, Clone)]
pub struct SessionCache {
    path: Option<PathBuf>,
}

impl SessionCache {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load(&self) -> Result<Option<Session>> {
        let Some(path) = self.path.as_deref() else {
            return Ok(None);
        };
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PlatformError::SessionCache {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| PlatformError::Decode(format!("session cache {}: {e}", path.display())))
    }

    /// Write atomically with owner-only permissions.
    pub fn save(&self, session: &Session) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(session)
            .map_err(|e| PlatformError::Decode(format!("serialize session: {e}")))?;
        write_owner_only(path, &bytes).map_err(|source| PlatformError::SessionCache {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn clear(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PlatformError::SessionCache {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
    }
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
