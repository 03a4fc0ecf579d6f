#![allow(dead_code)]

use std::path::Path;

use serde_json::json;
use wallet_platform::{PlatformSettings, Session, SessionCache, SessionUser};
use wallet_types::{SecretString, UserId};
use wiremock::MockServer;

pub const ANON_KEY: &str = "anon-test-key";

pub fn user(id: &str) -> UserId {
    UserId::new(id).expect("valid user id")
}

pub fn settings(server: &MockServer) -> PlatformSettings {
    PlatformSettings::new(&server.uri(), ANON_KEY, true).expect("valid settings")
}

pub fn settings_with_session(server: &MockServer, session_path: &Path) -> PlatformSettings {
    settings(server).with_session_path(session_path)
}

pub fn cached_session(path: &Path, user_id: &str, expires_at: i64) -> Session {
    let session = Session {
        access_token: SecretString::new(format!("access-{user_id}")),
        refresh_token: SecretString::new(format!("refresh-{user_id}")),
        expires_at,
        user: SessionUser {
            id: user(user_id),
            email: None,
        },
    };
    SessionCache::new(Some(path.to_path_buf()))
        .save(&session)
        .expect("write session cache");
    session
}

pub fn token_body(user_id: &str, access: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": format!("{access}-refresh"),
        "token_type": "bearer",
        "expires_in": 3600,
        "user": { "id": user_id, "email": format!("{user_id}@example.com"), "aud": "authenticated" }
    })
}
