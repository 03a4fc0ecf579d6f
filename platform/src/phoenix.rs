//! Phoenix channel frames used by the realtime change feed.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use wallet_config::BalanceTable;
use wallet_types::UserId;

pub(crate) const EVENT_JOIN: &str = "phx_join";
pub(crate) const EVENT_LEAVE: &str = "phx_leave";
pub(crate) const EVENT_REPLY: &str = "phx_reply";
pub(crate) const EVENT_ERROR: &str = "phx_error";
pub(crate) const EVENT_CLOSE: &str = "phx_close";
pub(crate) const EVENT_HEARTBEAT: &str = "heartbeat";
pub(crate) const EVENT_CHANGES: &str = "postgres_changes";
pub(crate) const EVENT_SYSTEM: &str = "system";
pub(crate) const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Channel topic, scoped per user so two channels never share updates.
pub(crate) fn topic_for(channel: &str, user: &UserId) -> String {
    format!("realtime:{channel}:{user}")
}

pub(crate) fn row_filter(table: &BalanceTable, user: &UserId) -> String {
    format!("{}=eq.{user}", table.id_column)
}

pub(crate) fn join_frame(
    topic: &str,
    table: &BalanceTable,
    user: &UserId,
    access_token: &str,
    reference: &str,
) -> Frame {
    Frame {
        topic: topic.to_string(),
        event: EVENT_JOIN.to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": table.schema,
                    "table": table.table,
                    "filter": row_filter(table, user),
                }],
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
        join_ref: Some(reference.to_string()),
    }
}

pub(crate) fn leave_frame(topic: &str, reference: &str, join_ref: &str) -> Frame {
    Frame {
        topic: topic.to_string(),
        event: EVENT_LEAVE.to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: Some(join_ref.to_string()),
    }
}

pub(crate) fn heartbeat_frame(reference: &str) -> Frame {
    Frame {
        topic: PHOENIX_TOPIC.to_string(),
        event: EVENT_HEARTBEAT.to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

/// What an inbound frame means for one joined channel.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    Joined,
    /// New row image from an INSERT or UPDATE.
    Record(Value),
    /// The server refused or closed the channel.
    Rejected(String),
    Ignored,
}

fn reason(payload: &Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .or_else(|| payload.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("no reason given")
        .to_string()
}

pub(crate) fn classify(frame: &Frame, topic: &str, join_ref: &str) -> Inbound {
    if frame.topic != topic {
        return Inbound::Ignored;
    }

    match frame.event.as_str() {
        EVENT_REPLY if frame.reference.as_deref() == Some(join_ref) => {
            match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Inbound::Joined,
                _ => Inbound::Rejected(reason(&frame.payload)),
            }
        }
        EVENT_CHANGES => {
            let Some(data) = frame.payload.get("data") else {
                return Inbound::Ignored;
            };
            match data.get("record") {
                Some(record) if record.is_object() => Inbound::Record(record.clone()),
                // DELETE carries only old_record.
                _ => Inbound::Ignored,
            }
        }
        EVENT_SYSTEM => match frame.payload.get("status").and_then(Value::as_str) {
            Some("error") => Inbound::Rejected(reason(&frame.payload)),
            _ => Inbound::Ignored,
        },
        EVENT_ERROR => Inbound::Rejected("channel error".to_string()),
        EVENT_CLOSE => Inbound::Rejected("channel closed by server".to_string()),
        _ => Inbound::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::{Frame, Inbound, classify, heartbeat_frame, join_frame, leave_frame, topic_for};
    use serde_json::json;
    use wallet_config::BalanceTable;
    use wallet_types::UserId;

    const TOPIC: &str = "realtime:balance-updates:u1";

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    fn inbound(raw: serde_json::Value) -> Frame {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn topic_is_scoped_by_user() {
        assert_eq!(topic_for("balance-updates", &user()), TOPIC);
    }

    #[test]
    fn join_frame_filters_on_user_row() {
        let frame = join_frame(TOPIC, &BalanceTable::default(), &user(), "jwt", "1");
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["event"], "phx_join");
        assert_eq!(encoded["ref"], "1");
        assert_eq!(encoded["join_ref"], "1");
        let change = &encoded["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "users");
        assert_eq!(change["schema"], "public");
        assert_eq!(change["filter"], "id=eq.u1");
        assert_eq!(encoded["payload"]["access_token"], "jwt");
    }

    #[test]
    fn heartbeat_and_leave_frames() {
        let heartbeat = serde_json::to_value(heartbeat_frame("7")).unwrap();
        assert_eq!(heartbeat["topic"], "phoenix");
        assert_eq!(heartbeat["event"], "heartbeat");
        assert!(heartbeat.get("join_ref").is_none());

        let leave = serde_json::to_value(leave_frame(TOPIC, "8", "1")).unwrap();
        assert_eq!(leave["event"], "phx_leave");
        assert_eq!(leave["topic"], TOPIC);
    }

    #[test]
    fn join_reply_ok_and_error() {
        let ok = inbound(json!({
            "topic": TOPIC, "event": "phx_reply", "ref": "1",
            "payload": { "status": "ok", "response": { "postgres_changes": [] } }
        }));
        assert_eq!(classify(&ok, TOPIC, "1"), Inbound::Joined);

        let err = inbound(json!({
            "topic": TOPIC, "event": "phx_reply", "ref": "1",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } }
        }));
        assert_eq!(
            classify(&err, TOPIC, "1"),
            Inbound::Rejected("unauthorized".to_string())
        );
    }

    #[test]
    fn heartbeat_reply_is_ignored() {
        let reply = inbound(json!({
            "topic": "phoenix", "event": "phx_reply", "ref": "2",
            "payload": { "status": "ok", "response": {} }
        }));
        assert_eq!(classify(&reply, TOPIC, "1"), Inbound::Ignored);
    }

    #[test]
    fn update_yields_new_record() {
        let frame = inbound(json!({
            "topic": TOPIC, "event": "postgres_changes", "ref": null,
            "payload": {
                "data": {
                    "type": "UPDATE", "schema": "public", "table": "users",
                    "commit_timestamp": "2026-01-01T00:00:00Z",
                    "record": { "id": "u1", "balance": 55.0 },
                    "old_record": { "id": "u1" }
                },
                "ids": [7]
            }
        }));
        assert_eq!(
            classify(&frame, TOPIC, "1"),
            Inbound::Record(json!({ "id": "u1", "balance": 55.0 }))
        );
    }

    #[test]
    fn delete_and_foreign_topics_are_ignored() {
        let delete = inbound(json!({
            "topic": TOPIC, "event": "postgres_changes",
            "payload": { "data": { "type": "DELETE", "old_record": { "id": "u1" } } }
        }));
        assert_eq!(classify(&delete, TOPIC, "1"), Inbound::Ignored);

        let foreign = inbound(json!({
            "topic": "realtime:balance-updates:u2", "event": "postgres_changes",
            "payload": { "data": { "record": { "id": "u2", "balance": 1 } } }
        }));
        assert_eq!(classify(&foreign, TOPIC, "1"), Inbound::Ignored);
    }

    #[test]
    fn system_error_rejects_channel() {
        let frame = inbound(json!({
            "topic": TOPIC, "event": "system",
            "payload": { "status": "error", "message": "invalid filter", "extension": "postgres_changes" }
        }));
        assert_eq!(
            classify(&frame, TOPIC, "1"),
            Inbound::Rejected("invalid filter".to_string())
        );
    }
}
