//! Change feed against an in-process Phoenix-style WebSocket server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ANON_KEY, user};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use wallet_platform::{ChangeFeed, Platform, PlatformSettings, RealtimeClient};
use wallet_types::Decimal;

const TOPIC: &str = "realtime:balance-updates:u1";

async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within timeout")
            .expect("socket open")
            .expect("valid message");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn start() -> (TcpListener, RealtimeClient) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let settings = PlatformSettings::new(&base, ANON_KEY, true).unwrap();
    let platform = Platform::connect(settings.clone()).unwrap();
    let client = RealtimeClient::new(Arc::new(settings), Arc::clone(&platform.auth))
        .with_heartbeat(Duration::from_secs(60));
    (listener, client)
}

#[tokio::test]
async fn joins_user_scoped_channel_and_forwards_updates() {
    let (listener, client) = start().await;
    let mut subscription = client.subscribe(&user("u1"));
    assert_eq!(subscription.topic(), TOPIC);
    assert_eq!(subscription.user(), &user("u1"));

    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    let join = next_frame(&mut ws).await;
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["topic"], TOPIC);
    assert_eq!(join["payload"]["access_token"], ANON_KEY);
    let change = &join["payload"]["config"]["postgres_changes"][0];
    assert_eq!(change["filter"], "id=eq.u1");
    assert_eq!(change["table"], "users");
    let join_ref = join["ref"].clone();

    send(
        &mut ws,
        json!({
            "topic": TOPIC, "event": "phx_reply", "ref": join_ref,
            "payload": { "status": "ok", "response": { "postgres_changes": [] } }
        }),
    )
    .await;
    send(
        &mut ws,
        json!({
            "topic": TOPIC, "event": "postgres_changes", "ref": null,
            "payload": { "data": {
                "type": "UPDATE", "schema": "public", "table": "users",
                "record": { "id": "u1", "balance": "55.00" },
                "old_record": { "id": "u1" }
            } }
        }),
    )
    .await;

    let pushed = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pushed.user, user("u1"));
    assert_eq!(pushed.balance, Decimal::new(5500, 2));

    subscription.unsubscribe();
    assert!(!subscription.is_active());

    let leave = next_frame(&mut ws).await;
    assert_eq!(leave["event"], "phx_leave");
    assert_eq!(leave["topic"], TOPIC);
}

#[tokio::test]
async fn rejected_join_closes_the_subscription() {
    let (listener, client) = start().await;
    let mut subscription = client.subscribe(&user("u1"));

    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    let join = next_frame(&mut ws).await;
    send(
        &mut ws,
        json!({
            "topic": TOPIC, "event": "phx_reply", "ref": join["ref"].clone(),
            "payload": { "status": "error", "response": { "reason": "unauthorized" } }
        }),
    )
    .await;

    let closed = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap();
    assert_eq!(closed, None);
}

#[tokio::test]
async fn unreachable_server_never_delivers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let settings = PlatformSettings::new(&format!("http://{addr}"), ANON_KEY, true).unwrap();
    let platform = Platform::connect(settings).unwrap();
    let mut subscription = platform.realtime.subscribe(&user("u1"));

    let closed = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .unwrap();
    assert_eq!(closed, None);
}
