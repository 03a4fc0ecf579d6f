//! Realtime change feed over a Phoenix channel.
//!
//! Each [`ChangeFeed::subscribe`] call spawns one task that owns one
//! WebSocket. The task joins a channel scoped to the user, forwards new row
//! images as [`BalanceChange`]s, and exits on disposal, server rejection, or
//! when the receiving side goes away. Nothing reconnects; a dead channel
//! just stops delivering.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, Message};
use wallet_types::{BalanceChange, UserId};

use crate::phoenix::{self, Frame, Inbound};
use crate::{
    AuthClient, ChangeFeed, ChangeSubscription, Disposer, PlatformError, PlatformSettings, Result,
    parse_balance,
};

const DEFAULT_HEARTBEAT_SECS: u64 = 25;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const CHANGE_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug)]
pub struct RealtimeClient {
    settings: Arc<PlatformSettings>,
    auth: Arc<AuthClient>,
    heartbeat: Duration,
}

impl RealtimeClient {
    pub fn new(settings: Arc<PlatformSettings>, auth: Arc<AuthClient>) -> Self {
        Self {
            settings,
            auth,
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        }
    }

    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }
}

struct ChannelParams {
    settings: Arc<PlatformSettings>,
    auth: Arc<AuthClient>,
    heartbeat: Duration,
    user: UserId,
    topic: String,
}

impl ChangeFeed for RealtimeClient {
    fn subscribe(&self, user: &UserId) -> ChangeSubscription {
        let topic = phoenix::topic_for(&self.settings.table().channel, user);
        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();

        let params = ChannelParams {
            settings: Arc::clone(&self.settings),
            auth: Arc::clone(&self.auth),
            heartbeat: self.heartbeat,
            user: user.clone(),
            topic: topic.clone(),
        };
        tokio::spawn(run_channel(params, tx, stop_rx));

        let disposer = Disposer::new(move || {
            let _ = stop_tx.send(());
        });
        ChangeSubscription::new(user.clone(), topic, rx, disposer)
    }
}

async fn run_channel(
    params: ChannelParams,
    tx: mpsc::Sender<BalanceChange>,
    mut stop: oneshot::Receiver<()>,
) {
    match drive_channel(&params, &tx, &mut stop).await {
        Ok(()) => tracing::debug!(topic = %params.topic, "Realtime channel closed"),
        Err(e) => tracing::warn!(
            topic = %params.topic,
            "Realtime channel failed, updates fall back to fetches: {e}"
        ),
    }
}

async fn send_frame<S>(ws: &mut S, frame: &Frame) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)
        .map_err(|e| PlatformError::Realtime(format!("encode {}: {e}", frame.event)))?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| PlatformError::Realtime(format!("send {}: {e}", frame.event)))
}

async fn drive_channel(
    params: &ChannelParams,
    tx: &mpsc::Sender<BalanceChange>,
    stop: &mut oneshot::Receiver<()>,
) -> Result<()> {
    let url = params.settings.realtime_url()?;
    let token = params.auth.access_token().await?;

    let connect = tokio::time::timeout(
        Duration::from_secs(CONNECT_TIMEOUT_SECS),
        tokio_tungstenite::connect_async(url.as_str()),
    );
    let (mut ws, _response) = tokio::select! {
        _ = &mut *stop => return Ok(()),
        connected = connect => connected
            .map_err(|_| PlatformError::Realtime("connect timed out".to_string()))?
            .map_err(|e| PlatformError::Realtime(format!("connect failed: {e}")))?,
    };

    let mut next_ref: u64 = 0;
    let mut make_ref = move || {
        next_ref += 1;
        next_ref.to_string()
    };

    let join_ref = make_ref();
    send_frame(
        &mut ws,
        &phoenix::join_frame(
            &params.topic,
            params.settings.table(),
            &params.user,
            token.expose_secret(),
            &join_ref,
        ),
    )
    .await?;
    tracing::debug!(topic = %params.topic, "Joining realtime channel");

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + params.heartbeat,
        params.heartbeat,
    );
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        // Disposal also closes the receiver; stop must win so the leave is sent.
        tokio::select! {
            biased;
            _ = &mut *stop => {
                let leave = phoenix::leave_frame(&params.topic, &make_ref(), &join_ref);
                let _ = send_frame(&mut ws, &leave).await;
                let _ = ws.close(None).await;
                return Ok(());
            }
            () = tx.closed() => {
                let _ = ws.close(None).await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                send_frame(&mut ws, &phoenix::heartbeat_frame(&make_ref())).await?;
            }
            message = ws.next() => {
                let Some(message) = message else {
                    return Err(PlatformError::Realtime("socket closed by server".to_string()));
                };
                let message = message
                    .map_err(|e| PlatformError::Realtime(format!("receive failed: {e}")))?;
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        return Err(PlatformError::Realtime("socket closed by server".to_string()));
                    }
                    _ => continue,
                };
                let frame: Frame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(%e, payload_bytes = text.len(), "Invalid realtime frame");
                        continue;
                    }
                };

                match phoenix::classify(&frame, &params.topic, &join_ref) {
                    Inbound::Joined => {
                        tracing::info!(topic = %params.topic, "Subscribed to balance changes");
                    }
                    Inbound::Record(record) => {
                        match parse_balance(&record, &params.settings.table().column) {
                            Ok(balance) => {
                                let change = BalanceChange {
                                    user: params.user.clone(),
                                    balance,
                                };
                                if tx.send(change).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Err(e) => tracing::warn!(topic = %params.topic, "Skipping change: {e}"),
                        }
                    }
                    Inbound::Rejected(reason) => return Err(PlatformError::Realtime(reason)),
                    Inbound::Ignored => {}
                }
            }
        }
    }
}
