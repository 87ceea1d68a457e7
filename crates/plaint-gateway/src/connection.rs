use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use plaint_types::api::{Claims, ErrorCode};
use plaint_types::events::{GatewayCommand, GatewayEvent, Topic};

use crate::dispatcher::Dispatcher;
use crate::{FeedRefusal, FeedSource};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket has to send Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of a malformed command echoed into the log.
const LOG_PREVIEW_BYTES: usize = 200;

/// Handle a single WebSocket connection: Identify handshake, then watch
/// commands in and feed snapshots out until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    source: Arc<dyn FeedSource>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    let ready = GatewayEvent::Ready {
        user_id: claims.sub,
        username: claims.username.clone(),
        role: claims.role,
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    let (conn_id, open) = dispatcher.register().await;
    info!(
        "{} ({}) connected to gateway ({} open connections)",
        claims.username, claims.sub, open
    );
    run_connection_loop(sender, receiver, &dispatcher, source, conn_id, &claims).await;
    dispatcher.unregister(conn_id).await;

    info!("{} ({}) disconnected from gateway", claims.username, claims.sub);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
    source: Arc<dyn FeedSource>,
    conn_id: uuid::Uuid,
    claims: &Claims,
) {
    let mut changes_rx = dispatcher.subscribe();

    // Events produced by the recv side (initial snapshots, refusals)
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let send_source = source.clone();
    let send_claims = claims.clone();
    let send_dispatcher = dispatcher.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = changes_rx.recv() => {
                    let topic = match result {
                        Ok(topic) => topic,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Change receiver lagged by {} notifications", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !send_dispatcher.is_watching(conn_id, topic).await {
                        continue;
                    }

                    let event = match load_snapshot(&send_source, &send_claims, topic).await {
                        Ok(event) => event,
                        Err(refusal) => {
                            send_dispatcher.unwatch(conn_id, topic).await;
                            refusal_event(topic, refusal)
                        }
                    };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                result = out_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_claims = claims.clone();
    let recv_dispatcher = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        let event = handle_command(
                            &recv_dispatcher,
                            &source,
                            conn_id,
                            &recv_claims,
                            cmd,
                        )
                        .await;
                        if let Some(event) = event {
                            if out_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_claims.username,
                            recv_claims.sub,
                            e,
                            preview(&text, LOG_PREVIEW_BYTES)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Claims> {
    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Apply a client command. Returns the event to send back, if any.
async fn handle_command(
    dispatcher: &Dispatcher,
    source: &Arc<dyn FeedSource>,
    conn_id: uuid::Uuid,
    claims: &Claims,
    cmd: GatewayCommand,
) -> Option<GatewayEvent> {
    match cmd {
        GatewayCommand::Identify { .. } => None, // Already handled

        GatewayCommand::Watch { topic } => {
            debug!("{} ({}) watching {}", claims.username, claims.sub, topic);
            match load_snapshot(source, claims, topic).await {
                Ok(event) => {
                    dispatcher.watch(conn_id, topic).await;
                    Some(event)
                }
                Err(refusal) => {
                    info!(
                        "{} ({}) watch on {} refused: {}",
                        claims.username, claims.sub, topic, refusal.message
                    );
                    Some(refusal_event(topic, refusal))
                }
            }
        }

        GatewayCommand::Unwatch { topic } => {
            debug!("{} ({}) stopped watching {}", claims.username, claims.sub, topic);
            dispatcher.unwatch(conn_id, topic).await;
            None
        }
    }
}

async fn load_snapshot(
    source: &Arc<dyn FeedSource>,
    claims: &Claims,
    topic: Topic,
) -> Result<GatewayEvent, FeedRefusal> {
    let source = source.clone();
    let claims = claims.clone();
    let messages = tokio::task::spawn_blocking(move || source.snapshot(&claims, topic))
        .await
        .map_err(|e| FeedRefusal::new(ErrorCode::Internal, format!("snapshot task failed: {}", e)))??;
    Ok(GatewayEvent::ChatSnapshot { topic, messages })
}

fn refusal_event(topic: Topic, refusal: FeedRefusal) -> GatewayEvent {
    GatewayEvent::SubscriptionError {
        topic,
        code: refusal.code,
        message: refusal.message,
    }
}

/// At most `max` bytes of `text`, cut on a char boundary.
fn preview(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let end = text
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max)
        .last()
        .unwrap_or(0);
    &text[..end]
}

/// Serialize and send one event. Returns false once the socket is gone.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
