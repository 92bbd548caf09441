//! Websocket front door.
//!
//! A connection binds to one `(matchId, playerId)` on `join`; every later action is routed to
//! that match on behalf of that player. Broadcast events are forwarded in the order the match
//! published them; replies go to the acting connection only.

use crate::{
    metrics::{Metrics, MetricsSnapshot},
    store::{Command, MatchHandle, MatchStore, Session, StoreError},
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State as AxumState,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use ludo_types::{
    record::MAX_RECORD_STRING, ActionError, ClientMessage, MatchEvent, MatchId, PlayerId,
    ServerResponse,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: MatchStore,
    pub metrics: Arc<Metrics>,
    pub outbound_buffer: usize,
    pub max_message_size: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(AxumState(state): AxumState<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(|socket| handle_socket(socket, state))
}

struct Binding {
    match_id: MatchId,
    player_id: PlayerId,
    handle: MatchHandle,
    forward: JoinHandle<()>,
}

struct Connection {
    tx: mpsc::Sender<Message>,
    binding: Option<Binding>,
}

impl Connection {
    fn unbind(&mut self) -> Option<Binding> {
        let binding = self.binding.take()?;
        binding.forward.abort();
        Some(binding)
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(state.outbound_buffer.max(1));
    state.metrics.connection_opened();

    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection { tx, binding: None };
    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(inbound) => handle_inbound(inbound, &state, &mut connection).await,
                Err(err) => {
                    debug!(?err, "invalid inbound message");
                    state.metrics.action(false);
                    send_json(
                        &connection.tx,
                        &ServerResponse::error(None, ActionError::InvalidMessage),
                    )
                    .await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(binding) = connection.unbind() {
        let command = Command::Disconnect {
            player_id: binding.player_id.clone(),
        };
        if let Err(err) = binding.handle.mutate(command).await {
            debug!(match_id = %binding.match_id, ?err, "disconnect not delivered");
        }
        info!(match_id = %binding.match_id, player_id = %binding.player_id, "connection closed");
    }
    state.metrics.connection_closed();
    drop(connection);
    write_task.abort();
}

async fn handle_inbound(inbound: ClientMessage, state: &AppState, connection: &mut Connection) {
    let request_id = inbound.request_id().map(str::to_string);
    let result = match inbound {
        ClientMessage::Join {
            match_id,
            player_token,
            ..
        } => join(state, connection, request_id.clone(), match_id, player_token).await,
        ClientMessage::RollDice { .. } => {
            act(connection, request_id.clone(), |player_id| Command::RollDice { player_id }).await
        }
        ClientMessage::ChooseMove { pawn_id, .. } => {
            act(connection, request_id.clone(), |player_id| {
                Command::ChooseMove { player_id, pawn_id }
            })
            .await
        }
        ClientMessage::Leave { .. } => {
            let result =
                act(connection, request_id.clone(), |player_id| Command::Leave { player_id }).await;
            if result.is_ok() {
                if let Some(binding) = connection.unbind() {
                    info!(match_id = %binding.match_id, player_id = %binding.player_id, "player left");
                }
            }
            result
        }
        ClientMessage::Resync { .. } => resync(state, connection).await,
    };

    match result {
        Ok(Some(response)) => {
            send_json(&connection.tx, &response).await;
        }
        Ok(None) => {}
        Err(err) => {
            if err.requires_rejoin() {
                connection.unbind();
            }
            send_json(&connection.tx, &ServerResponse::error(request_id, err)).await;
        }
    }
}

async fn join(
    state: &AppState,
    connection: &mut Connection,
    request_id: Option<String>,
    match_id: MatchId,
    player_token: String,
) -> Result<Option<ServerResponse>, ActionError> {
    if connection.binding.is_some() {
        return Err(ActionError::AlreadyJoined);
    }
    if match_id.is_empty()
        || match_id.len() > MAX_RECORD_STRING
        || player_token.is_empty()
        || player_token.len() > MAX_RECORD_STRING
    {
        return Err(ActionError::InvalidMessage);
    }

    let Session {
        handle,
        events,
        player_id,
        color,
        rejoined,
        snapshot: _,
    } = state
        .store
        .join(&match_id, &player_token)
        .await
        .map_err(rejection)?;

    // A returning player starts from a fresh snapshot; anything queued before it is stale.
    let (events, snapshot) = if rejoined {
        let (snapshot, events) = handle.resync().await.map_err(rejection)?;
        (events, Some(snapshot))
    } else {
        (events, None)
    };

    // Direct frames go out before the forwarder starts so no broadcast can overtake them.
    send_json(
        &connection.tx,
        &ServerResponse::Joined {
            request_id,
            match_id: match_id.clone(),
            player_id: player_id.clone(),
            color,
        },
    )
    .await;
    if let Some(snapshot) = snapshot {
        send_json(&connection.tx, &MatchEvent::MatchSnapshot(snapshot)).await;
    }

    let forward = spawn_forward(
        events,
        connection.tx.clone(),
        handle.clone(),
        state.metrics.clone(),
    );
    connection.binding = Some(Binding {
        match_id,
        player_id,
        handle,
        forward,
    });
    Ok(None)
}

async fn act(
    connection: &Connection,
    request_id: Option<String>,
    command: impl FnOnce(PlayerId) -> Command,
) -> Result<Option<ServerResponse>, ActionError> {
    let binding = connection
        .binding
        .as_ref()
        .ok_or(ActionError::PlayerNotInMatch)?;
    binding
        .handle
        .mutate(command(binding.player_id.clone()))
        .await
        .map_err(rejection)?;
    Ok(Some(ServerResponse::Ack { request_id }))
}

async fn resync(
    state: &AppState,
    connection: &mut Connection,
) -> Result<Option<ServerResponse>, ActionError> {
    let binding = connection
        .binding
        .as_mut()
        .ok_or(ActionError::PlayerNotInMatch)?;
    binding.forward.abort();
    let (snapshot, events) = binding.handle.resync().await.map_err(rejection)?;
    state.metrics.resync();
    send_json(&connection.tx, &MatchEvent::MatchSnapshot(snapshot)).await;
    binding.forward = spawn_forward(
        events,
        connection.tx.clone(),
        binding.handle.clone(),
        state.metrics.clone(),
    );
    Ok(None)
}

fn spawn_forward(
    mut events: broadcast::Receiver<MatchEvent>,
    tx: mpsc::Sender<Message>,
    handle: MatchHandle,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !send_json(&tx, &event).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(match_id = %handle.match_id(), skipped, "connection lagged; resyncing");
                    metrics.resync();
                    // The backlog predates the snapshot, so it is replaced rather than drained.
                    match handle.resync().await {
                        Ok((snapshot, fresh)) => {
                            events = fresh;
                            if !send_json(&tx, &MatchEvent::MatchSnapshot(snapshot)).await {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn rejection(err: StoreError) -> ActionError {
    match err {
        StoreError::Rejected(err) => err,
        StoreError::NotFound(_) => ActionError::MatchNotFound,
        other => {
            warn!(?other, "match store failure");
            other.action_error()
        }
    }
}

async fn send_json<T: Serialize>(tx: &mpsc::Sender<Message>, payload: &T) -> bool {
    match serde_json::to_string(payload) {
        Ok(text) => tx.send(Message::Text(text)).await.is_ok(),
        Err(err) => {
            warn!(?err, "failed to encode outbound message");
            true
        }
    }
}
