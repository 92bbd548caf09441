//! End-to-end play over real websocket connections.

use futures_util::{SinkExt, StreamExt};
use ludo_execution::{mocks::ScriptedDice, DiceSource, Rules, TurnPolicy};
use ludo_match_server::{serve, AppState, DiceFactory, MatchStore, Metrics, StoreSettings};
use ludo_types::Ruleset;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(rolls: Vec<u8>) -> (SocketAddr, oneshot::Sender<()>) {
    let rules = Arc::new(Rules::new(Ruleset::classic()).unwrap());
    let settings = StoreSettings {
        seats_per_match: 2,
        policy: TurnPolicy::default(),
        finished_linger: Duration::from_secs(60),
        mailbox_size: 16,
        broadcast_buffer: 64,
    };
    let dice: DiceFactory =
        Arc::new(move |_| Box::new(ScriptedDice::new(rolls.clone())) as Box<dyn DiceSource>);
    let metrics = Arc::new(Metrics::default());
    let state = AppState {
        store: MatchStore::new(rules, settings, dice, None, metrics.clone()),
        metrics,
        outbound_buffer: 64,
        max_message_size: 16 * 1024,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        serve(listener, state, async {
            let _ = stopped.await;
        })
        .await
        .unwrap();
    });
    (addr, stop)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Reads frames until one of `kind` arrives, returning it with everything skipped before it.
async fn until(client: &mut Client, kind: &str) -> (Value, Vec<Value>) {
    let mut skipped = Vec::new();
    loop {
        let frame = next_frame(client).await;
        if frame["type"] == kind {
            return (frame, skipped);
        }
        skipped.push(frame);
    }
}

/// Reads frames until every one of `kinds` has arrived, in whatever order.
async fn collect(client: &mut Client, kinds: &[&str]) -> Vec<Value> {
    let mut found: Vec<Option<Value>> = vec![None; kinds.len()];
    while found.iter().any(Option::is_none) {
        let frame = next_frame(client).await;
        if let Some(slot) = kinds.iter().position(|kind| frame["type"] == *kind) {
            if found[slot].is_none() {
                found[slot] = Some(frame);
            }
        }
    }
    found.into_iter().flatten().collect()
}

async fn join(client: &mut Client, token: &str) -> Value {
    send(
        client,
        json!({"type": "join", "requestId": token, "matchId": "table-1", "playerToken": token}),
    )
    .await;
    let (joined, _) = until(client, "joined").await;
    assert_eq!(joined["requestId"], token);
    assert_eq!(joined["matchId"], "table-1");
    joined
}

#[tokio::test]
async fn two_players_play_over_websocket() {
    let (addr, stop) = start_server(vec![6, 2]).await;
    let mut red = connect(addr).await;
    let mut yellow = connect(addr).await;

    let red_joined = join(&mut red, "tok-red").await;
    assert_eq!(red_joined["color"], "red");
    let red_id = red_joined["playerId"].clone();
    let yellow_joined = join(&mut yellow, "tok-yellow").await;
    assert_eq!(yellow_joined["color"], "yellow");
    let yellow_id = yellow_joined["playerId"].clone();
    assert_ne!(red_id, yellow_id);

    // Filling the last seat starts the match with Red to roll.
    let (turn, _) = until(&mut red, "turnChanged").await;
    assert_eq!(turn["playerId"], red_id);
    let (snapshot, _) = until(&mut red, "matchSnapshot").await;
    assert_eq!(snapshot["status"], "inProgress");
    assert_eq!(snapshot["currentPlayer"], red_id);

    send(&mut red, json!({"type": "rollDice", "requestId": "r1"})).await;
    // The ack travels beside the broadcast, so only the event order is fixed.
    let frames = collect(&mut red, &["diceRolled", "legalMoves", "ack"]).await;
    assert_eq!(frames[0]["value"], 6);
    assert_eq!(frames[1]["pawnIds"], json!([0, 1, 2, 3]));
    assert_eq!(frames[2]["requestId"], "r1");
    let (rolled, _) = until(&mut yellow, "diceRolled").await;
    assert_eq!(rolled["playerId"], red_id);

    // Acting out of turn is reported to the offender only.
    send(&mut yellow, json!({"type": "rollDice", "requestId": "y1"})).await;
    let (error, _) = until(&mut yellow, "error").await;
    assert_eq!(error["code"], "NOT_YOUR_TURN");
    assert_eq!(error["requestId"], "y1");
    assert_eq!(error["resync"], false);

    send(&mut red, json!({"type": "chooseMove", "pawnId": 0})).await;
    let (moved, skipped) = until(&mut red, "pawnMoved").await;
    assert!(skipped.iter().all(|frame| frame["type"] != "error"));
    assert_eq!(moved["pawnId"], 0);
    assert_eq!(moved["from"], json!({"kind": "home"}));
    assert_eq!(moved["to"], json!({"kind": "track", "progress": 0}));
    // Releasing on a six keeps the turn.
    let (turn, _) = until(&mut red, "turnChanged").await;
    assert_eq!(turn["playerId"], red_id);

    // Replaying the applied choice is stale.
    send(&mut red, json!({"type": "chooseMove", "requestId": "r2", "pawnId": 0})).await;
    let (error, _) = until(&mut red, "error").await;
    assert_eq!(error["code"], "STALE_OR_INVALID_CHOICE");
    assert_eq!(error["resync"], true);

    // Dropping the socket without leaving is a disconnect, not a forfeit.
    yellow.close(None).await.unwrap();
    let (gone, _) = until(&mut red, "playerDisconnected").await;
    assert_eq!(gone["playerId"], yellow_id);

    // Coming back with the same token reclaims the seat and gets a fresh snapshot.
    let mut yellow = connect(addr).await;
    let rejoined = join(&mut yellow, "tok-yellow").await;
    assert_eq!(rejoined["playerId"], yellow_id);
    let (snapshot, _) = until(&mut yellow, "matchSnapshot").await;
    assert_eq!(snapshot["seats"][0]["pawns"][0], json!({"kind": "track", "progress": 0}));
    let (back, _) = until(&mut red, "playerReconnected").await;
    assert_eq!(back["playerId"], yellow_id);

    let _ = stop.send(());
}

#[tokio::test]
async fn malformed_frames_are_rejected() {
    let (addr, stop) = start_server(vec![]).await;
    let mut client = connect(addr).await;

    client
        .send(Message::Text("{\"type\":\"teleport\"}".to_string()))
        .await
        .unwrap();
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "INVALID_MESSAGE");

    send(&mut client, json!({"type": "leave", "requestId": "l1"})).await;
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["code"], "PLAYER_NOT_IN_MATCH");
    assert_eq!(frame["requestId"], "l1");

    let _ = stop.send(());
}

#[tokio::test]
async fn health_and_metrics_routes() {
    let (addr, stop) = start_server(vec![]).await;

    let health = http_get(addr, "/healthz").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.ends_with("ok"));

    let mut client = connect(addr).await;
    join(&mut client, "tok-a").await;
    let metrics = http_get(addr, "/metrics").await;
    let body = metrics.split("\r\n\r\n").nth(1).unwrap();
    let value: Value = serde_json::from_str(body).unwrap();
    assert_eq!(value["matches_created"], 1);
    assert_eq!(value["connections_open"], 1);

    let _ = stop.send(());
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}
