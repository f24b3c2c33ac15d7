use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{WebSocketStream, accept_async};
use uuid::Uuid;

use foodshare_client::{ClientConfig, RealtimeClient};
use foodshare_sync::feed::accept_all;
use foodshare_types::ChangeEvent;

/// Next frame from the client, skipping heartbeats.
async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("client frame")
            .expect("socket open")
            .unwrap();
        if let WsMessage::Text(text) = msg {
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["event"] != "heartbeat" {
                return frame;
            }
        }
    }
}

#[tokio::test]
async fn joins_delivers_changes_and_leaves_on_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ClientConfig::new(&format!("http://{}", addr), "anon-key").unwrap();
    let realtime = RealtimeClient::new(Arc::new(config));
    let viewer = Uuid::new_v4();

    let mut subscription = realtime.subscribe(viewer, accept_all());

    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    let join = next_frame(&mut ws).await;
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["topic"], format!("realtime:inbox:{}", viewer));
    assert_eq!(join["payload"]["access_token"], "anon-key");

    ws.send(WsMessage::Text(
        json!({
            "topic": join["topic"],
            "event": "phx_reply",
            "payload": { "status": "ok", "response": { "postgres_changes": [] } },
            "ref": join["ref"]
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let conversation_id = Uuid::new_v4();
    ws.send(WsMessage::Text(
        json!({
            "topic": join["topic"],
            "event": "postgres_changes",
            "payload": {
                "ids": [42],
                "data": {
                    "schema": "public",
                    "table": "messages",
                    "type": "INSERT",
                    "commit_timestamp": "2024-05-01T12:00:00Z",
                    "record": {
                        "id": Uuid::new_v4(),
                        "conversation_id": conversation_id,
                        "sender_id": Uuid::new_v4(),
                        "message_text": "pickup at 5?",
                        "created_at": "2024-05-01T12:00:00+00:00",
                        "read_at": null
                    }
                }
            },
            "ref": null
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("change delivered")
        .unwrap();
    match event {
        ChangeEvent::MessageCreated(message) => {
            assert_eq!(message.conversation_id, conversation_id);
            assert_eq!(message.message_text, "pickup at 5?");
        }
        other => panic!("unexpected event {:?}", other),
    }

    drop(subscription);

    let leave = next_frame(&mut ws).await;
    assert_eq!(leave["event"], "phx_leave");
    assert_eq!(leave["topic"], join["topic"]);
}
