//! Realtime change notifications over the backend's Phoenix websocket.
//!
//! Each subscription owns one socket and one channel. The channel is joined
//! with `postgres_changes` bindings for message inserts and for the viewer's
//! conversation rows; matching changes are published into a private
//! [`ChangeFeed`] whose only subscriber is the handle returned to the caller.
//! Dropping that handle leaves the channel and closes the socket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;
use uuid::Uuid;

use foodshare_sync::{ChangeFeed, EventFilter, Subscription};
use foodshare_types::ChangeEvent;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// One Phoenix protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    fn new(topic: &str, event: &str, payload: Value, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }
}

pub fn inbox_topic(viewer: Uuid) -> String {
    format!("realtime:inbox:{}", viewer)
}

/// Join request binding message inserts and the viewer's conversations.
pub fn join_frame(topic: &str, viewer: Uuid, access_token: &str, reference: &str) -> Frame {
    let payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "INSERT", "schema": "public", "table": "messages" },
                {
                    "event": "*",
                    "schema": "public",
                    "table": "conversations",
                    "filter": format!("user1_id=eq.{}", viewer),
                },
                {
                    "event": "*",
                    "schema": "public",
                    "table": "conversations",
                    "filter": format!("user2_id=eq.{}", viewer),
                },
            ],
        },
        "access_token": access_token,
    });
    Frame::new(topic, "phx_join", payload, reference)
}

pub fn heartbeat_frame(reference: &str) -> Frame {
    Frame::new("phoenix", "heartbeat", json!({}), reference)
}

pub fn leave_frame(topic: &str, reference: &str) -> Frame {
    Frame::new(topic, "phx_leave", json!({}), reference)
}

/// The row change carried by a `postgres_changes` frame, if it is one we
/// track.
pub fn decode_change(frame: &Frame) -> Result<Option<ChangeEvent>> {
    if frame.event != "postgres_changes" {
        return Ok(None);
    }
    let data = &frame.payload["data"];
    let table = data["table"].as_str().unwrap_or_default();
    let kind = data["type"].as_str().unwrap_or_default();
    let record = data["record"].clone();

    let event = match (table, kind) {
        ("messages", "INSERT") => ChangeEvent::MessageCreated(serde_json::from_value(record)?),
        ("conversations", "INSERT" | "UPDATE") => {
            ChangeEvent::ConversationChanged(serde_json::from_value(record)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[derive(Clone)]
pub struct RealtimeClient {
    config: Arc<ClientConfig>,
}

impl RealtimeClient {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    /// Open a channel for `viewer`. Must be called inside a tokio runtime.
    pub fn subscribe(&self, viewer: Uuid, filter: EventFilter) -> Subscription {
        let feed = ChangeFeed::new();
        let subscription = feed.subscribe(filter);
        let cancel = CancellationToken::new();

        let channel = Channel {
            config: self.config.clone(),
            viewer,
            topic: inbox_topic(viewer),
            feed,
            cancel: cancel.clone(),
        };
        tokio::spawn(channel.run());

        subscription.on_release(move || cancel.cancel())
    }
}

/// Why a connection ended.
enum Exit {
    /// The subscription was dropped.
    Released,
    /// The server hung up.
    Closed,
}

#[derive(Default)]
struct Refs(u64);

impl Refs {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

struct Channel {
    config: Arc<ClientConfig>,
    viewer: Uuid,
    topic: String,
    feed: ChangeFeed,
    cancel: CancellationToken,
}

impl Channel {
    async fn run(self) {
        let url = match self.config.realtime_url() {
            Ok(url) => url,
            Err(e) => {
                error!(viewer = %self.viewer, "Cannot open realtime channel: {}", e);
                return;
            }
        };

        loop {
            match self.connect(&url).await {
                Ok(Exit::Released) => break,
                Ok(Exit::Closed) => warn!(viewer = %self.viewer, "Realtime connection closed by server"),
                Err(e) => warn!(viewer = %self.viewer, "Realtime connection lost: {}", e),
            }
            debug!(delay = ?self.config.reconnect_delay, "reconnecting realtime channel");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
        info!(viewer = %self.viewer, topic = %self.topic, "realtime channel released");
    }

    async fn connect(&self, url: &Url) -> Result<Exit> {
        let (socket, _) = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Exit::Released),
            conn = connect_async(url.as_str()) => conn?,
        };
        let (mut sink, mut stream) = socket.split();
        let mut refs = Refs::default();

        let token = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.anon_key);
        let join_ref = refs.next();
        send(&mut sink, &join_frame(&self.topic, self.viewer, token, &join_ref)).await?;
        debug!(topic = %self.topic, "joining realtime channel");

        let mut heartbeat = tokio::time::interval(self.config.heartbeat.max(MIN_HEARTBEAT));
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = send(&mut sink, &leave_frame(&self.topic, &refs.next())).await;
                    let _ = sink.close().await;
                    return Ok(Exit::Released);
                }
                _ = heartbeat.tick() => {
                    send(&mut sink, &heartbeat_frame(&refs.next())).await?;
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => self.handle(&text, &join_ref)?,
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(Exit::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }

    fn handle(&self, text: &str, join_ref: &str) -> Result<()> {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring malformed realtime frame: {}", e);
                return Ok(());
            }
        };

        match frame.event.as_str() {
            "phx_reply" if frame.reference.as_deref() == Some(join_ref) => {
                let status = frame.payload["status"].as_str().unwrap_or_default();
                if status != "ok" {
                    return Err(ClientError::Realtime(format!(
                        "join rejected: {}",
                        frame.payload["response"]
                    )));
                }
                info!(viewer = %self.viewer, topic = %self.topic, "realtime channel joined");
            }
            "phx_error" if frame.topic == self.topic => {
                return Err(ClientError::Realtime("channel crashed on the server".into()));
            }
            "postgres_changes" => match decode_change(&frame) {
                Ok(Some(event)) => {
                    let delivered = self.feed.publish(event);
                    trace!(delivered, "realtime change");
                }
                Ok(None) => {}
                Err(e) => warn!("Ignoring undecodable change: {}", e),
            },
            _ => {}
        }
        Ok(())
    }
}

async fn send<S>(sink: &mut S, frame: &Frame) -> Result<()>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    sink.send(WsMessage::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_binds_messages_and_both_conversation_slots() {
        let viewer = Uuid::new_v4();
        let frame = join_frame(&inbox_topic(viewer), viewer, "token", "1");

        assert_eq!(frame.event, "phx_join");
        assert_eq!(frame.payload["access_token"], "token");
        let bindings = frame.payload["config"]["postgres_changes"].as_array().unwrap();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0]["table"], "messages");
        assert_eq!(bindings[1]["filter"], format!("user1_id=eq.{}", viewer));
        assert_eq!(bindings[2]["filter"], format!("user2_id=eq.{}", viewer));

        let wire = serde_json::to_value(&frame).unwrap();
        assert_eq!(wire["ref"], "1");
    }

    #[test]
    fn heartbeat_goes_to_phoenix_topic() {
        let frame = heartbeat_frame("7");
        assert_eq!(frame.topic, "phoenix");
        assert_eq!(frame.event, "heartbeat");
    }

    #[test]
    fn decodes_message_insert() {
        let conversation_id = Uuid::new_v4();
        let frame: Frame = serde_json::from_value(json!({
            "topic": "realtime:inbox:x",
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "messages",
                    "type": "INSERT",
                    "commit_timestamp": "2024-05-01T12:00:00Z",
                    "record": {
                        "id": Uuid::new_v4(),
                        "conversation_id": conversation_id,
                        "sender_id": Uuid::new_v4(),
                        "message_text": "hi",
                        "created_at": "2024-05-01T12:00:00.123456+00:00",
                        "read_at": null
                    }
                }
            }
        }))
        .unwrap();

        let event = decode_change(&frame).unwrap().unwrap();
        assert_eq!(event.conversation_id(), conversation_id);
        assert_eq!(event.table(), "messages");
    }

    #[test]
    fn ignores_untracked_changes() {
        let frame: Frame = serde_json::from_value(json!({
            "topic": "realtime:inbox:x",
            "event": "postgres_changes",
            "payload": { "data": { "table": "messages", "type": "DELETE", "record": {} } }
        }))
        .unwrap();
        assert_eq!(decode_change(&frame).unwrap(), None);

        let frame = heartbeat_frame("1");
        assert_eq!(decode_change(&frame).unwrap(), None);
    }
}
