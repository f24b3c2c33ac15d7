use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message};

/// Row changes pushed by the backend's realtime feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    /// A message row was inserted
    MessageCreated(Message),

    /// A conversation row was inserted or updated (new thread, recency bump)
    ConversationChanged(Conversation),
}

impl ChangeEvent {
    /// The conversation this change belongs to.
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::MessageCreated(message) => message.conversation_id,
            Self::ConversationChanged(conversation) => conversation.id,
        }
    }

    /// Backend table the change originated from.
    pub fn table(&self) -> &'static str {
        match self {
            Self::MessageCreated(_) => "messages",
            Self::ConversationChanged(_) => "conversations",
        }
    }
}
