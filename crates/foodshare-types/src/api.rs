use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{RequestStatus, Urgency};

// -- Messages --

/// Insert body for a message row. The backend assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub message_text: String,
}

/// Arguments of the `get_or_create_conversation` RPC. The caller's own id is
/// taken from the session on the backend side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOrCreateConversation {
    pub other_user_id: Uuid,
}

/// Patch body advancing a conversation's recency marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTouch {
    pub last_message_at: DateTime<Utc>,
}

// -- Marketplace --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewListing {
    pub giver_id: Uuid,
    pub title: String,
    pub food_type: String,
    pub description: String,
    pub quantity: String,
    pub location: String,
    pub pickup_time: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFoodRequest {
    pub receiver_id: Uuid,
    pub food_preference: String,
    pub notes: String,
    pub urgency_level: Urgency,
    pub latitude: f64,
    pub longitude: f64,
    pub location_address: String,
    pub needed_by: DateTime<Utc>,
    pub people_count: u32,
    pub status: RequestStatus,
}
