use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile of a marketplace user. Every field except the id may be
/// missing on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
}

impl Profile {
    /// Name shown on cards: the organization if the user set one, otherwise
    /// their own name.
    pub fn display_name(&self) -> Option<&str> {
        self.organization_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(self.full_name.as_deref().filter(|name| !name.is_empty()))
    }
}

/// A direct conversation between exactly two users.
///
/// The participants occupy two fixed slots but form an unordered pair: the
/// backend keeps at most one conversation per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn involves(&self, user: Uuid) -> bool {
        self.user1_id == user || self.user2_id == user
    }

    /// The participant that is not `viewer`. A viewer outside the pair gets
    /// `user1_id` back, matching the slot comparison the inbox relies on.
    pub fn other_participant(&self, viewer: Uuid) -> Uuid {
        if self.user1_id == viewer {
            self.user2_id
        } else {
            self.user1_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub message_text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Counted in `viewer`'s unread total: sent by someone else and never
    /// marked read.
    pub fn is_unread_for(&self, viewer: Uuid) -> bool {
        self.sender_id != viewer && self.read_at.is_none()
    }
}

/// One inbox row, derived per viewer from a conversation, its messages and
/// the other participant's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDetails {
    pub id: Uuid,
    pub other_user_id: Uuid,
    pub other_user_name: Option<String>,
    pub other_user_avatar: Option<String>,
    pub last_message_text: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u64,
}

impl ConversationDetails {
    /// Row with nothing but the identity fields filled in.
    pub fn bare(conversation: &Conversation, viewer: Uuid) -> Self {
        Self {
            id: conversation.id,
            other_user_id: conversation.other_participant(viewer),
            other_user_name: None,
            other_user_avatar: None,
            last_message_text: None,
            last_message_at: conversation.last_message_at,
            unread_count: 0,
        }
    }
}

// -- Marketplace --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    FoodGiver,
    FoodReceiver,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Active,
    Fulfilled,
    Cancelled,
}

/// Food offered by a giver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodListing {
    pub id: Uuid,
    pub giver_id: Uuid,
    pub title: String,
    pub food_type: String,
    #[serde(default)]
    pub description: String,
    pub quantity: String,
    pub location: String,
    pub pickup_time: DateTime<Utc>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    /// Embedded giver profile, present when the query joined it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub giver: Option<Profile>,
}

/// Food asked for by a receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodRequest {
    pub id: Uuid,
    pub receiver_id: Uuid,
    pub food_preference: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub urgency_level: Urgency,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub location_address: String,
    pub needed_by: DateTime<Utc>,
    pub people_count: u32,
    #[serde(default)]
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Profile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(user1: Uuid, user2: Uuid) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            user1_id: user1,
            user2_id: user2,
            last_message_at: None,
            created_at: None,
        }
    }

    #[test]
    fn other_participant_from_either_slot() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let convo = conversation(a, b);

        assert_eq!(convo.other_participant(a), b);
        assert_eq!(convo.other_participant(b), a);
        assert!(convo.involves(a) && convo.involves(b));
        assert!(!convo.involves(Uuid::new_v4()));
    }

    #[test]
    fn own_and_read_messages_are_not_unread() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let mut msg = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: peer,
            message_text: "still have the bread?".into(),
            created_at: Utc::now(),
            read_at: None,
        };
        assert!(msg.is_unread_for(me));
        assert!(!msg.is_unread_for(peer));

        msg.read_at = Some(Utc::now());
        assert!(!msg.is_unread_for(me));
    }

    #[test]
    fn display_name_prefers_organization() {
        let mut profile = Profile {
            id: Uuid::new_v4(),
            full_name: Some("Ada".into()),
            profile_picture_url: None,
            organization_name: Some("Northside Pantry".into()),
        };
        assert_eq!(profile.display_name(), Some("Northside Pantry"));

        profile.organization_name = Some(String::new());
        assert_eq!(profile.display_name(), Some("Ada"));
    }

    #[test]
    fn listing_decodes_backend_row_with_embedded_giver() {
        let json = serde_json::json!({
            "id": "6f1c1d8e-7f6f-4a43-9f0e-0c3b1f6c2a11",
            "giver_id": "0b8f2a5e-3c1d-4e2f-8a9b-7c6d5e4f3a21",
            "title": "Bagels",
            "food_type": "Bagels",
            "description": "A dozen from this morning",
            "quantity": "12",
            "location": "Current Location",
            "pickup_time": "2026-03-01T09:00:00+00:00",
            "latitude": 52.52,
            "longitude": 13.405,
            "is_available": true,
            "created_at": "2026-03-01T08:55:12.123456+00:00",
            "giver": {
                "id": "0b8f2a5e-3c1d-4e2f-8a9b-7c6d5e4f3a21",
                "full_name": "Ada",
                "profile_picture_url": null,
                "organization_name": null
            }
        });

        let listing: FoodListing = serde_json::from_value(json).unwrap();
        assert_eq!(listing.latitude, Some(52.52));
        assert_eq!(listing.giver.unwrap().full_name.as_deref(), Some("Ada"));
    }
}
