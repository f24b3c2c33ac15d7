//! Shared data model of the foodshare client: conversations, messages,
//! profiles, marketplace rows and the realtime change events carrying them.

pub mod api;
pub mod events;
pub mod models;

pub use events::ChangeEvent;
pub use models::{
    Conversation, ConversationDetails, FoodListing, FoodRequest, Message, Profile, RequestStatus,
    Urgency, UserRole,
};
