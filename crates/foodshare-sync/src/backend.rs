//! Capabilities consumed from the hosted backend.
//!
//! The components in this crate never talk to the network themselves; they
//! go through these traits. `foodshare-client` implements them against the
//! hosted service, [`crate::memory::MemoryBackend`] implements them in
//! process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use foodshare_types::api::{NewFoodRequest, NewListing, NewMessage};
use foodshare_types::{Conversation, FoodListing, FoodRequest, Message, Profile};

use crate::error::BackendError;
use crate::feed::{EventFilter, Subscription};
use crate::notify::Notifier;

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait Auth: Send + Sync {
    /// The signed-in user, or `None` when signed out.
    async fn current_user(&self) -> BackendResult<Option<Uuid>>;
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_profile(&self, id: Uuid) -> BackendResult<Option<Profile>>;

    /// Profiles for `ids`. Unknown ids are absent from the map.
    async fn list_profiles(&self, ids: &[Uuid]) -> BackendResult<HashMap<Uuid, Profile>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The single conversation between `self_id` and `peer_id`, created on
    /// first use. Must be idempotent and safe when both users call it at the
    /// same time.
    async fn resolve_or_create_conversation(
        &self,
        self_id: Uuid,
        peer_id: Uuid,
    ) -> BackendResult<Uuid>;

    /// Conversations `user` takes part in, most recent `last_message_at`
    /// first, conversations without one last.
    async fn conversations_for(&self, user: Uuid) -> BackendResult<Vec<Conversation>>;

    async fn latest_message(&self, conversation_id: Uuid) -> BackendResult<Option<Message>>;

    /// Messages in the conversation sent by someone other than `viewer` and
    /// not yet marked read.
    async fn count_unread(&self, conversation_id: Uuid, viewer: Uuid) -> BackendResult<u64>;

    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message>;

    async fn touch_conversation(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
    ) -> BackendResult<()>;

    /// Realtime changes visible to `viewer`, narrowed by `filter`. The feed
    /// stays open until the returned subscription is dropped.
    async fn subscribe_changes(
        &self,
        viewer: Uuid,
        filter: EventFilter,
    ) -> BackendResult<Subscription>;
}

#[async_trait]
pub trait Marketplace: Send + Sync {
    async fn insert_listing(&self, listing: &NewListing) -> BackendResult<FoodListing>;

    async fn insert_request(&self, request: &NewFoodRequest) -> BackendResult<FoodRequest>;

    /// The giver's own listings, newest first.
    async fn listings_by_giver(&self, giver_id: Uuid) -> BackendResult<Vec<FoodListing>>;

    /// The receiver's own requests, newest first.
    async fn requests_by_receiver(&self, receiver_id: Uuid) -> BackendResult<Vec<FoodRequest>>;

    /// Available listings that have coordinates, newest first, each with its
    /// giver's profile embedded.
    async fn available_listings(&self) -> BackendResult<Vec<FoodListing>>;

    /// Active requests that have coordinates, newest first.
    async fn active_requests(&self) -> BackendResult<Vec<FoodRequest>>;
}

/// Everything a view needs to reach the backend, plus where to report to the
/// user. Cheap to clone.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn Auth>,
    pub directory: Arc<dyn Directory>,
    pub store: Arc<dyn MessageStore>,
    pub marketplace: Arc<dyn Marketplace>,
    pub notifier: Arc<dyn Notifier>,
}

impl Backend {
    /// Wires a single object implementing every capability.
    pub fn from_shared<T>(backend: Arc<T>, notifier: Arc<dyn Notifier>) -> Self
    where
        T: Auth + Directory + MessageStore + Marketplace + 'static,
    {
        Self {
            auth: backend.clone(),
            directory: backend.clone(),
            store: backend.clone(),
            marketplace: backend,
            notifier,
        }
    }
}
