//! In-process backend.
//!
//! Implements every collaborator trait over plain collections guarded by a
//! mutex, publishes row changes on its own [`ChangeFeed`], and can be told to
//! fail or slow down individual operations.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use uuid::Uuid;

use foodshare_types::api::{NewFoodRequest, NewListing, NewMessage};
use foodshare_types::{
    ChangeEvent, Conversation, FoodListing, FoodRequest, Message, Profile, RequestStatus,
};

use crate::backend::{Auth, BackendResult, Directory, Marketplace, MessageStore};
use crate::error::BackendError;
use crate::feed::{ChangeFeed, EventFilter, Subscription};

/// Backend calls that can be counted, failed or delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CurrentUser,
    GetProfile,
    ListProfiles,
    ResolveConversation,
    ListConversations,
    LatestMessage,
    CountUnread,
    InsertMessage,
    TouchConversation,
    Subscribe,
    InsertListing,
    InsertRequest,
    ListListings,
    ListRequests,
}

#[derive(Default)]
struct MemoryState {
    current_user: Option<Uuid>,
    profiles: HashMap<Uuid, Profile>,
    conversations: HashMap<Uuid, Conversation>,
    /// (lower user id, higher user id) -> conversation id
    pairs: HashMap<(Uuid, Uuid), Uuid>,
    messages: Vec<Message>,
    listings: Vec<FoodListing>,
    requests: Vec<FoodRequest>,
    failing: HashSet<Operation>,
    /// Conversations whose message lookups fail.
    broken: HashSet<Uuid>,
    /// Delay applied to lookups keyed by peer (resolve) or conversation
    /// (latest message).
    latency: HashMap<Uuid, Duration>,
    calls: HashMap<Operation, usize>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Strictly increasing wall-clock timestamps, so rows created back to
    /// back still sort deterministically.
    fn tick(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + TimeDelta::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn enter(&mut self, op: Operation) -> BackendResult<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.failing.contains(&op) {
            return Err(BackendError::Rejected(format!("{:?} failed", op)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    feed: ChangeFeed,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay_for(&self, key: Uuid) {
        let delay = self.state().latency.get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    // -- Session --

    pub fn sign_in(&self, user: Uuid) {
        self.state().current_user = Some(user);
    }

    pub fn sign_out(&self) {
        self.state().current_user = None;
    }

    // -- Seeding and inspection --

    pub fn add_profile(&self, profile: Profile) {
        self.state().profiles.insert(profile.id, profile);
    }

    pub fn conversation(&self, id: Uuid) -> Option<Conversation> {
        self.state().conversations.get(&id).cloned()
    }

    pub fn conversation_count(&self) -> usize {
        self.state().conversations.len()
    }

    pub fn messages_in(&self, conversation_id: Uuid) -> Vec<Message> {
        self.state()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Overwrite a conversation's recency marker without publishing a change.
    pub fn set_last_message_at(&self, conversation_id: Uuid, at: Option<DateTime<Utc>>) {
        if let Some(c) = self.state().conversations.get_mut(&conversation_id) {
            c.last_message_at = at;
        }
    }

    /// Mark every message `reader` received in the conversation as read.
    /// Returns how many changed.
    pub fn mark_read(&self, conversation_id: Uuid, reader: Uuid) -> usize {
        let mut state = self.state();
        let now = state.tick();
        let mut changed = 0;
        for m in state.messages.iter_mut() {
            if m.conversation_id == conversation_id && m.is_unread_for(reader) {
                m.read_at = Some(now);
                changed += 1;
            }
        }
        changed
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    // -- Fault injection --

    pub fn fail(&self, op: Operation) {
        self.state().failing.insert(op);
    }

    pub fn recover(&self, op: Operation) {
        self.state().failing.remove(&op);
    }

    /// Make message lookups for one conversation fail.
    pub fn break_conversation(&self, conversation_id: Uuid) {
        self.state().broken.insert(conversation_id);
    }

    /// Delay resolve-or-create calls naming `key` as the peer, and
    /// latest-message lookups for conversation `key`.
    pub fn set_latency(&self, key: Uuid, delay: Duration) {
        self.state().latency.insert(key, delay);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }
}

fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

#[async_trait]
impl Auth for MemoryBackend {
    async fn current_user(&self) -> BackendResult<Option<Uuid>> {
        let mut state = self.state();
        state.enter(Operation::CurrentUser)?;
        Ok(state.current_user)
    }
}

#[async_trait]
impl Directory for MemoryBackend {
    async fn get_profile(&self, id: Uuid) -> BackendResult<Option<Profile>> {
        let mut state = self.state();
        state.enter(Operation::GetProfile)?;
        Ok(state.profiles.get(&id).cloned())
    }

    async fn list_profiles(&self, ids: &[Uuid]) -> BackendResult<HashMap<Uuid, Profile>> {
        let mut state = self.state();
        state.enter(Operation::ListProfiles)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.profiles.get(id).map(|p| (*id, p.clone())))
            .collect())
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn resolve_or_create_conversation(
        &self,
        self_id: Uuid,
        peer_id: Uuid,
    ) -> BackendResult<Uuid> {
        self.delay_for(peer_id).await;

        let created = {
            let mut state = self.state();
            state.enter(Operation::ResolveConversation)?;
            if self_id == peer_id {
                return Err(BackendError::Rejected("Cannot start a conversation with yourself".into()));
            }

            let key = pair_key(self_id, peer_id);
            if let Some(id) = state.pairs.get(&key) {
                return Ok(*id);
            }

            let conversation = Conversation {
                id: Uuid::new_v4(),
                user1_id: self_id,
                user2_id: peer_id,
                last_message_at: None,
                created_at: Some(state.tick()),
            };
            state.pairs.insert(key, conversation.id);
            state.conversations.insert(conversation.id, conversation.clone());
            conversation
        };

        debug!(conversation = %created.id, "created conversation");
        let id = created.id;
        self.feed.publish(ChangeEvent::ConversationChanged(created));
        Ok(id)
    }

    async fn conversations_for(&self, user: Uuid) -> BackendResult<Vec<Conversation>> {
        let mut state = self.state();
        state.enter(Operation::ListConversations)?;

        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.involves(user))
            .cloned()
            .collect();
        // Newest first, never-messaged last.
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(conversations)
    }

    async fn latest_message(&self, conversation_id: Uuid) -> BackendResult<Option<Message>> {
        self.delay_for(conversation_id).await;

        let mut state = self.state();
        state.enter(Operation::LatestMessage)?;
        if state.broken.contains(&conversation_id) {
            return Err(BackendError::Transport("connection reset".into()));
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn count_unread(&self, conversation_id: Uuid, viewer: Uuid) -> BackendResult<u64> {
        let mut state = self.state();
        state.enter(Operation::CountUnread)?;
        if state.broken.contains(&conversation_id) {
            return Err(BackendError::Transport("connection reset".into()));
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.is_unread_for(viewer))
            .count() as u64)
    }

    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message> {
        let inserted = {
            let mut state = self.state();
            state.enter(Operation::InsertMessage)?;
            if !state.conversations.contains_key(&message.conversation_id) {
                return Err(BackendError::Status {
                    status: 409,
                    message: format!("conversation {} does not exist", message.conversation_id),
                });
            }
            let row = Message {
                id: Uuid::new_v4(),
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                message_text: message.message_text.clone(),
                created_at: state.tick(),
                read_at: None,
            };
            state.messages.push(row.clone());
            row
        };

        self.feed.publish(ChangeEvent::MessageCreated(inserted.clone()));
        Ok(inserted)
    }

    async fn touch_conversation(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
    ) -> BackendResult<()> {
        let touched = {
            let mut state = self.state();
            state.enter(Operation::TouchConversation)?;
            let Some(conversation) = state.conversations.get_mut(&conversation_id) else {
                return Ok(());
            };
            conversation.last_message_at = Some(at);
            conversation.clone()
        };

        self.feed.publish(ChangeEvent::ConversationChanged(touched));
        Ok(())
    }

    async fn subscribe_changes(
        &self,
        _viewer: Uuid,
        filter: EventFilter,
    ) -> BackendResult<Subscription> {
        self.state().enter(Operation::Subscribe)?;
        Ok(self.feed.subscribe(filter))
    }
}

#[async_trait]
impl Marketplace for MemoryBackend {
    async fn insert_listing(&self, listing: &NewListing) -> BackendResult<FoodListing> {
        let mut state = self.state();
        state.enter(Operation::InsertListing)?;
        let row = FoodListing {
            id: Uuid::new_v4(),
            giver_id: listing.giver_id,
            title: listing.title.clone(),
            food_type: listing.food_type.clone(),
            description: listing.description.clone(),
            quantity: listing.quantity.clone(),
            location: listing.location.clone(),
            pickup_time: listing.pickup_time,
            latitude: listing.latitude,
            longitude: listing.longitude,
            is_available: listing.is_available,
            created_at: state.tick(),
            giver: None,
        };
        state.listings.push(row.clone());
        Ok(row)
    }

    async fn insert_request(&self, request: &NewFoodRequest) -> BackendResult<FoodRequest> {
        let mut state = self.state();
        state.enter(Operation::InsertRequest)?;
        let row = FoodRequest {
            id: Uuid::new_v4(),
            receiver_id: request.receiver_id,
            food_preference: request.food_preference.clone(),
            notes: request.notes.clone(),
            urgency_level: request.urgency_level,
            latitude: Some(request.latitude),
            longitude: Some(request.longitude),
            location_address: request.location_address.clone(),
            needed_by: request.needed_by,
            people_count: request.people_count,
            status: request.status,
            created_at: state.tick(),
            receiver: None,
        };
        state.requests.push(row.clone());
        Ok(row)
    }

    async fn listings_by_giver(&self, giver_id: Uuid) -> BackendResult<Vec<FoodListing>> {
        let mut state = self.state();
        state.enter(Operation::ListListings)?;
        let mut rows: Vec<FoodListing> = state
            .listings
            .iter()
            .filter(|l| l.giver_id == giver_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn requests_by_receiver(&self, receiver_id: Uuid) -> BackendResult<Vec<FoodRequest>> {
        let mut state = self.state();
        state.enter(Operation::ListRequests)?;
        let mut rows: Vec<FoodRequest> = state
            .requests
            .iter()
            .filter(|r| r.receiver_id == receiver_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn available_listings(&self) -> BackendResult<Vec<FoodListing>> {
        let mut state = self.state();
        state.enter(Operation::ListListings)?;
        let mut rows: Vec<FoodListing> = state
            .listings
            .iter()
            .filter(|l| l.is_available && l.latitude.is_some() && l.longitude.is_some())
            .map(|l| FoodListing {
                giver: state.profiles.get(&l.giver_id).cloned(),
                ..l.clone()
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn active_requests(&self) -> BackendResult<Vec<FoodRequest>> {
        let mut state = self.state();
        state.enter(Operation::ListRequests)?;
        let mut rows: Vec<FoodRequest> = state
            .requests
            .iter()
            .filter(|r| {
                r.status == RequestStatus::Active && r.latitude.is_some() && r.longitude.is_some()
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}
