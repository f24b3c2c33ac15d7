use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use foodshare_sync::{
    Auth, BackendError, BackendResult, Directory, EventFilter, Marketplace, MessageStore,
    Subscription,
};
use foodshare_types::api::{
    ConversationTouch, GetOrCreateConversation, NewFoodRequest, NewListing, NewMessage,
};
use foodshare_types::{Conversation, FoodListing, FoodRequest, Message, Profile};

use crate::auth;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::realtime::RealtimeClient;
use crate::rest::{Query, RestClient};

const PROFILE_COLUMNS: &str = "id,full_name,profile_picture_url,organization_name";
const LISTING_WITH_GIVER: &str =
    "*,giver:profiles!giver_id(id,full_name,profile_picture_url,organization_name)";

/// The hosted backend, reached over REST and the realtime websocket.
#[derive(Clone)]
pub struct RemoteBackend {
    rest: RestClient,
    realtime: RealtimeClient,
}

impl RemoteBackend {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let config = Arc::new(config);
        Ok(Self {
            rest: RestClient::new(config.clone())?,
            realtime: RealtimeClient::new(config),
        })
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }
}

#[async_trait]
impl Auth for RemoteBackend {
    async fn current_user(&self) -> BackendResult<Option<Uuid>> {
        Ok(auth::current_user(&self.rest).await?)
    }
}

#[async_trait]
impl Directory for RemoteBackend {
    async fn get_profile(&self, id: Uuid) -> BackendResult<Option<Profile>> {
        let query = Query::table("profiles").select(PROFILE_COLUMNS).eq("id", id);
        Ok(self.rest.select_one(&query).await?)
    }

    async fn list_profiles(&self, ids: &[Uuid]) -> BackendResult<HashMap<Uuid, Profile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = Query::table("profiles")
            .select(PROFILE_COLUMNS)
            .in_list("id", ids);
        let rows: Vec<Profile> = self.rest.select(&query).await?;
        Ok(rows.into_iter().map(|p| (p.id, p)).collect())
    }
}

#[async_trait]
impl MessageStore for RemoteBackend {
    /// The RPC takes the caller's id from the session token, so `self_id`
    /// only guards against messaging oneself.
    async fn resolve_or_create_conversation(
        &self,
        self_id: Uuid,
        peer_id: Uuid,
    ) -> BackendResult<Uuid> {
        if self_id == peer_id {
            return Err(BackendError::Rejected(
                "Cannot start a conversation with yourself".into(),
            ));
        }
        let id: Uuid = self
            .rest
            .rpc(
                "get_or_create_conversation",
                &GetOrCreateConversation { other_user_id: peer_id },
            )
            .await?;
        debug!(peer = %peer_id, conversation = %id, "resolved conversation");
        Ok(id)
    }

    async fn conversations_for(&self, user: Uuid) -> BackendResult<Vec<Conversation>> {
        let query = Query::table("conversations")
            .select("*")
            .or(&[format!("user1_id.eq.{}", user), format!("user2_id.eq.{}", user)])
            .order_desc("last_message_at");
        Ok(self.rest.select(&query).await?)
    }

    async fn latest_message(&self, conversation_id: Uuid) -> BackendResult<Option<Message>> {
        let query = Query::table("messages")
            .select("*")
            .eq("conversation_id", conversation_id)
            .order_desc("created_at");
        Ok(self.rest.select_one(&query).await?)
    }

    async fn count_unread(&self, conversation_id: Uuid, viewer: Uuid) -> BackendResult<u64> {
        let query = Query::table("messages")
            .select("*")
            .eq("conversation_id", conversation_id)
            .neq("sender_id", viewer)
            .is_null("read_at");
        Ok(self.rest.count(&query).await?)
    }

    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message> {
        Ok(self.rest.insert("messages", message).await?)
    }

    async fn touch_conversation(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
    ) -> BackendResult<()> {
        let query = Query::table("conversations").eq("id", conversation_id);
        Ok(self
            .rest
            .update(&query, &ConversationTouch { last_message_at: at })
            .await?)
    }

    async fn subscribe_changes(
        &self,
        viewer: Uuid,
        filter: EventFilter,
    ) -> BackendResult<Subscription> {
        Ok(self.realtime.subscribe(viewer, filter))
    }
}

#[async_trait]
impl Marketplace for RemoteBackend {
    async fn insert_listing(&self, listing: &NewListing) -> BackendResult<FoodListing> {
        Ok(self.rest.insert("food_listings", listing).await?)
    }

    async fn insert_request(&self, request: &NewFoodRequest) -> BackendResult<FoodRequest> {
        Ok(self.rest.insert("food_requests", request).await?)
    }

    async fn listings_by_giver(&self, giver_id: Uuid) -> BackendResult<Vec<FoodListing>> {
        let query = Query::table("food_listings")
            .select("*")
            .eq("giver_id", giver_id)
            .order_desc("created_at");
        Ok(self.rest.select(&query).await?)
    }

    async fn requests_by_receiver(&self, receiver_id: Uuid) -> BackendResult<Vec<FoodRequest>> {
        let query = Query::table("food_requests")
            .select("*")
            .eq("receiver_id", receiver_id)
            .order_desc("created_at");
        Ok(self.rest.select(&query).await?)
    }

    async fn available_listings(&self) -> BackendResult<Vec<FoodListing>> {
        let query = Query::table("food_listings")
            .select(LISTING_WITH_GIVER)
            .eq("is_available", true)
            .not_null("latitude")
            .not_null("longitude")
            .order_desc("created_at");
        Ok(self.rest.select(&query).await?)
    }

    async fn active_requests(&self) -> BackendResult<Vec<FoodRequest>> {
        let query = Query::table("food_requests")
            .select("*")
            .eq("status", "active")
            .not_null("latitude")
            .not_null("longitude")
            .order_desc("created_at");
        Ok(self.rest.select(&query).await?)
    }
}
