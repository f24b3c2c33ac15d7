//! The signed-in user's inbox.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use foodshare_types::{ChangeEvent, Conversation, ConversationDetails};

use crate::backend::Backend;
use crate::error::{BackendError, Result, SyncError};
use crate::feed::EventFilter;
use crate::notify::Notice;

#[derive(Default)]
struct IndexState {
    viewer: Option<Uuid>,
    conversations: Vec<ConversationDetails>,
    generation: u64,
    in_flight: usize,
}

pub struct ConversationIndex {
    backend: Backend,
    state: Mutex<IndexState>,
    /// Conversation ids of the last committed inbox, read by the change-feed
    /// filter.
    known: Arc<RwLock<HashSet<Uuid>>>,
    updates: watch::Sender<Vec<ConversationDetails>>,
}

impl ConversationIndex {
    pub fn new(backend: Backend) -> Self {
        let (updates, _) = watch::channel(Vec::new());
        Self {
            backend,
            state: Mutex::new(IndexState::default()),
            known: Arc::new(RwLock::new(HashSet::new())),
            updates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- Observers --

    /// Last committed inbox.
    pub fn conversations(&self) -> Vec<ConversationDetails> {
        self.lock().conversations.clone()
    }

    pub fn viewer(&self) -> Option<Uuid> {
        self.lock().viewer
    }

    pub fn is_loading(&self) -> bool {
        self.lock().in_flight > 0
    }

    /// Receives every committed inbox.
    pub fn updates(&self) -> watch::Receiver<Vec<ConversationDetails>> {
        self.updates.subscribe()
    }

    // -- Operations --

    /// Refresh the inbox of whoever is signed in. Signed out yields an empty
    /// inbox.
    pub async fn load(&self) -> Result<Vec<ConversationDetails>> {
        match self.current_viewer().await? {
            Some(viewer) => self.refresh(viewer).await,
            None => {
                self.commit_empty();
                Ok(Vec::new())
            }
        }
    }

    /// Rebuild `viewer`'s inbox.
    ///
    /// Per-conversation lookups run concurrently and are joined in list
    /// order. A failed lookup leaves its fields empty on that row only. If
    /// the conversation list itself cannot be fetched the previous inbox is
    /// kept. A refresh overtaken by a newer one returns its rows but does
    /// not replace the newer state.
    pub async fn refresh(&self, viewer: Uuid) -> Result<Vec<ConversationDetails>> {
        let generation = {
            let mut s = self.lock();
            s.generation += 1;
            s.in_flight += 1;
            s.generation
        };

        let outcome = self.fetch(viewer).await;

        let mut s = self.lock();
        s.in_flight = s.in_flight.saturating_sub(1);
        match outcome {
            Ok(rows) => {
                if s.generation == generation {
                    s.viewer = Some(viewer);
                    s.conversations = rows.clone();
                    self.remember(&rows);
                    self.updates.send_replace(rows.clone());
                } else {
                    debug!(viewer = %viewer, "discarding superseded inbox refresh");
                }
                Ok(rows)
            }
            Err(e) => {
                drop(s);
                error!(viewer = %viewer, "Failed to fetch conversations: {}", e);
                self.backend
                    .notifier
                    .notify(Notice::error("Failed to load conversations"));
                Err(e.into())
            }
        }
    }

    async fn current_viewer(&self) -> Result<Option<Uuid>> {
        self.backend.auth.current_user().await.map_err(|e| {
            error!("Failed to read current user: {}", e);
            self.backend
                .notifier
                .notify(Notice::error("Could not check your sign-in"));
            SyncError::from(e)
        })
    }

    async fn fetch(&self, viewer: Uuid) -> std::result::Result<Vec<ConversationDetails>, BackendError> {
        let conversations = self.backend.store.conversations_for(viewer).await?;
        let rows = join_all(conversations.iter().map(|c| self.details(c, viewer))).await;
        Ok(rows)
    }

    async fn details(&self, conversation: &Conversation, viewer: Uuid) -> ConversationDetails {
        let mut row = ConversationDetails::bare(conversation, viewer);

        let (profile, latest, unread) = tokio::join!(
            self.backend.directory.get_profile(row.other_user_id),
            self.backend.store.latest_message(conversation.id),
            self.backend.store.count_unread(conversation.id, viewer),
        );

        match profile {
            Ok(Some(profile)) => {
                row.other_user_name = profile.full_name.filter(|n| !n.is_empty());
                row.other_user_avatar = profile.profile_picture_url.filter(|u| !u.is_empty());
            }
            Ok(None) => {}
            Err(e) => warn!(conversation = %conversation.id, "profile lookup failed: {}", e),
        }
        match latest {
            Ok(Some(message)) => {
                row.last_message_text = Some(message.message_text);
                row.last_message_at = Some(message.created_at);
            }
            Ok(None) => {}
            Err(e) => warn!(conversation = %conversation.id, "last message lookup failed: {}", e),
        }
        match unread {
            Ok(count) => row.unread_count = count,
            Err(e) => warn!(conversation = %conversation.id, "unread count failed: {}", e),
        }

        row
    }

    fn commit_empty(&self) {
        let mut s = self.lock();
        s.generation += 1;
        s.viewer = None;
        s.conversations.clear();
        self.remember(&[]);
        self.updates.send_replace(Vec::new());
    }

    fn remember(&self, rows: &[ConversationDetails]) {
        let mut known = self.known.write().unwrap_or_else(|e| e.into_inner());
        known.clear();
        known.extend(rows.iter().map(|r| r.id));
    }

    /// Changes worth a refresh for `viewer`: messages in conversations of the
    /// current inbox, and changes to conversations the viewer takes part in.
    fn relevance_filter(&self, viewer: Uuid) -> EventFilter {
        let known = Arc::clone(&self.known);
        Arc::new(move |event| match event {
            ChangeEvent::MessageCreated(message) => known
                .read()
                .map(|ids| ids.contains(&message.conversation_id))
                .unwrap_or(true),
            ChangeEvent::ConversationChanged(conversation) => conversation.involves(viewer),
        })
    }

    /// Load the inbox and keep it current.
    ///
    /// Subscribes to the backend change feed before the first load, then
    /// refreshes whenever a relevant change arrives; changes that queue up
    /// during a refresh are folded into the next one. The subscription lives
    /// as long as the returned [`InboxWatch`].
    pub async fn watch(self: &Arc<Self>) -> Result<InboxWatch> {
        let viewer = self.current_viewer().await?.ok_or(SyncError::AuthRequired)?;

        let mut subscription = self
            .backend
            .store
            .subscribe_changes(viewer, self.relevance_filter(viewer))
            .await
            .map_err(|e| {
                error!(viewer = %viewer, "Failed to subscribe to changes: {}", e);
                SyncError::from(e)
            })?;
        info!(viewer = %viewer, subscription = %subscription.id(), "watching inbox");

        // A failed first load is already reported; live updates still start.
        let _ = self.refresh(viewer).await;

        let index = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let mut folded = 0usize;
                while subscription.try_recv().is_some() {
                    folded += 1;
                }
                debug!(
                    table = event.table(),
                    conversation = %event.conversation_id(),
                    folded,
                    "inbox change"
                );
                let _ = index.refresh(viewer).await;
            }
            debug!(viewer = %viewer, "change feed closed");
        });

        Ok(InboxWatch { task: Some(task) })
    }
}

/// Live inbox updates. Dropping the handle (or calling [`InboxWatch::close`])
/// releases the change-feed subscription.
pub struct InboxWatch {
    task: Option<JoinHandle<()>>,
}

impl InboxWatch {
    /// Stop watching and wait until the subscription is released.
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for InboxWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
