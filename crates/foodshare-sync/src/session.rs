//! Conversation with one selected peer.
//!
//! The session caches the conversation id for "me ↔ peer". Every peer switch
//! clears the cached id in the same critical section that records the new
//! peer, so no caller can observe the previous peer's id next to the new
//! peer. Resolutions carry the generation they started in; a result arriving
//! after a newer switch is dropped.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, warn};
use uuid::Uuid;

use foodshare_types::Message;
use foodshare_types::api::NewMessage;

use crate::backend::Backend;
use crate::error::{BackendError, Result, SyncError};
use crate::notify::Notice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No peer selected, or not signed in.
    Idle,
    /// Waiting for the conversation id of the selected peer.
    Resolving,
    /// Conversation id known for the selected peer.
    Ready(Uuid),
}

/// What a view renders from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub current_user: Option<Uuid>,
    pub peer: Option<Uuid>,
    pub phase: SessionPhase,
    pub loading: bool,
}

impl SessionSnapshot {
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self.phase {
            SessionPhase::Ready(id) => Some(id),
            SessionPhase::Idle | SessionPhase::Resolving => None,
        }
    }
}

struct SessionState {
    snapshot: SessionSnapshot,
    /// Bumped on every peer or user change and every explicit re-resolve.
    generation: u64,
    in_flight: usize,
}

/// A resolution started for one (user, peer) pair in one generation.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    me: Uuid,
    peer: Uuid,
}

impl SessionState {
    /// Drop the cached id and, if both sides are known, enter `Resolving`.
    fn restart(&mut self) -> Option<Ticket> {
        self.generation += 1;
        self.snapshot.phase = SessionPhase::Idle;
        let ticket = self.ticket()?;
        self.snapshot.phase = SessionPhase::Resolving;
        Some(ticket)
    }

    fn ticket(&self) -> Option<Ticket> {
        Some(Ticket {
            generation: self.generation,
            me: self.snapshot.current_user?,
            peer: self.snapshot.peer?,
        })
    }

    fn begin_call(&mut self) {
        self.in_flight += 1;
        self.snapshot.loading = true;
    }

    fn finish_call(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.snapshot.loading = self.in_flight > 0;
    }
}

pub struct ConversationSession {
    backend: Backend,
    state: Mutex<SessionState>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl ConversationSession {
    pub fn new(backend: Backend) -> Self {
        let snapshot = SessionSnapshot {
            current_user: None,
            peer: None,
            phase: SessionPhase::Idle,
            loading: false,
        };
        let (snapshots, _) = watch::channel(snapshot.clone());
        Self {
            backend,
            state: Mutex::new(SessionState {
                snapshot,
                generation: 0,
                in_flight: 0,
            }),
            snapshots,
        }
    }

    /// Session for a view: loads the signed-in user, then resolves the
    /// conversation with `peer` if one is given.
    pub async fn open(backend: Backend, peer: Option<Uuid>) -> Self {
        let session = Self::new(backend);
        session.load_current_user().await;
        session.select_peer(peer).await;
        session
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a change and publish the resulting snapshot before releasing
    /// the lock, so watchers see snapshots in mutation order.
    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.lock();
        let out = f(&mut state);
        self.snapshots.send_replace(state.snapshot.clone());
        out
    }

    // -- Observers --

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.lock().snapshot.conversation_id()
    }

    pub fn current_user(&self) -> Option<Uuid> {
        self.lock().snapshot.current_user
    }

    pub fn peer(&self) -> Option<Uuid> {
        self.lock().snapshot.peer
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().snapshot.phase
    }

    pub fn is_loading(&self) -> bool {
        self.lock().snapshot.loading
    }

    /// Follow every state change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    // -- Operations --

    /// Re-read the signed-in user. A different user than before restarts
    /// resolution for the selected peer. A failed lookup keeps the
    /// last-known user and conversation.
    pub async fn load_current_user(&self) -> Option<Uuid> {
        let user = match self.backend.auth.current_user().await {
            Ok(user) => user,
            Err(e) => {
                error!("Failed to read current user: {}", e);
                self.backend
                    .notifier
                    .notify(Notice::error("Could not check your sign-in"));
                return self.current_user();
            }
        };

        let ticket = self.update(|s| {
            if s.snapshot.current_user == user {
                return None;
            }
            s.snapshot.current_user = user;
            s.restart()
        });
        if let Some(ticket) = ticket {
            self.resolve(ticket).await;
        }
        user
    }

    /// Switch to another peer (or to none). The previous conversation id is
    /// cleared before the new resolution starts.
    pub async fn select_peer(&self, peer: Option<Uuid>) -> Option<Uuid> {
        let ticket = self.update(|s| {
            s.snapshot.peer = peer;
            s.restart()
        });
        match ticket {
            Some(ticket) => self.resolve(ticket).await,
            None => None,
        }
    }

    /// Resolve the current peer again. A valid cached id stays visible while
    /// the call runs.
    pub async fn refetch(&self) -> Option<Uuid> {
        let ticket = self.update(|s| {
            s.generation += 1;
            let ticket = s.ticket()?;
            if s.snapshot.phase == SessionPhase::Idle {
                s.snapshot.phase = SessionPhase::Resolving;
            }
            Some(ticket)
        });
        match ticket {
            Some(ticket) => self.resolve(ticket).await,
            None => None,
        }
    }

    /// The canonical conversation between two users, created on first use.
    pub async fn resolve_or_create(
        &self,
        self_id: Uuid,
        peer_id: Uuid,
    ) -> std::result::Result<Uuid, BackendError> {
        self.backend
            .store
            .resolve_or_create_conversation(self_id, peer_id)
            .await
    }

    async fn resolve(&self, ticket: Ticket) -> Option<Uuid> {
        self.update(|s| s.begin_call());
        let result = self.resolve_or_create(ticket.me, ticket.peer).await;

        let (current, resolved) = self.update(|s| {
            s.finish_call();
            if s.generation != ticket.generation {
                return (false, None);
            }
            match &result {
                Ok(id) => {
                    s.snapshot.phase = SessionPhase::Ready(*id);
                    (true, Some(*id))
                }
                Err(_) => {
                    s.snapshot.phase = SessionPhase::Idle;
                    (true, None)
                }
            }
        });

        match result {
            Ok(id) if !current => {
                debug!(peer = %ticket.peer, conversation = %id, "discarding stale conversation resolution");
            }
            Err(e) if current => {
                error!(peer = %ticket.peer, "Error initializing conversation: {}", e);
                self.backend
                    .notifier
                    .notify(Notice::error("Failed to start conversation"));
            }
            Err(e) => {
                debug!(peer = %ticket.peer, "stale conversation resolution failed: {}", e);
            }
            Ok(_) => {}
        }
        resolved
    }

    /// Send `text` to the selected peer.
    ///
    /// Resolves the conversation first when no id is cached yet. The message
    /// insert and the conversation's `last_message_at` bump are two separate
    /// writes; a failed bump is logged and the send still counts.
    pub async fn send(&self, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let (me, peer, cached, generation) = {
            let s = self.lock();
            (
                s.snapshot.current_user,
                s.snapshot.peer,
                s.snapshot.conversation_id(),
                s.generation,
            )
        };
        let Some(me) = me else {
            self.backend
                .notifier
                .notify(Notice::info("Sign in to send messages"));
            return Err(SyncError::AuthRequired);
        };
        if cached.is_none() && peer.is_none() {
            return Err(SyncError::NoPeerSelected);
        }

        self.update(|s| s.begin_call());
        let result = self.deliver(me, peer, cached, generation, text).await;
        self.update(|s| s.finish_call());

        if let Err(e) = &result {
            error!("Error sending message: {}", e);
            self.backend
                .notifier
                .notify(Notice::error("Failed to send message"));
        }
        result
    }

    async fn deliver(
        &self,
        me: Uuid,
        peer: Option<Uuid>,
        cached: Option<Uuid>,
        generation: u64,
        text: &str,
    ) -> Result<Message> {
        let conversation_id = match cached {
            Some(id) => id,
            None => {
                let peer = peer.ok_or(SyncError::NoPeerSelected)?;
                let id = self.resolve_or_create(me, peer).await?;
                self.update(|s| {
                    // Only cache if the selection did not move on meanwhile.
                    if s.generation == generation {
                        s.snapshot.phase = SessionPhase::Ready(id);
                    }
                });
                id
            }
        };

        let message = self
            .backend
            .store
            .insert_message(&NewMessage {
                conversation_id,
                sender_id: me,
                message_text: text.to_string(),
            })
            .await?;

        let touched_at = Utc::now().max(message.created_at);
        if let Err(e) = self
            .backend
            .store
            .touch_conversation(conversation_id, touched_at)
            .await
        {
            warn!(conversation = %conversation_id, "Message stored but last_message_at not advanced: {}", e);
        }

        Ok(message)
    }
}
