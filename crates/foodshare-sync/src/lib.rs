//! Conversation and marketplace synchronization for the foodshare client.
//!
//! [`ConversationSession`] keeps one peer's conversation id and sends
//! messages into it; [`ConversationIndex`] builds the signed-in user's inbox
//! and keeps it current from the backend's change feed. Both reach the
//! backend only through the traits in [`backend`].

pub mod backend;
pub mod error;
pub mod feed;
pub mod index;
pub mod marketplace;
pub mod memory;
pub mod notify;
pub mod session;

pub use backend::{Auth, Backend, BackendResult, Directory, Marketplace, MessageStore};
pub use error::{BackendError, Result, SyncError};
pub use feed::{ChangeFeed, EventFilter, Subscription};
pub use index::{ConversationIndex, InboxWatch};
pub use marketplace::{ListingDraft, MapItem, MarketplaceService, NearbyItem, RequestDraft};
pub use notify::{Notice, NoticeLevel, Notifier, NoticeLog, TracingNotifier};
pub use session::{ConversationSession, SessionPhase, SessionSnapshot};
