#![allow(dead_code)]

use std::sync::Arc;

use uuid::Uuid;

use foodshare_sync::memory::MemoryBackend;
use foodshare_sync::{Backend, NoticeLog};
use foodshare_types::Profile;

pub struct Harness {
    pub store: Arc<MemoryBackend>,
    pub notices: Arc<NoticeLog>,
    pub backend: Backend,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryBackend::new());
        let notices = Arc::new(NoticeLog::new());
        let backend = Backend::from_shared(store.clone(), notices.clone());
        Self { store, notices, backend }
    }

    /// Registers a user with a profile and returns their id.
    pub fn user(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store.add_profile(Profile {
            id,
            full_name: Some(name.to_string()),
            profile_picture_url: Some(format!("https://cdn.example/{}.png", name.to_lowercase())),
            organization_name: None,
        });
        id
    }

    pub fn signed_in_as(&self, name: &str) -> Uuid {
        let id = self.user(name);
        self.store.sign_in(id);
        id
    }
}
