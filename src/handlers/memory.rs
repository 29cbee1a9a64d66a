//! Process-local document store for tests

use crate::core::sync::{handle_rwlock_read, handle_rwlock_write};
use crate::handlers::store::{ClickRecord, DocumentStore, LinkRecord, StoreError};
use std::sync::RwLock;

#[derive(Default)]
struct StoreState {
    connected: bool,
    failing: Option<String>,
    links: Vec<LinkRecord>,
    clicks: Vec<ClickRecord>,
}

/// Process-local document store
#[derive(Default)]
pub struct MemoryDocumentStore {
    state: RwLock<StoreState>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.set_connected(true);
        store
    }

    /// A store with no backing database; dashboard replies will be limited
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        if let Ok(mut state) = self.state.write() {
            state.connected = connected;
        }
    }

    /// Make every query fail with `message`, or succeed again with `None`
    pub fn set_failing(&self, message: Option<&str>) {
        if let Ok(mut state) = self.state.write() {
            state.failing = message.map(str::to_string);
        }
    }

    pub fn insert_link(&self, link: LinkRecord) -> Result<(), StoreError> {
        let mut state = handle_rwlock_write(self.state.write(), |message| {
            StoreError::Synchronisation { message }
        })?;
        state.links.push(link);
        Ok(())
    }

    pub fn insert_click(&self, click: ClickRecord) -> Result<(), StoreError> {
        let mut state = handle_rwlock_write(self.state.write(), |message| {
            StoreError::Synchronisation { message }
        })?;
        state.clicks.push(click);
        Ok(())
    }

    fn read_checked(
        &self,
        query: &str,
    ) -> Result<std::sync::RwLockReadGuard<'_, StoreState>, StoreError> {
        let state = handle_rwlock_read(self.state.read(), |message| {
            StoreError::Synchronisation { message }
        })?;
        if !state.connected {
            return Err(StoreError::Disconnected);
        }
        if let Some(message) = &state.failing {
            return Err(StoreError::QueryFailed {
                query: query.to_string(),
                message: message.clone(),
            });
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn is_connected(&self) -> bool {
        self.state.read().map(|state| state.connected).unwrap_or(false)
    }

    async fn links_for_user(&self, user_id: i64) -> Result<Vec<LinkRecord>, StoreError> {
        let state = self.read_checked("links_for_user")?;
        Ok(state
            .links
            .iter()
            .filter(|link| link.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn clicks_for_short_codes(
        &self,
        short_codes: &[String],
    ) -> Result<Vec<ClickRecord>, StoreError> {
        let state = self.read_checked("clicks_for_short_codes")?;
        Ok(state
            .clicks
            .iter()
            .filter(|click| short_codes.contains(&click.short_code))
            .cloned()
            .collect())
    }
}
