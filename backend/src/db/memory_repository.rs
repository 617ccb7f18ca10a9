use async_trait::async_trait;
use shared::{UserProfile, WasteEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{rank_profiles, ProfileStore, RepositoryError};

#[derive(Default)]
struct Collections {
    users: HashMap<String, UserProfile>,
    events: HashMap<String, Vec<WasteEvent>>,
}

/// In-process document store. Every operation holds the lock for its whole
/// duration, so increments are atomic.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<Collections>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, RepositoryError> {
        self.inner
            .lock()
            .map_err(|_| RepositoryError::DynamoDb("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ProfileStore for MemoryRepository {
    async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, RepositoryError> {
        Ok(self.lock()?.users.get(uid).cloned())
    }

    async fn create_profile_if_absent(&self, profile: &UserProfile) -> Result<bool, RepositoryError> {
        let mut collections = self.lock()?;
        if collections.users.contains_key(&profile.id) {
            return Ok(false);
        }
        collections.users.insert(profile.id.clone(), profile.clone());
        Ok(true)
    }

    async fn update_display_name(&self, uid: &str, display_name: &str) -> Result<(), RepositoryError> {
        let mut collections = self.lock()?;
        let profile = collections.users.get_mut(uid).ok_or(RepositoryError::NotFound)?;
        profile.display_name = display_name.to_string();
        Ok(())
    }

    async fn increment_points(&self, uid: &str, delta: u64) -> Result<u64, RepositoryError> {
        let mut collections = self.lock()?;
        let profile = collections.users.get_mut(uid).ok_or(RepositoryError::NotFound)?;
        profile.points = profile.points.saturating_add(delta);
        Ok(profile.points)
    }

    async fn append_event(&self, event: &WasteEvent) -> Result<(), RepositoryError> {
        self.lock()?
            .events
            .entry(event.user_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_events(&self, uid: &str, limit: usize) -> Result<Vec<WasteEvent>, RepositoryError> {
        let collections = self.lock()?;
        let mut events = collections.events.get(uid).cloned().unwrap_or_default();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        Ok(events)
    }

    async fn top_profiles(&self, limit: usize) -> Result<Vec<UserProfile>, RepositoryError> {
        let profiles = self.lock()?.users.values().cloned().collect();
        Ok(rank_profiles(profiles, limit))
    }
}
