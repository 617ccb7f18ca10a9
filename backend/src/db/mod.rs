pub mod dynamodb_repository;
pub mod memory_repository;

use async_trait::async_trait;
use shared::{UserProfile, WasteEvent};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Item not found")]
    NotFound,
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

/// Document store holding `users/{uid}` and `users/{uid}/wasteIdentifications/{eventId}`.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, RepositoryError>;

    /// Returns `false` if a profile with that id already existed.
    async fn create_profile_if_absent(&self, profile: &UserProfile) -> Result<bool, RepositoryError>;

    async fn update_display_name(&self, uid: &str, display_name: &str) -> Result<(), RepositoryError>;

    /// Atomically adds `delta` to the stored total and returns the new value.
    /// Fails with `NotFound` if the profile does not exist.
    async fn increment_points(&self, uid: &str, delta: u64) -> Result<u64, RepositoryError>;

    async fn append_event(&self, event: &WasteEvent) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list_events(&self, uid: &str, limit: usize) -> Result<Vec<WasteEvent>, RepositoryError>;

    /// Profiles ordered by points descending, then id ascending.
    async fn top_profiles(&self, limit: usize) -> Result<Vec<UserProfile>, RepositoryError>;
}

/// Sorts by points descending with the user id as tie-break, then truncates.
pub fn rank_profiles(mut profiles: Vec<UserProfile>, limit: usize) -> Vec<UserProfile> {
    profiles.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.id.cmp(&b.id)));
    profiles.truncate(limit);
    profiles
}
