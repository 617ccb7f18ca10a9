use shared::{LeaderboardEntry, LeaderboardState, LEADERBOARD_SIZE};
use std::sync::Arc;
use tokio::sync::watch;

use crate::db::{ProfileStore, RepositoryError};

/// Live top-N view over the profile store.
///
/// The snapshot starts as `Loading` and is republished after every write that
/// can change a point total or display name. Subscribers are pushed each new
/// snapshot; nobody polls the store.
pub struct LeaderboardHub {
    store: Arc<dyn ProfileStore>,
    sender: watch::Sender<LeaderboardState>,
    limit: usize,
}

impl LeaderboardHub {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self::with_limit(store, LEADERBOARD_SIZE)
    }

    pub fn with_limit(store: Arc<dyn ProfileStore>, limit: usize) -> Self {
        let (sender, _) = watch::channel(LeaderboardState::Loading);
        Self { store, sender, limit }
    }

    pub fn current(&self) -> LeaderboardState {
        self.sender.borrow().clone()
    }

    /// Re-reads the top profiles and publishes them if they changed.
    pub async fn refresh(&self) -> Result<(), RepositoryError> {
        let profiles = self.store.top_profiles(self.limit).await?;
        let entries: Vec<LeaderboardEntry> = profiles.iter().take(self.limit).map(LeaderboardEntry::from).collect();
        let next = LeaderboardState::Ready { entries };

        self.sender.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        Ok(())
    }

    pub fn subscribe(&self) -> LeaderboardSubscription {
        LeaderboardSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Handle to a live leaderboard. Dropping it unsubscribes.
pub struct LeaderboardSubscription {
    receiver: watch::Receiver<LeaderboardState>,
}

impl LeaderboardSubscription {
    /// The latest snapshot, marking it as seen.
    #[cfg(test)]
    pub(crate) fn latest(&mut self) -> LeaderboardState {
        self.receiver.borrow_and_update().clone()
    }

    /// Waits for the next published snapshot. Returns `None` once the hub is gone.
    #[cfg(test)]
    pub(crate) async fn changed(&mut self) -> Option<LeaderboardState> {
        self.receiver.changed().await.ok()?;
        Some(self.latest())
    }

    /// Releases the handle. Same as dropping it.
    pub fn unsubscribe(self) {}

    pub(crate) fn into_receiver(self) -> watch::Receiver<LeaderboardState> {
        self.receiver
    }
}
