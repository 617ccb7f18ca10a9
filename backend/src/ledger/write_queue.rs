use shared::{UserProfile, WasteEvent};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::db::ProfileStore;
use crate::leaderboard::LeaderboardHub;
use crate::storage::s3_service::{image_key, ImageStore};

/// Raw upload kept for the history record.
#[derive(Debug, Clone)]
pub struct ScanImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug)]
pub enum LedgerJob {
    CreateProfile(UserProfile),
    IncrementPoints { uid: String, delta: u64 },
    RecordEvent { event: WasteEvent, image: Option<ScanImage> },
    RefreshLeaderboard,
    Drain(oneshot::Sender<()>),
}

/// Jobs waiting for the worker before new ones are dropped.
pub const WRITE_QUEUE_CAPACITY: usize = 1024;

/// Non-blocking persistence.
///
/// Jobs are handed to a single background worker. The caller gets no result;
/// the worker logs every failure and moves on. Nothing is retried, and a job
/// arriving while the queue is full is dropped.
#[derive(Clone)]
pub struct WriteQueue {
    sender: mpsc::Sender<LedgerJob>,
}

impl WriteQueue {
    /// Spawns the worker on the current actix runtime.
    pub fn start(
        store: Arc<dyn ProfileStore>,
        images: Option<Arc<dyn ImageStore>>,
        leaderboard: Arc<LeaderboardHub>,
    ) -> Self {
        Self::with_capacity(store, images, leaderboard, WRITE_QUEUE_CAPACITY)
    }

    fn with_capacity(
        store: Arc<dyn ProfileStore>,
        images: Option<Arc<dyn ImageStore>>,
        leaderboard: Arc<LeaderboardHub>,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = LedgerWorker {
            store,
            images,
            leaderboard,
        };
        actix_web::rt::spawn(worker.run(receiver));
        Self { sender }
    }

    /// Returns false when the job was dropped.
    pub fn enqueue(&self, job: LedgerJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                log::warn!("Write queue is full, dropping job: {:?}", job);
                false
            }
            Err(TrySendError::Closed(job)) => {
                log::error!("Write queue is closed, dropping job: {:?}", job);
                false
            }
        }
    }

    /// Resolves once every job enqueued before this call has been processed.
    ///
    /// Waits for room in the queue rather than dropping the marker.
    pub async fn drain(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(LedgerJob::Drain(done)).await.is_err() {
            log::error!("Write queue is closed, nothing to drain");
            return;
        }
        if wait.await.is_err() {
            log::warn!("Write queue worker stopped before draining");
        }
    }
}

struct LedgerWorker {
    store: Arc<dyn ProfileStore>,
    images: Option<Arc<dyn ImageStore>>,
    leaderboard: Arc<LeaderboardHub>,
}

impl LedgerWorker {
    async fn run(self, mut receiver: mpsc::Receiver<LedgerJob>) {
        log::info!("Write queue worker started");
        while let Some(job) = receiver.recv().await {
            self.process(job).await;
        }
        log::info!("Write queue worker stopped");
    }

    async fn process(&self, job: LedgerJob) {
        match job {
            LedgerJob::CreateProfile(profile) => match self.store.create_profile_if_absent(&profile).await {
                Ok(true) => {
                    log::info!("Bootstrapped profile {}", profile.id);
                    self.refresh_leaderboard().await;
                }
                Ok(false) => {}
                Err(e) => log::error!("Failed to bootstrap profile {}: {}", profile.id, e),
            },
            LedgerJob::IncrementPoints { uid, delta } => match self.store.increment_points(&uid, delta).await {
                Ok(total) => {
                    log::info!("Awarded {} points to {} (total {})", delta, uid, total);
                    self.refresh_leaderboard().await;
                }
                Err(e) => log::error!("Failed to award {} points to {}: {}", delta, uid, e),
            },
            LedgerJob::RecordEvent { mut event, image } => {
                if let Some(image) = image {
                    event.image_ref = self.store_image(&event.user_id, &image).await;
                }
                if let Err(e) = self.store.append_event(&event).await {
                    log::error!("Failed to append waste event {} for {}: {}", event.id, event.user_id, e);
                }
            }
            LedgerJob::RefreshLeaderboard => self.refresh_leaderboard().await,
            LedgerJob::Drain(done) => {
                let _ = done.send(());
            }
        }
    }

    async fn store_image(&self, user_id: &str, image: &ScanImage) -> Option<String> {
        let images = self.images.as_ref()?;
        let key = match image_key(user_id, &image.bytes, &image.mime_type) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("Not storing scan image for {}: {}", user_id, e);
                return None;
            }
        };
        match images.put_image(&key, &image.bytes, &image.mime_type).await {
            Ok(()) => Some(key),
            Err(e) => {
                log::error!("Failed to upload scan image {}: {}", key, e);
                None
            }
        }
    }

    async fn refresh_leaderboard(&self) {
        if let Err(e) = self.leaderboard.refresh().await {
            log::error!("Failed to refresh leaderboard: {}", e);
        }
    }
}
