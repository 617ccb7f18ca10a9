pub mod write_queue;

use shared::{ClassificationResult, UserProfile, WasteEvent, POINTS_PER_SCAN};

use crate::auth::models::Session;
use write_queue::{LedgerJob, ScanImage, WriteQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Recorded { points: u64 },
    SkippedAnonymous,
    SkippedUnauthenticated,
}

impl LedgerOutcome {
    pub fn points_awarded(&self) -> u64 {
        match self {
            LedgerOutcome::Recorded { points } => *points,
            _ => 0,
        }
    }
}

/// Point grants and scan history for successful classifications.
#[derive(Clone)]
pub struct GamificationLedger {
    queue: WriteQueue,
    anonymous_points: bool,
}

impl GamificationLedger {
    pub fn new(queue: WriteQueue, anonymous_points: bool) -> Self {
        Self {
            queue,
            anonymous_points,
        }
    }

    /// Enqueues one `+10` increment and one history append for an eligible
    /// session. Returns immediately; persistence failures are only logged.
    pub fn record_scan(
        &self,
        session: Option<&Session>,
        result: &ClassificationResult,
        image: Option<ScanImage>,
    ) -> LedgerOutcome {
        let Some(session) = session else {
            return LedgerOutcome::SkippedUnauthenticated;
        };
        if session.is_anonymous && !self.anonymous_points {
            log::debug!("Skipping points for anonymous session {}", session.uid);
            return LedgerOutcome::SkippedAnonymous;
        }

        self.queue.enqueue(LedgerJob::IncrementPoints {
            uid: session.uid.clone(),
            delta: POINTS_PER_SCAN,
        });
        self.queue.enqueue(LedgerJob::RecordEvent {
            event: WasteEvent::new(session.uid.clone(), result, None),
            image,
        });

        LedgerOutcome::Recorded {
            points: POINTS_PER_SCAN,
        }
    }

    /// Creates the session's profile if this is the first time it is seen.
    pub fn bootstrap_profile(&self, session: &Session) {
        self.queue.enqueue(LedgerJob::CreateProfile(UserProfile::new(
            session.uid.clone(),
            session.email.clone(),
            session.display_name.clone(),
            session.photo_url.clone(),
        )));
    }

    pub fn refresh_leaderboard(&self) {
        self.queue.enqueue(LedgerJob::RefreshLeaderboard);
    }

    pub async fn drain(&self) {
        self.queue.drain().await;
    }
}
