use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::targets::CollectionTarget;

/// Durable snapshot of daemon progress.
///
/// `targets` holds the remaining queue of the current cycle, including the
/// in-progress target with its cursor, so a restart resumes mid-target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressCheckpoint {
    pub run_id: Uuid,
    pub targets: Vec<CollectionTarget>,
    pub total_collected: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cycle: u32,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl ProgressCheckpoint {
    #[must_use]
    pub fn fresh(hashtags: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            targets: Vec::new(),
            total_collected: 0,
            started_at: now,
            updated_at: now,
            cycle: 0,
            hashtags,
        }
    }

    /// Targets not yet marked done, in queue order.
    pub fn pending(&self) -> impl Iterator<Item = &CollectionTarget> {
        self.targets.iter().filter(|t| !t.done)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
