//! At most one run per (bundle, stage) inside a process.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::error::{PipelineError, PipelineResult};
use super::Stage;
use crate::models::BundleId;

/// Registry of stage runs currently in flight.
///
/// Clones share the registry, so pipelines built from the same `StageLocks`
/// exclude each other. Different stages of one bundle never conflict.
#[derive(Debug, Clone, Default)]
pub struct StageLocks {
    held: Arc<Mutex<HashSet<(BundleId, Stage)>>>,
}

impl StageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `stage` for `bundle_id`, failing if it is already claimed.
    ///
    /// The claim is released when the returned guard is dropped.
    pub fn try_acquire(&self, bundle_id: BundleId, stage: Stage) -> PipelineResult<StageGuard> {
        let key = (bundle_id, stage);
        if !self.held.lock().insert(key) {
            return Err(PipelineError::StageInProgress { bundle_id, stage });
        }
        debug!(bundle = %bundle_id, stage = %stage, "Stage lock acquired");
        Ok(StageGuard {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_held(&self, bundle_id: BundleId, stage: Stage) -> bool {
        self.held.lock().contains(&(bundle_id, stage))
    }
}

/// Releases its (bundle, stage) claim on drop.
#[derive(Debug)]
pub struct StageGuard {
    held: Arc<Mutex<HashSet<(BundleId, Stage)>>>,
    key: (BundleId, Stage),
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
    }
}
