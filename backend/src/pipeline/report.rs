//! Stage results handed back to the caller (and printed by the CLI).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use crate::models::{BundleId, CombinationId, ExposureId, ExposureType, MasterKind};

/// Overall outcome of a stage that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    /// Some frames failed; the rest were committed.
    PartiallyFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub bundle_id: BundleId,
    pub directory: PathBuf,
    pub exposures: usize,
    pub by_type: BTreeMap<ExposureType, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MasterReport {
    pub run_id: Uuid,
    pub bundle_id: BundleId,
    pub kind: MasterKind,
    pub combination_id: CombinationId,
    pub path: PathBuf,
    pub inputs: usize,
}

/// A light frame that was calibrated and recorded.
#[derive(Debug, Clone, Serialize)]
pub struct CalibratedFrame {
    pub exposure_id: ExposureId,
    pub combination_id: CombinationId,
    pub filename: String,
}

/// A light frame that could not be calibrated.
#[derive(Debug, Clone, Serialize)]
pub struct FrameFailure {
    pub exposure_id: ExposureId,
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrectionReport {
    pub run_id: Uuid,
    pub bundle_id: BundleId,
    pub dark_master: CombinationId,
    pub flat_master: CombinationId,
    pub calibrated: Vec<CalibratedFrame>,
    /// Lights that already had a calibrated frame from an earlier run.
    pub skipped: Vec<String>,
    pub failures: Vec<FrameFailure>,
}

impl CorrectionReport {
    pub fn status(&self) -> StageStatus {
        if self.failures.is_empty() {
            StageStatus::Succeeded
        } else {
            StageStatus::PartiallyFailed
        }
    }
}

/// Result of running every stage of a night in order.
#[derive(Debug, Clone, Serialize)]
pub struct NightReport {
    pub ingest: IngestReport,
    pub dark_master: MasterReport,
    pub flat_master: MasterReport,
    pub correction: CorrectionReport,
}

impl NightReport {
    pub fn status(&self) -> StageStatus {
        self.correction.status()
    }
}
