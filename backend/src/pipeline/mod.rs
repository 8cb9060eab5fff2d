//! The nightly calibration stages.
//!
//! A night runs as a four-node DAG:
//!
//! ```text
//!            ┌──> DarkMaster ──┐
//!   Ingest ──┤                 ├──> Correction
//!            └──> FlatMaster ──┘
//! ```
//!
//! Each stage is an async method on [`Pipeline`] taking the bundle id
//! explicitly. An external scheduler may call them one by one (the CLI does),
//! or [`Pipeline::run_night`] runs the whole graph in-process.
//!
//! Ingestion and the master stages are all-or-nothing. Correction commits
//! each light frame on its own and reports the ones that failed.

pub mod config;
mod correction;
pub mod error;
mod ingest;
pub mod locks;
mod master;
pub mod report;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::FullRepository;
use crate::frames::{CosmicRayFilter, FitsFrameStore, FrameStore, PassThroughFilter};
use crate::models::{BundleId, MasterKind};

pub use config::PipelineConfig;
pub use correction::CALIBRATED_PREFIX;
pub use error::{PipelineError, PipelineResult};
pub use locks::{StageGuard, StageLocks};
pub use report::{
    CalibratedFrame, CorrectionReport, FrameFailure, IngestReport, MasterReport, NightReport,
    StageStatus,
};

/// A node of the nightly DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    DarkMaster,
    FlatMaster,
    Correction,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Ingest,
        Stage::DarkMaster,
        Stage::FlatMaster,
        Stage::Correction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::DarkMaster => "dark_master",
            Stage::FlatMaster => "flat_master",
            Stage::Correction => "correction",
        }
    }

    /// Stages that must have completed before this one may start.
    pub fn upstream(&self) -> &'static [Stage] {
        match self {
            Stage::Ingest => &[],
            Stage::DarkMaster | Stage::FlatMaster => &[Stage::Ingest],
            Stage::Correction => &[Stage::DarkMaster, Stage::FlatMaster],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MasterKind> for Stage {
    fn from(kind: MasterKind) -> Self {
        match kind {
            MasterKind::Dark => Stage::DarkMaster,
            MasterKind::Flat => Stage::FlatMaster,
        }
    }
}

/// Entry point for running stages against one store and one frame backend.
///
/// Cheap to clone; clones share the stage locks.
#[derive(Clone)]
pub struct Pipeline {
    repository: Arc<dyn FullRepository>,
    frames: Arc<dyn FrameStore>,
    cosmic_ray_filter: Arc<dyn CosmicRayFilter>,
    config: PipelineConfig,
    locks: StageLocks,
}

impl Pipeline {
    pub fn new(
        repository: Arc<dyn FullRepository>,
        frames: Arc<dyn FrameStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            repository,
            frames,
            cosmic_ray_filter: Arc::new(PassThroughFilter),
            config,
            locks: StageLocks::new(),
        }
    }

    /// Pipeline reading and writing FITS files on the local filesystem.
    pub fn with_fits(repository: Arc<dyn FullRepository>, config: PipelineConfig) -> Self {
        Self::new(repository, Arc::new(FitsFrameStore::new()), config)
    }

    pub fn with_cosmic_ray_filter(mut self, filter: Arc<dyn CosmicRayFilter>) -> Self {
        self.cosmic_ray_filter = filter;
        self
    }

    /// Share stage locks with other pipelines.
    pub fn with_locks(mut self, locks: StageLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn repository(&self) -> &Arc<dyn FullRepository> {
        &self.repository
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn locks(&self) -> &StageLocks {
        &self.locks
    }

    pub async fn make_dark_master(&self, bundle_id: BundleId) -> PipelineResult<MasterReport> {
        self.make_master(bundle_id, MasterKind::Dark).await
    }

    pub async fn make_flat_master(&self, bundle_id: BundleId) -> PipelineResult<MasterReport> {
        self.make_master(bundle_id, MasterKind::Flat).await
    }

    /// Run the whole DAG for one night: ingest, both masters concurrently,
    /// then correction. Stops at the first stage that fails.
    pub async fn run_night(
        &self,
        bundle_id: BundleId,
        directory: impl AsRef<Path>,
    ) -> PipelineResult<NightReport> {
        let ingest = self.ingest(bundle_id, directory).await?;
        let (dark_master, flat_master) = tokio::try_join!(
            self.make_dark_master(bundle_id),
            self.make_flat_master(bundle_id)
        )?;
        let correction = self.correct(bundle_id).await?;

        info!(
            bundle = %bundle_id,
            calibrated = correction.calibrated.len(),
            failed = correction.failures.len(),
            "Night complete"
        );

        Ok(NightReport {
            ingest,
            dark_master,
            flat_master,
            correction,
        })
    }
}

/// Run blocking frame work off the async runtime.
async fn blocking<T, F>(f: F) -> PipelineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
