//! Master stages: stack every dark (or flat) of a night into one frame.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use super::error::{PipelineError, PipelineResult};
use super::report::MasterReport;
use super::{blocking, Pipeline, Stage};
use crate::db::{BundleRepository, CombinationRepository, ExposureRepository};
use crate::frames::{combine, FrameError};
use crate::models::{BundleId, MasterKind, NewCombination};

impl Pipeline {
    /// Build and record the `kind` master of a bundle.
    ///
    /// Fails with `MasterAlreadyExists` if the bundle already has one, and
    /// with `EmptySelection` if it has no exposures of the matching type.
    /// The frame is written before its combination row is recorded.
    pub async fn make_master(
        &self,
        bundle_id: BundleId,
        kind: MasterKind,
    ) -> PipelineResult<MasterReport> {
        let run_id = Uuid::new_v4();
        let stage = Stage::from(kind);
        let span = info_span!("stage", stage = %stage, bundle = %bundle_id, run_id = %run_id);
        self.make_master_inner(run_id, bundle_id, kind)
            .instrument(span)
            .await
    }

    async fn make_master_inner(
        &self,
        run_id: Uuid,
        bundle_id: BundleId,
        kind: MasterKind,
    ) -> PipelineResult<MasterReport> {
        let _guard = self.locks.try_acquire(bundle_id, Stage::from(kind))?;

        let bundle = self.repository.get_bundle(bundle_id).await?;

        let existing = self
            .repository
            .list_combinations(bundle_id, Some(kind.combination_type()))
            .await?;
        if let Some(master) = existing.first() {
            return Err(PipelineError::MasterAlreadyExists {
                bundle_id,
                kind,
                filename: master.filename.clone(),
            });
        }

        let inputs = self
            .repository
            .list_exposures(bundle_id, Some(kind.exposure_type()))
            .await?;
        if inputs.is_empty() {
            return Err(PipelineError::EmptySelection {
                bundle_id,
                exposure_type: kind.exposure_type(),
            });
        }
        info!(inputs = inputs.len(), method = ?kind.combine_method(), "Combining master");

        let paths: Vec<PathBuf> = inputs.iter().map(|e| bundle.raw_path(&e.filename)).collect();
        let products = bundle.products_path(&self.config.products_dir);
        let output = products.join(kind.filename());
        let exptime = self.config.master_exposure_time;
        let frames = Arc::clone(&self.frames);
        let target = output.clone();

        blocking(move || {
            let stack = paths
                .iter()
                .map(|path| {
                    frames
                        .read_frame(path)
                        .map_err(|source| PipelineError::ReadFailed {
                            path: path.clone(),
                            source,
                        })
                })
                .collect::<PipelineResult<Vec<_>>>()?;

            let master = combine(&stack, kind.combine_method())?
                .with_image_type(kind.image_type_tag())
                .with_exptime(exptime);

            fs::create_dir_all(&products).map_err(|e| PipelineError::WriteFailed {
                path: products.clone(),
                source: FrameError::io(&products, e),
            })?;
            frames
                .write_frame(&target, &master)
                .map_err(|source| PipelineError::WriteFailed {
                    path: target.clone(),
                    source,
                })
        })
        .await?;

        let combination = self
            .repository
            .store_combination(&NewCombination {
                bundle_id,
                filename: kind.filename().to_string(),
                combination_type: kind.combination_type(),
                exposures: inputs.iter().map(|e| e.id).collect(),
                uses_combinations: Vec::new(),
            })
            .await?;
        info!(combination = %combination.id, path = %output.display(), "Master recorded");

        Ok(MasterReport {
            run_id,
            bundle_id,
            kind,
            combination_id: combination.id,
            path: output,
            inputs: inputs.len(),
        })
    }
}
