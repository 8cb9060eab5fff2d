//! Correction: dark-subtract and flat-correct every light frame of a night.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::error::{PipelineError, PipelineResult};
use super::report::{CalibratedFrame, CorrectionReport, FrameFailure};
use super::{blocking, Pipeline, Stage};
use crate::db::{BundleRepository, CombinationRepository, ExposureRepository};
use crate::frames::{dark_scale, flat_correct, subtract_dark, Frame, FrameError};
use crate::models::{
    BundleId, CombinationType, Exposure, ExposureCombination, ExposureId, ExposureType,
    MasterKind, NewCombination, NightBundle,
};

/// Prefix of calibrated light file names.
pub const CALIBRATED_PREFIX: &str = "calib_";

/// Both masters of a bundle, loaded once per run.
struct Masters {
    dark: ExposureCombination,
    flat: ExposureCombination,
    dark_frame: Frame,
    dark_exptime: f64,
    flat_frame: Frame,
}

impl Pipeline {
    /// Calibrate every light exposure of a bundle that has not been
    /// calibrated yet.
    ///
    /// Requires exactly one dark and one flat master. A light that fails is
    /// listed in the report's `failures` and the others carry on.
    pub async fn correct(&self, bundle_id: BundleId) -> PipelineResult<CorrectionReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("stage", stage = %Stage::Correction, bundle = %bundle_id, run_id = %run_id);
        self.correct_inner(run_id, bundle_id).instrument(span).await
    }

    async fn correct_inner(
        &self,
        run_id: Uuid,
        bundle_id: BundleId,
    ) -> PipelineResult<CorrectionReport> {
        let _guard = self.locks.try_acquire(bundle_id, Stage::Correction)?;

        let bundle = self.repository.get_bundle(bundle_id).await?;
        let dark = self.single_master(bundle_id, MasterKind::Dark).await?;
        let flat = self.single_master(bundle_id, MasterKind::Flat).await?;
        let masters = Arc::new(self.load_masters(&bundle, dark, flat).await?);

        let lights = self
            .repository
            .list_exposures(bundle_id, Some(ExposureType::Light))
            .await?;
        let done: HashSet<ExposureId> = self
            .repository
            .list_combinations(bundle_id, Some(CombinationType::CalibratedLight))
            .await?
            .into_iter()
            .flat_map(|c| c.exposures)
            .collect();
        info!(lights = lights.len(), already_calibrated = done.len(), "Calibrating lights");

        let mut report = CorrectionReport {
            run_id,
            bundle_id,
            dark_master: masters.dark.id,
            flat_master: masters.flat.id,
            calibrated: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        };

        for light in lights {
            if done.contains(&light.id) {
                report.skipped.push(light.filename);
                continue;
            }

            match self.calibrate_light(&bundle, &light, &masters).await {
                Ok(frame) => report.calibrated.push(frame),
                Err(e) => {
                    warn!(file = %light.filename, error = %e, "Light frame failed");
                    report.failures.push(FrameFailure {
                        exposure_id: light.id,
                        filename: light.filename,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            calibrated = report.calibrated.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "Correction complete"
        );
        Ok(report)
    }

    /// The one `kind` master of a bundle; none is `MissingMaster`.
    async fn single_master(
        &self,
        bundle_id: BundleId,
        kind: MasterKind,
    ) -> PipelineResult<ExposureCombination> {
        self.repository
            .get_single_combination(bundle_id, kind.combination_type())
            .await
            .map_err(|e| match PipelineError::from(e) {
                PipelineError::NotFound(_) => PipelineError::MissingMaster { bundle_id, kind },
                other => other,
            })
    }

    async fn load_masters(
        &self,
        bundle: &NightBundle,
        dark: ExposureCombination,
        flat: ExposureCombination,
    ) -> PipelineResult<Masters> {
        let products = bundle.products_path(&self.config.products_dir);
        let dark_path = products.join(&dark.filename);
        let flat_path = products.join(&flat.filename);
        let frames = Arc::clone(&self.frames);

        blocking(move || {
            let read = |path: &PathBuf| {
                frames
                    .read_frame(path)
                    .map_err(|source| PipelineError::ReadFailed {
                        path: path.clone(),
                        source,
                    })
            };
            let dark_frame = read(&dark_path)?;
            let flat_frame = read(&flat_path)?;
            let dark_exptime =
                dark_frame
                    .header
                    .exptime
                    .ok_or_else(|| PipelineError::ReadFailed {
                        path: dark_path.clone(),
                        source: FrameError::MissingKeyword("EXPTIME".to_string()),
                    })?;

            Ok(Masters {
                dark,
                flat,
                dark_frame,
                dark_exptime,
                flat_frame,
            })
        })
        .await
    }

    /// Calibrate, write and record one light frame.
    async fn calibrate_light(
        &self,
        bundle: &NightBundle,
        light: &Exposure,
        masters: &Arc<Masters>,
    ) -> PipelineResult<CalibratedFrame> {
        let filename = format!("{}{}", CALIBRATED_PREFIX, light.filename);
        let source = bundle.raw_path(&light.filename);
        let target = bundle
            .products_path(&self.config.products_dir)
            .join(&filename);
        let light_exptime = light.exptime.value();
        let min_value = self.config.flat_min_value;
        let policy = self.config.low_flat_policy;
        let frames = Arc::clone(&self.frames);
        let filter = Arc::clone(&self.cosmic_ray_filter);
        let masters_for_task = Arc::clone(masters);

        blocking(move || {
            let masters = masters_for_task;
            let raw = frames
                .read_frame(&source)
                .map_err(|e| PipelineError::ReadFailed {
                    path: source.clone(),
                    source: e,
                })?;

            let mut frame = filter.clean(raw)?;
            let scale = dark_scale(light_exptime, masters.dark_exptime)?;
            subtract_dark(&mut frame, &masters.dark_frame, scale)?;
            flat_correct(&mut frame, &masters.flat_frame, min_value, policy)?;

            frames
                .write_frame(&target, &frame)
                .map_err(|source| PipelineError::WriteFailed {
                    path: target.clone(),
                    source,
                })
        })
        .await?;

        let combination = self
            .repository
            .store_combination(&NewCombination {
                bundle_id: bundle.id,
                filename: filename.clone(),
                combination_type: CombinationType::CalibratedLight,
                exposures: vec![light.id],
                uses_combinations: vec![masters.dark.id, masters.flat.id],
            })
            .await?;

        Ok(CalibratedFrame {
            exposure_id: light.id,
            combination_id: combination.id,
            filename,
        })
    }
}
