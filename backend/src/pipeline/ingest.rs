//! Ingest: catalogue the raw frames of a night directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use qtty::Seconds;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::error::{PipelineError, PipelineResult};
use super::report::IngestReport;
use super::{blocking, Pipeline, Stage};
use crate::db::{BundleRepository, RepositoryError};
use crate::frames::{FrameError, FrameStore};
use crate::models::{BundleId, ExposureType, FrameShape, NewExposure, NewNightBundle};

impl Pipeline {
    /// Create bundle `bundle_id` with one exposure per raw frame in
    /// `directory`.
    ///
    /// Aborts on the first frame whose header cannot be read or classified;
    /// nothing is recorded in that case.
    pub async fn ingest(
        &self,
        bundle_id: BundleId,
        directory: impl AsRef<Path>,
    ) -> PipelineResult<IngestReport> {
        let run_id = Uuid::new_v4();
        let directory = directory.as_ref().to_path_buf();
        let span = info_span!("stage", stage = %Stage::Ingest, bundle = %bundle_id, run_id = %run_id);
        self.ingest_inner(run_id, bundle_id, directory)
            .instrument(span)
            .await
    }

    async fn ingest_inner(
        &self,
        run_id: Uuid,
        bundle_id: BundleId,
        directory: PathBuf,
    ) -> PipelineResult<IngestReport> {
        let _guard = self.locks.try_acquire(bundle_id, Stage::Ingest)?;

        match self.repository.get_bundle(bundle_id).await {
            Ok(_) => return Err(PipelineError::BundleAlreadyIngested(bundle_id)),
            Err(RepositoryError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let directory = fs::canonicalize(&directory)
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| PipelineError::DirectoryNotFound(directory.clone()))?;
        info!(directory = %directory.display(), "Ingesting night directory");

        let frames = Arc::clone(&self.frames);
        let marker_config = self.config.clone();
        let scan_dir = directory.clone();
        let exposures = blocking(move || {
            let files = raw_frame_files(&scan_dir, |name| marker_config.is_raw_frame(name))?;
            classify_frames(frames.as_ref(), &scan_dir, &files)
        })
        .await?;

        let (bundle, stored) = self
            .repository
            .store_night_bundle(&NewNightBundle::new(bundle_id, &directory), &exposures)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict { .. } => PipelineError::BundleAlreadyIngested(bundle_id),
                other => other.into(),
            })?;

        let mut by_type = BTreeMap::new();
        for exposure in &stored {
            *by_type.entry(exposure.exposure_type).or_insert(0) += 1;
        }
        info!(exposures = stored.len(), ?by_type, "Ingestion complete");

        Ok(IngestReport {
            run_id,
            bundle_id: bundle.id,
            directory: bundle.directory_path,
            exposures: stored.len(),
            by_type,
        })
    }
}

/// Names of the regular files in `dir` accepted by `is_raw`, sorted.
fn raw_frame_files(dir: &Path, is_raw: impl Fn(&str) -> bool) -> PipelineResult<Vec<String>> {
    let entries =
        fs::read_dir(dir).map_err(|_| PipelineError::DirectoryNotFound(dir.to_path_buf()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::ReadFailed {
            path: dir.to_path_buf(),
            source: FrameError::io(dir, e),
        })?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!(path = %entry.path().display(), "Skipping non UTF-8 file name");
            continue;
        };
        if is_raw(&name) {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

/// Read and classify each frame header, stopping at the first failure.
fn classify_frames(
    frames: &dyn FrameStore,
    dir: &Path,
    files: &[String],
) -> PipelineResult<Vec<NewExposure>> {
    files
        .iter()
        .map(|filename| {
            let path = dir.join(filename);
            let header = frames
                .read_header(&path)
                .map_err(|source| PipelineError::ReadFailed {
                    path: path.clone(),
                    source,
                })?;

            let exposure_type = header
                .image_type
                .as_deref()
                .and_then(|tag| tag.parse::<ExposureType>().ok())
                .ok_or_else(|| PipelineError::UnknownExposureType {
                    filename: filename.clone(),
                    tag: header.image_type.clone(),
                })?;
            let exptime = header.exptime.ok_or_else(|| PipelineError::ReadFailed {
                path: path.clone(),
                source: FrameError::MissingKeyword("EXPTIME".to_string()),
            })?;

            debug!(file = %filename, %exposure_type, exptime, "Classified frame");
            Ok(NewExposure {
                filename: filename.clone(),
                exposure_type,
                shape: FrameShape::new(header.naxis, header.naxis1, header.naxis2),
                exptime: Seconds::new(exptime),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{fits, Frame};

    #[test]
    fn test_raw_frame_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.fits", "a.FIT", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("products.fits")).unwrap();

        let files = raw_frame_files(dir.path(), |n| n.to_lowercase().contains(".fit")).unwrap();
        assert_eq!(files, ["a.FIT", "b.fits"]);
    }

    #[test]
    fn test_classify_reads_type_shape_and_exptime() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::filled(3, 2, 1.0)
            .with_image_type("dark")
            .with_exptime(30.0);
        fits::write_frame(&dir.path().join("d.fits"), &frame).unwrap();

        let exposures =
            classify_frames(&crate::frames::FitsFrameStore, dir.path(), &["d.fits".into()])
                .unwrap();
        assert_eq!(exposures.len(), 1);
        assert_eq!(exposures[0].exposure_type, ExposureType::Dark);
        assert_eq!(exposures[0].shape, FrameShape::new(2, 3, 2));
        assert_eq!(exposures[0].exptime.value(), 30.0);
    }

    #[test]
    fn test_classify_rejects_unknown_tag() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::filled(2, 2, 1.0)
            .with_image_type("SKYFLAT")
            .with_exptime(1.0);
        fits::write_frame(&dir.path().join("s.fits"), &frame).unwrap();

        let err = classify_frames(&crate::frames::FitsFrameStore, dir.path(), &["s.fits".into()])
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnknownExposureType { ref tag, .. } if tag.as_deref() == Some("SKYFLAT")
        ));
    }
}
