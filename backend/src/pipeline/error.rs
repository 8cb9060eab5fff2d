//! Stage-level errors.

use std::path::PathBuf;

use crate::db::RepositoryError;
use crate::frames::FrameError;
use crate::models::{BundleId, ExposureType, MasterKind};

use super::Stage;

/// Result type for pipeline stages
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Terminal failure of a stage run.
///
/// Correction reports per-frame problems in its
/// [`CorrectionReport`](super::CorrectionReport) instead; only problems that
/// stop the whole stage end up here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("directory not found or unreadable: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("{filename}: unrecognized image type {}", .tag.as_deref().map(|t| format!("'{t}'")).unwrap_or_else(|| "(missing IMAGETYP)".to_string()))]
    UnknownExposureType {
        filename: String,
        tag: Option<String>,
    },

    #[error("bundle {bundle_id} has no {exposure_type} exposures")]
    EmptySelection {
        bundle_id: BundleId,
        exposure_type: ExposureType,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous: {message} ({count} matches)")]
    Ambiguous { message: String, count: usize },

    #[error("failed to write {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: FrameError,
    },

    #[error("failed to read {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: FrameError,
    },

    #[error("bundle {bundle_id} has no {kind} master")]
    MissingMaster { bundle_id: BundleId, kind: MasterKind },

    #[error("bundle {bundle_id} already has a {kind} master ({filename})")]
    MasterAlreadyExists {
        bundle_id: BundleId,
        kind: MasterKind,
        filename: String,
    },

    #[error("bundle {0} has already been ingested")]
    BundleAlreadyIngested(BundleId),

    #[error("stage {stage} is already running for bundle {bundle_id}")]
    StageInProgress { bundle_id: BundleId, stage: Stage },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Repository(RepositoryError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { message, .. } => PipelineError::NotFound(message),
            RepositoryError::Ambiguous { message, count, .. } => {
                PipelineError::Ambiguous { message, count }
            }
            other => PipelineError::Repository(other),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Internal(format!("Task join error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ErrorContext;

    #[test]
    fn test_lookup_errors_are_lifted() {
        let err: PipelineError = RepositoryError::not_found("bundle 7").into();
        assert!(matches!(err, PipelineError::NotFound(ref m) if m == "bundle 7"));

        let err: PipelineError = RepositoryError::ambiguous_with_context(
            "DARK_MASTER for bundle 7",
            2,
            ErrorContext::new("get_single_combination"),
        )
        .into();
        assert!(matches!(err, PipelineError::Ambiguous { count: 2, .. }));

        let err: PipelineError =
            RepositoryError::conflict_with_context("duplicate", ErrorContext::default()).into();
        assert!(matches!(err, PipelineError::Repository(_)));
    }

    #[test]
    fn test_unknown_exposure_type_message() {
        let err = PipelineError::UnknownExposureType {
            filename: "a.fits".to_string(),
            tag: Some("SKY".to_string()),
        };
        assert_eq!(err.to_string(), "a.fits: unrecognized image type 'SKY'");

        let err = PipelineError::UnknownExposureType {
            filename: "b.fits".to_string(),
            tag: None,
        };
        assert!(err.to_string().contains("missing IMAGETYP"));
    }
}
