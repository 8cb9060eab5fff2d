//! In-memory repository.
//!
//! Used by tests and by single-machine runs that don't need Postgres. With a
//! snapshot file configured, stage commands run as separate processes share
//! one store:
//!
//! - every write holds an exclusive lock on `<snapshot>.lock` while it
//!   reloads the file, applies the change and replaces the file
//! - every read holds a shared lock while it reloads the file
//! - the file is replaced by renaming a temp file written in the same
//!   directory, so readers never see a half-written snapshot

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::db::repository::{
    BundleRepository, CombinationRepository, ErrorContext, ExposureRepository, RepositoryError,
    RepositoryResult,
};
use crate::models::{
    BundleId, CombinationId, CombinationType, Exposure, ExposureCombination, ExposureId,
    ExposureType, NewCombination, NewExposure, NewNightBundle, NightBundle,
};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LocalData {
    bundles: Vec<NightBundle>,
    exposures: Vec<Exposure>,
    combinations: Vec<ExposureCombination>,
    next_exposure_id: i64,
    next_combination_id: i64,
}

impl LocalData {
    fn bundle(&self, id: BundleId) -> Option<&NightBundle> {
        self.bundles.iter().find(|b| b.id == id)
    }

    fn require_bundle(&self, id: BundleId, operation: &str) -> RepositoryResult<&NightBundle> {
        self.bundle(id).ok_or_else(|| {
            RepositoryError::not_found_with_context(
                format!("Bundle {} not found", id),
                ErrorContext::new(operation)
                    .with_entity("night_bundle")
                    .with_entity_id(id),
            )
        })
    }

    fn allocate_exposure_id(&mut self) -> ExposureId {
        self.next_exposure_id += 1;
        ExposureId(self.next_exposure_id)
    }

    fn allocate_combination_id(&mut self) -> CombinationId {
        self.next_combination_id += 1;
        CombinationId(self.next_combination_id)
    }
}

/// In-memory implementation of the repository traits.
#[derive(Debug, Default)]
pub struct LocalRepository {
    data: RwLock<LocalData>,
    snapshot_path: Option<PathBuf>,
}

impl LocalRepository {
    /// Create an empty, purely in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a repository backed by a JSON snapshot file.
    ///
    /// The file is loaded if it exists; otherwise the store starts empty and
    /// the file is created on the first write.
    pub fn with_snapshot(path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = {
            let lock = open_lock(&path)?;
            let _shared = lock.read().map_err(|e| lock_error(&path, e))?;
            load_snapshot(&path)?.unwrap_or_default()
        };
        debug!(
            path = %path.display(),
            bundles = data.bundles.len(),
            exposures = data.exposures.len(),
            combinations = data.combinations.len(),
            "Opened local repository snapshot"
        );
        Ok(Self {
            data: RwLock::new(data),
            snapshot_path: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Number of combinations stored across all bundles.
    pub fn combination_count(&self) -> RepositoryResult<usize> {
        self.read(|data| Ok(data.combinations.len()))
    }

    /// Run `f` against the latest data.
    fn read<T>(&self, f: impl FnOnce(&LocalData) -> RepositoryResult<T>) -> RepositoryResult<T> {
        let Some(path) = &self.snapshot_path else {
            return f(&self.data.read());
        };

        // Same order as `write`: in-process lock first, then the file.
        let mut guard = self.data.write();
        let lock = open_lock(path)?;
        let _shared = lock.read().map_err(|e| lock_error(path, e))?;
        if let Some(latest) = load_snapshot(path)? {
            *guard = latest;
        }
        f(&guard)
    }

    /// Run `f` against the latest data and persist the result if it succeeds.
    fn write<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut LocalData) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        let mut guard = self.data.write();

        let Some(path) = &self.snapshot_path else {
            // Work on a copy so a failed write leaves nothing behind.
            let mut staged = guard.clone();
            let value = f(&mut staged)?;
            *guard = staged;
            return Ok(value);
        };

        let mut lock = open_lock(path)?;
        let _exclusive = lock
            .write()
            .map_err(|e| lock_error(path, e).with_operation(operation))?;

        if let Some(latest) = load_snapshot(path)? {
            *guard = latest;
        }
        let mut staged = guard.clone();
        let value = f(&mut staged)?;

        save_snapshot(path, &staged).map_err(|e| e.with_operation(operation))?;
        *guard = staged;
        Ok(value)
    }
}

/// Open (creating if needed) the lock file guarding a snapshot.
///
/// The snapshot itself is replaced by rename on every write, so it cannot
/// carry the lock.
fn open_lock(snapshot: &Path) -> RepositoryResult<fd_lock::RwLock<File>> {
    let mut lock_path = snapshot.as_os_str().to_owned();
    lock_path.push(".lock");

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(PathBuf::from(lock_path))
        .map(fd_lock::RwLock::new)
        .map_err(|e| lock_error(snapshot, e))
}

fn lock_error(snapshot: &Path, err: std::io::Error) -> RepositoryError {
    RepositoryError::internal_with_context(
        format!("Failed to lock snapshot: {}", err),
        ErrorContext::new("lock_snapshot").with_details(snapshot.display().to_string()),
    )
}

fn load_snapshot(path: &Path) -> RepositoryResult<Option<LocalData>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|e| {
        RepositoryError::internal_with_context(
            format!("Failed to read snapshot: {}", e),
            ErrorContext::new("load_snapshot").with_details(path.display().to_string()),
        )
    })?;
    serde_json::from_str(&content).map(Some).map_err(|e| {
        RepositoryError::internal_with_context(
            format!("Failed to parse snapshot: {}", e),
            ErrorContext::new("load_snapshot").with_details(path.display().to_string()),
        )
    })
}

fn save_snapshot(path: &Path, data: &LocalData) -> RepositoryResult<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| RepositoryError::internal(format!("Failed to serialize snapshot: {}", e)))?;

    let write_error = |e: std::io::Error| {
        RepositoryError::internal_with_context(
            format!("Failed to write snapshot: {}", e),
            ErrorContext::new("save_snapshot").with_details(path.display().to_string()),
        )
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_error)?;
    tmp.write_all(json.as_bytes()).map_err(write_error)?;
    tmp.as_file().sync_all().map_err(write_error)?;
    tmp.persist(path).map_err(|e| write_error(e.error))?;
    Ok(())
}

#[async_trait]
impl BundleRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(true)
    }

    async fn store_night_bundle(
        &self,
        bundle: &NewNightBundle,
        exposures: &[NewExposure],
    ) -> RepositoryResult<(NightBundle, Vec<Exposure>)> {
        self.write("store_night_bundle", |data| {
            if data.bundle(bundle.id).is_some() {
                return Err(RepositoryError::conflict_with_context(
                    format!("Bundle {} already exists", bundle.id),
                    ErrorContext::new("store_night_bundle")
                        .with_entity("night_bundle")
                        .with_entity_id(bundle.id),
                ));
            }

            let mut seen = HashSet::new();
            if let Some(dup) = exposures.iter().find(|e| !seen.insert(e.filename.as_str())) {
                return Err(RepositoryError::conflict_with_context(
                    format!("Exposure '{}' listed twice", dup.filename),
                    ErrorContext::new("store_night_bundle")
                        .with_entity("exposure")
                        .with_entity_id(bundle.id),
                ));
            }

            let stored_bundle = NightBundle {
                id: bundle.id,
                created_at: Utc::now(),
                directory_path: bundle.directory_path.clone(),
            };

            let stored: Vec<Exposure> = exposures
                .iter()
                .map(|e| Exposure {
                    id: data.allocate_exposure_id(),
                    bundle_id: bundle.id,
                    filename: e.filename.clone(),
                    exposure_type: e.exposure_type,
                    shape: e.shape,
                    exptime: e.exptime,
                })
                .collect();

            data.bundles.push(stored_bundle.clone());
            data.exposures.extend(stored.iter().cloned());
            Ok((stored_bundle, stored))
        })
    }

    async fn get_bundle(&self, id: BundleId) -> RepositoryResult<NightBundle> {
        self.read(|data| data.require_bundle(id, "get_bundle").cloned())
    }

    async fn list_bundles(&self) -> RepositoryResult<Vec<NightBundle>> {
        self.read(|data| {
            let mut bundles = data.bundles.clone();
            bundles.sort_by_key(|b| b.id);
            Ok(bundles)
        })
    }
}

#[async_trait]
impl ExposureRepository for LocalRepository {
    async fn get_exposure(&self, id: ExposureId) -> RepositoryResult<Exposure> {
        self.read(|data| {
            data.exposures
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| {
                    RepositoryError::not_found_with_context(
                        format!("Exposure {} not found", id),
                        ErrorContext::new("get_exposure")
                            .with_entity("exposure")
                            .with_entity_id(id),
                    )
                })
        })
    }

    async fn list_exposures(
        &self,
        bundle_id: BundleId,
        exposure_type: Option<ExposureType>,
    ) -> RepositoryResult<Vec<Exposure>> {
        self.read(|data| {
            data.require_bundle(bundle_id, "list_exposures")?;

            let mut exposures: Vec<Exposure> = data
                .exposures
                .iter()
                .filter(|e| e.bundle_id == bundle_id)
                .filter(|e| exposure_type.map_or(true, |t| e.exposure_type == t))
                .cloned()
                .collect();
            exposures.sort_by(|a, b| a.filename.cmp(&b.filename));
            Ok(exposures)
        })
    }
}

#[async_trait]
impl CombinationRepository for LocalRepository {
    async fn store_combination(
        &self,
        combination: &NewCombination,
    ) -> RepositoryResult<ExposureCombination> {
        self.write("store_combination", |data| {
            data.require_bundle(combination.bundle_id, "store_combination")?;

            if data
                .combinations
                .iter()
                .any(|c| c.bundle_id == combination.bundle_id && c.filename == combination.filename)
            {
                return Err(RepositoryError::conflict_with_context(
                    format!(
                        "Bundle {} already has a combination named '{}'",
                        combination.bundle_id, combination.filename
                    ),
                    ErrorContext::new("store_combination")
                        .with_entity("combination")
                        .with_entity_id(combination.bundle_id),
                ));
            }

            let wanted: HashSet<ExposureId> = combination.exposures.iter().copied().collect();
            let inputs: Vec<Exposure> = data
                .exposures
                .iter()
                .filter(|e| wanted.contains(&e.id))
                .cloned()
                .collect();
            let uses: Vec<ExposureCombination> = data
                .combinations
                .iter()
                .filter(|c| combination.uses_combinations.contains(&c.id))
                .cloned()
                .collect();

            combination.check_provenance(&inputs, &uses).map_err(|msg| {
                RepositoryError::validation_with_context(
                    msg,
                    ErrorContext::new("store_combination")
                        .with_entity("combination")
                        .with_entity_id(combination.bundle_id),
                )
            })?;

            let stored = ExposureCombination {
                id: data.allocate_combination_id(),
                bundle_id: combination.bundle_id,
                filename: combination.filename.clone(),
                combination_type: combination.combination_type,
                exposures: combination.exposures.clone(),
                uses_combinations: combination.uses_combinations.clone(),
            };
            data.combinations.push(stored.clone());
            Ok(stored)
        })
    }

    async fn get_combination(&self, id: CombinationId) -> RepositoryResult<ExposureCombination> {
        self.read(|data| {
            data.combinations
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| {
                    RepositoryError::not_found_with_context(
                        format!("Combination {} not found", id),
                        ErrorContext::new("get_combination")
                            .with_entity("combination")
                            .with_entity_id(id),
                    )
                })
        })
    }

    async fn list_combinations(
        &self,
        bundle_id: BundleId,
        combination_type: Option<CombinationType>,
    ) -> RepositoryResult<Vec<ExposureCombination>> {
        self.read(|data| {
            data.require_bundle(bundle_id, "list_combinations")?;

            let mut combinations: Vec<ExposureCombination> = data
                .combinations
                .iter()
                .filter(|c| c.bundle_id == bundle_id)
                .filter(|c| combination_type.map_or(true, |t| c.combination_type == t))
                .cloned()
                .collect();
            combinations.sort_by_key(|c| c.id);
            Ok(combinations)
        })
    }
}
