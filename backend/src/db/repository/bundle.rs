//! Night bundle repository trait.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::models::{BundleId, Exposure, NewExposure, NewNightBundle, NightBundle};

/// Repository trait for night bundles.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait BundleRepository: Send + Sync {
    /// Check if the storage backend is healthy and accessible.
    async fn health_check(&self) -> RepositoryResult<bool>;

    /// Record a bundle together with every exposure found in it.
    ///
    /// The write is atomic: either the bundle and all exposures are stored,
    /// or nothing is.
    ///
    /// # Arguments
    /// * `bundle` - The bundle to create
    /// * `exposures` - Exposures parsed from the bundle's raw frames
    ///
    /// # Returns
    /// * `Ok((NightBundle, Vec<Exposure>))` - The stored rows, exposures in input order
    /// * `Err(RepositoryError::Conflict)` - If the bundle id already exists or two
    ///   exposures share a filename
    async fn store_night_bundle(
        &self,
        bundle: &NewNightBundle,
        exposures: &[NewExposure],
    ) -> RepositoryResult<(NightBundle, Vec<Exposure>)>;

    /// Retrieve a bundle by id.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the bundle doesn't exist
    async fn get_bundle(&self, id: BundleId) -> RepositoryResult<NightBundle>;

    /// List all bundles ordered by id.
    async fn list_bundles(&self) -> RepositoryResult<Vec<NightBundle>>;
}
