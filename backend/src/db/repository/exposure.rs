//! Exposure repository trait.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::models::{BundleId, Exposure, ExposureId, ExposureType};

/// Read access to raw exposures. Exposures are only written through
/// [`super::BundleRepository::store_night_bundle`].
#[async_trait]
pub trait ExposureRepository: Send + Sync {
    /// Retrieve an exposure by id.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the exposure doesn't exist
    async fn get_exposure(&self, id: ExposureId) -> RepositoryResult<Exposure>;

    /// All exposures of a bundle, optionally restricted to one type, ordered
    /// by filename.
    ///
    /// # Returns
    /// * `Ok(vec![])` - If the bundle has no matching exposures
    /// * `Err(RepositoryError::NotFound)` - If the bundle doesn't exist
    async fn list_exposures(
        &self,
        bundle_id: BundleId,
        exposure_type: Option<ExposureType>,
    ) -> RepositoryResult<Vec<Exposure>>;
}
