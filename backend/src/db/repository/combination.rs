//! Exposure combination repository trait.

use async_trait::async_trait;

use super::error::{ErrorContext, RepositoryResult};
use super::exactly_one;
use crate::models::{BundleId, CombinationId, CombinationType, ExposureCombination, NewCombination};

/// Repository trait for derived frames and their provenance links.
#[async_trait]
pub trait CombinationRepository: Send + Sync {
    /// Record a combination whose frame has already been written.
    ///
    /// The provenance invariants are checked against the stored input rows
    /// before anything is written.
    ///
    /// # Returns
    /// * `Ok(ExposureCombination)` - The stored row with its new id
    /// * `Err(RepositoryError::NotFound)` - If the bundle doesn't exist
    /// * `Err(RepositoryError::ValidationError)` - If the provenance is invalid
    /// * `Err(RepositoryError::Conflict)` - If the bundle already has a
    ///   combination with this filename
    async fn store_combination(
        &self,
        combination: &NewCombination,
    ) -> RepositoryResult<ExposureCombination>;

    /// Retrieve a combination by id.
    async fn get_combination(&self, id: CombinationId) -> RepositoryResult<ExposureCombination>;

    /// All combinations of a bundle, optionally restricted to one type,
    /// ordered by id.
    async fn list_combinations(
        &self,
        bundle_id: BundleId,
        combination_type: Option<CombinationType>,
    ) -> RepositoryResult<Vec<ExposureCombination>>;

    /// The single combination of a type in a bundle, e.g. its dark master.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If there is none
    /// * `Err(RepositoryError::Ambiguous)` - If there is more than one
    async fn get_single_combination(
        &self,
        bundle_id: BundleId,
        combination_type: CombinationType,
    ) -> RepositoryResult<ExposureCombination> {
        let rows = self
            .list_combinations(bundle_id, Some(combination_type))
            .await?;
        exactly_one(
            rows,
            format!("{} for bundle {}", combination_type, bundle_id),
            ErrorContext::new("get_single_combination")
                .with_entity("combination")
                .with_entity_id(bundle_id),
        )
    }
}
