//! Repository traits for the calibration entity store.
//!
//! The store is split by entity:
//! - [`BundleRepository`]: night bundles and their atomic ingestion
//! - [`ExposureRepository`]: raw exposure lookups
//! - [`CombinationRepository`]: derived frames and their provenance
//!
//! [`FullRepository`] bundles all three and is what the pipeline holds.

pub mod bundle;
pub mod combination;
pub mod error;
pub mod exposure;

pub use bundle::BundleRepository;
pub use combination::CombinationRepository;
pub use error::{ErrorContext, RepositoryError, RepositoryResult};
pub use exposure::ExposureRepository;

/// Every repository capability the pipeline needs.
pub trait FullRepository: BundleRepository + ExposureRepository + CombinationRepository {}

impl<T> FullRepository for T where T: BundleRepository + ExposureRepository + CombinationRepository
{}

/// Reduce a lookup result to its single row.
///
/// Zero rows is `NotFound`, more than one is `Ambiguous`; an arbitrary row is
/// never picked.
pub fn exactly_one<T>(
    mut rows: Vec<T>,
    what: impl Into<String>,
    context: ErrorContext,
) -> RepositoryResult<T> {
    match rows.len() {
        0 => Err(RepositoryError::not_found_with_context(
            format!("no {}", what.into()),
            context,
        )),
        1 => Ok(rows.remove(0)),
        n => Err(RepositoryError::ambiguous_with_context(
            format!("more than one {}", what.into()),
            n,
            context,
        )),
    }
}
