//! Entity store for night bundles, exposures and combinations.
//!
//! The pipeline talks to storage only through the repository traits, so the
//! stages run unchanged against Postgres or the in-memory store.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Pipeline stages (ingest, masters, correction)          │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  Repository traits (repository/) - abstract interface   │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//!        ┌────────────┴─────────────┐
//!        │                          │
//! ┌──────▼───────────┐   ┌──────────▼───────────────────────┐
//! │ LocalRepository  │   │ PostgresRepository (Diesel/r2d2) │
//! │ (+ JSON snapshot)│   │ feature `postgres-repo`          │
//! └──────────────────┘   └──────────────────────────────────┘
//! ```
//!
//! Use [`RepositoryFactory`] or [`RepositoryBuilder`] to pick a backend at
//! runtime.

#[cfg(not(any(feature = "postgres-repo", feature = "local-repo")))]
compile_error!("Enable at least one repository backend feature.");

pub mod factory;
pub mod repositories;
pub mod repository;

// Postgres config is colocated with the repository implementation.
#[cfg(feature = "postgres-repo")]
pub use repositories::postgres::PostgresConfig;
#[cfg(not(feature = "postgres-repo"))]
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    _private: (),
}

pub use factory::{RepositoryBuilder, RepositoryFactory, RepositoryType};
pub use repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
pub use repositories::PostgresRepository;
pub use repository::{
    exactly_one, BundleRepository, CombinationRepository, ErrorContext, ExposureRepository,
    FullRepository, RepositoryError, RepositoryResult,
};
