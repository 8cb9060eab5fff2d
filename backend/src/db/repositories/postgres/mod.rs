//! Postgres repository implementation using Diesel.
//!
//! Tables (see `migrations/`): `night_bundle`, `exposure`,
//! `exposure_combination` and the two provenance link tables
//! `combination_exposure` and `combination_uses`.
//!
//! ## Features
//!
//! - Connection pooling with r2d2
//! - Automatic retry for transient failures
//! - Automatic migration execution
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
//! - `PG_POOL_MAX`: Maximum pool size (default: 10)
//! - `PG_POOL_MIN`: Minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: Maximum retry attempts for transient failures (default: 3)
//! - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)

use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task;

use crate::db::repository::{
    BundleRepository, CombinationRepository, ErrorContext, ExposureRepository, RepositoryError,
    RepositoryResult,
};
use crate::models::{
    BundleId, CombinationId, CombinationType, Exposure, ExposureCombination, ExposureId,
    ExposureType, NewCombination, NewExposure, NewNightBundle, NightBundle,
};

mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Rows per multi-row INSERT, well below the Postgres bind-parameter limit.
const INSERT_CHUNK: usize = 1000;

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Connection timeout in seconds
    pub connection_timeout_sec: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_sec: u64,
    /// Maximum number of retry attempts for transient failures
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Create configuration from environment variables (see module docs).
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("PG_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or PG_DATABASE_URL must be set".to_string())?;

        let defaults = Self::default();
        Ok(Self {
            database_url,
            max_pool_size: env_or("PG_POOL_MAX", defaults.max_pool_size),
            min_pool_size: env_or("PG_POOL_MIN", defaults.min_pool_size),
            connection_timeout_sec: env_or("PG_CONN_TIMEOUT_SEC", defaults.connection_timeout_sec),
            idle_timeout_sec: env_or("PG_IDLE_TIMEOUT_SEC", defaults.idle_timeout_sec),
            max_retries: env_or("PG_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("PG_RETRY_DELAY_MS", defaults.retry_delay_ms),
        })
    }

    /// Create a new configuration with a database URL.
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// Diesel-backed repository for Postgres.
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
}

impl PostgresRepository {
    /// Create a new repository and run pending migrations.
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_migrations"),
                )
            })?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self { pool, config })
    }

    fn run_migrations(conn: &mut PgConnection) -> RepositoryResult<()> {
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;
        Ok(())
    }

    /// Execute a database operation on the blocking pool, retrying retryable
    /// failures up to `max_retries` times with exponential backoff.
    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let max_retries = self.config.max_retries;
        let retry_delay_ms = self.config.retry_delay_ms;

        task::spawn_blocking(move || {
            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2;
                }

                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = RepositoryError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1))
                                .retryable(),
                        );
                        if attempt < max_retries {
                            last_error = Some(err);
                            continue;
                        }
                        return Err(err);
                    }
                };

                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            Err(last_error.unwrap_or_else(|| {
                RepositoryError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }
}

fn map_diesel_error(err: diesel::result::Error) -> RepositoryError {
    RepositoryError::from(err)
}

fn require_bundle(conn: &mut PgConnection, id: BundleId, operation: &str) -> RepositoryResult<()> {
    let found: Option<i64> = night_bundle::table
        .filter(night_bundle::id.eq(id.value()))
        .select(night_bundle::id)
        .first(conn)
        .optional()
        .map_err(map_diesel_error)?;

    found.map(|_| ()).ok_or_else(|| {
        RepositoryError::not_found_with_context(
            format!("Bundle {} not found", id),
            ErrorContext::new(operation)
                .with_entity("night_bundle")
                .with_entity_id(id),
        )
    })
}

/// Attach provenance links to combination rows, preserving row order.
fn load_combinations(
    conn: &mut PgConnection,
    rows: Vec<CombinationRow>,
) -> RepositoryResult<Vec<ExposureCombination>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

    let exposure_links: Vec<CombinationExposureRow> = combination_exposure::table
        .filter(combination_exposure::combination_id.eq_any(&ids))
        .order((
            combination_exposure::combination_id,
            combination_exposure::exposure_id,
        ))
        .select(CombinationExposureRow::as_select())
        .load(conn)
        .map_err(map_diesel_error)?;

    let use_links: Vec<CombinationUseRow> = combination_uses::table
        .filter(combination_uses::combination_id.eq_any(&ids))
        .order((
            combination_uses::combination_id,
            combination_uses::used_combination_id,
        ))
        .select(CombinationUseRow::as_select())
        .load(conn)
        .map_err(map_diesel_error)?;

    let mut exposures: HashMap<i64, Vec<ExposureId>> = HashMap::new();
    for link in exposure_links {
        exposures
            .entry(link.combination_id)
            .or_default()
            .push(ExposureId(link.exposure_id));
    }
    let mut uses: HashMap<i64, Vec<CombinationId>> = HashMap::new();
    for link in use_links {
        uses.entry(link.combination_id)
            .or_default()
            .push(CombinationId(link.used_combination_id));
    }

    rows.into_iter()
        .map(|row| {
            let id = row.id;
            row.into_combination(
                exposures.remove(&id).unwrap_or_default(),
                uses.remove(&id).unwrap_or_default(),
            )
        })
        .collect()
}

#[async_trait]
impl BundleRepository for PostgresRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| {
            sql_query("SELECT 1")
                .execute(conn)
                .map(|_| true)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn store_night_bundle(
        &self,
        bundle: &NewNightBundle,
        exposures: &[NewExposure],
    ) -> RepositoryResult<(NightBundle, Vec<Exposure>)> {
        let bundle = bundle.clone();
        let exposures = exposures.to_vec();

        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let new_bundle = NewNightBundleRow {
                    id: bundle.id.value(),
                    directory_path: bundle.directory_path.to_string_lossy().into_owned(),
                };
                let stored_bundle: NightBundleRow = diesel::insert_into(night_bundle::table)
                    .values(&new_bundle)
                    .returning(NightBundleRow::as_returning())
                    .get_result(tx)
                    .map_err(|e| {
                        map_diesel_error(e).with_operation("store_night_bundle")
                    })?;

                let rows: Vec<NewExposureRow> = exposures
                    .iter()
                    .map(|e| NewExposureRow::new(bundle.id, e))
                    .collect();

                let mut inserted: HashMap<String, ExposureRow> = HashMap::new();
                for chunk in rows.chunks(INSERT_CHUNK) {
                    let stored: Vec<ExposureRow> = diesel::insert_into(exposure::table)
                        .values(chunk)
                        .returning(ExposureRow::as_returning())
                        .get_results(tx)
                        .map_err(|e| {
                            map_diesel_error(e).with_operation("store_night_bundle")
                        })?;
                    inserted.extend(stored.into_iter().map(|r| (r.filename.clone(), r)));
                }

                // RETURNING order is not guaranteed; restore input order.
                let mut stored_exposures = Vec::with_capacity(exposures.len());
                for e in &exposures {
                    let row = inserted.remove(&e.filename).ok_or_else(|| {
                        RepositoryError::internal(format!(
                            "exposure '{}' missing from insert result",
                            e.filename
                        ))
                    })?;
                    stored_exposures.push(row.into_exposure()?);
                }

                Ok((NightBundle::from(stored_bundle), stored_exposures))
            })
        })
        .await
    }

    async fn get_bundle(&self, id: BundleId) -> RepositoryResult<NightBundle> {
        self.with_conn(move |conn| {
            night_bundle::table
                .filter(night_bundle::id.eq(id.value()))
                .select(NightBundleRow::as_select())
                .first::<NightBundleRow>(conn)
                .optional()
                .map_err(map_diesel_error)?
                .map(NightBundle::from)
                .ok_or_else(|| {
                    RepositoryError::not_found_with_context(
                        format!("Bundle {} not found", id),
                        ErrorContext::new("get_bundle")
                            .with_entity("night_bundle")
                            .with_entity_id(id),
                    )
                })
        })
        .await
    }

    async fn list_bundles(&self) -> RepositoryResult<Vec<NightBundle>> {
        self.with_conn(|conn| {
            let rows = night_bundle::table
                .order(night_bundle::id)
                .select(NightBundleRow::as_select())
                .load::<NightBundleRow>(conn)
                .map_err(map_diesel_error)?;
            Ok(rows.into_iter().map(NightBundle::from).collect())
        })
        .await
    }
}

#[async_trait]
impl ExposureRepository for PostgresRepository {
    async fn get_exposure(&self, id: ExposureId) -> RepositoryResult<Exposure> {
        self.with_conn(move |conn| {
            exposure::table
                .filter(exposure::id.eq(id.value()))
                .select(ExposureRow::as_select())
                .first::<ExposureRow>(conn)
                .optional()
                .map_err(map_diesel_error)?
                .ok_or_else(|| {
                    RepositoryError::not_found_with_context(
                        format!("Exposure {} not found", id),
                        ErrorContext::new("get_exposure")
                            .with_entity("exposure")
                            .with_entity_id(id),
                    )
                })?
                .into_exposure()
        })
        .await
    }

    async fn list_exposures(
        &self,
        bundle_id: BundleId,
        exposure_type: Option<ExposureType>,
    ) -> RepositoryResult<Vec<Exposure>> {
        self.with_conn(move |conn| {
            require_bundle(conn, bundle_id, "list_exposures")?;

            let mut query = exposure::table
                .filter(exposure::bundle_id.eq(bundle_id.value()))
                .select(ExposureRow::as_select())
                .into_boxed();
            if let Some(t) = exposure_type {
                query = query.filter(exposure::exposure_type.eq(t.as_str()));
            }

            query
                .order(exposure::filename)
                .load::<ExposureRow>(conn)
                .map_err(map_diesel_error)?
                .into_iter()
                .map(ExposureRow::into_exposure)
                .collect()
        })
        .await
    }
}

#[async_trait]
impl CombinationRepository for PostgresRepository {
    async fn store_combination(
        &self,
        combination: &NewCombination,
    ) -> RepositoryResult<ExposureCombination> {
        let combination = combination.clone();

        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                require_bundle(tx, combination.bundle_id, "store_combination")?;

                let input_ids: Vec<i64> = combination.exposures.iter().map(|e| e.value()).collect();
                let inputs = exposure::table
                    .filter(exposure::id.eq_any(&input_ids))
                    .select(ExposureRow::as_select())
                    .load::<ExposureRow>(tx)
                    .map_err(map_diesel_error)?
                    .into_iter()
                    .map(ExposureRow::into_exposure)
                    .collect::<RepositoryResult<Vec<_>>>()?;

                let use_ids: Vec<i64> = combination
                    .uses_combinations
                    .iter()
                    .map(|c| c.value())
                    .collect();
                let use_rows = exposure_combination::table
                    .filter(exposure_combination::id.eq_any(&use_ids))
                    .select(CombinationRow::as_select())
                    .load::<CombinationRow>(tx)
                    .map_err(map_diesel_error)?;
                let uses = load_combinations(tx, use_rows)?;

                combination.check_provenance(&inputs, &uses).map_err(|msg| {
                    RepositoryError::validation_with_context(
                        msg,
                        ErrorContext::new("store_combination")
                            .with_entity("combination")
                            .with_entity_id(combination.bundle_id),
                    )
                })?;

                let row: CombinationRow = diesel::insert_into(exposure_combination::table)
                    .values(&NewCombinationRow {
                        bundle_id: combination.bundle_id.value(),
                        filename: combination.filename.clone(),
                        combination_type: combination.combination_type.as_str().to_string(),
                    })
                    .returning(CombinationRow::as_returning())
                    .get_result(tx)
                    .map_err(|e| map_diesel_error(e).with_operation("store_combination"))?;

                let exposure_links: Vec<CombinationExposureRow> = input_ids
                    .iter()
                    .map(|&exposure_id| CombinationExposureRow {
                        combination_id: row.id,
                        exposure_id,
                    })
                    .collect();
                for chunk in exposure_links.chunks(INSERT_CHUNK) {
                    diesel::insert_into(combination_exposure::table)
                        .values(chunk)
                        .execute(tx)
                        .map_err(map_diesel_error)?;
                }

                if !use_ids.is_empty() {
                    let use_links: Vec<CombinationUseRow> = use_ids
                        .iter()
                        .map(|&used| CombinationUseRow {
                            combination_id: row.id,
                            used_combination_id: used,
                        })
                        .collect();
                    diesel::insert_into(combination_uses::table)
                        .values(&use_links)
                        .execute(tx)
                        .map_err(map_diesel_error)?;
                }

                row.into_combination(
                    combination.exposures.clone(),
                    combination.uses_combinations.clone(),
                )
            })
        })
        .await
    }

    async fn get_combination(&self, id: CombinationId) -> RepositoryResult<ExposureCombination> {
        self.with_conn(move |conn| {
            let row = exposure_combination::table
                .filter(exposure_combination::id.eq(id.value()))
                .select(CombinationRow::as_select())
                .first::<CombinationRow>(conn)
                .optional()
                .map_err(map_diesel_error)?
                .ok_or_else(|| {
                    RepositoryError::not_found_with_context(
                        format!("Combination {} not found", id),
                        ErrorContext::new("get_combination")
                            .with_entity("combination")
                            .with_entity_id(id),
                    )
                })?;

            let mut loaded = load_combinations(conn, vec![row])?;
            loaded
                .pop()
                .ok_or_else(|| RepositoryError::internal("combination vanished while loading"))
        })
        .await
    }

    async fn list_combinations(
        &self,
        bundle_id: BundleId,
        combination_type: Option<CombinationType>,
    ) -> RepositoryResult<Vec<ExposureCombination>> {
        self.with_conn(move |conn| {
            require_bundle(conn, bundle_id, "list_combinations")?;

            let mut query = exposure_combination::table
                .filter(exposure_combination::bundle_id.eq(bundle_id.value()))
                .select(CombinationRow::as_select())
                .into_boxed();
            if let Some(t) = combination_type {
                query = query.filter(exposure_combination::combination_type.eq(t.as_str()));
            }

            let rows = query
                .order(exposure_combination::id)
                .load::<CombinationRow>(conn)
                .map_err(map_diesel_error)?;
            load_combinations(conn, rows)
        })
        .await
    }
}
