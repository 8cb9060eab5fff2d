//! Tests for db::factory - repository selection from env and settings.

mod support;

use std::str::FromStr;

use toros_pipeline::config::Settings;
use toros_pipeline::db::factory::{RepositoryBuilder, RepositoryFactory, RepositoryType};
use toros_pipeline::db::BundleRepository;
use toros_pipeline::models::{BundleId, NewNightBundle};

#[test]
fn test_repository_type_from_str() {
    assert_eq!(RepositoryType::from_str("POSTGRES").unwrap(), RepositoryType::Postgres);
    assert_eq!(RepositoryType::from_str("pg").unwrap(), RepositoryType::Postgres);
    assert_eq!(RepositoryType::from_str("Local").unwrap(), RepositoryType::Local);

    let err = RepositoryType::from_str("sqlite").unwrap_err();
    assert!(err.contains("Unknown repository type"));
}

#[test]
fn test_repository_type_from_env_default() {
    support::with_scoped_env(
        &[
            ("REPOSITORY_TYPE", None),
            ("DATABASE_URL", None),
            ("PG_DATABASE_URL", None),
        ],
        || assert_eq!(RepositoryType::from_env(), RepositoryType::Local),
    );
}

#[test]
fn test_repository_type_from_env_with_database_url() {
    support::with_scoped_env(
        &[
            ("REPOSITORY_TYPE", None),
            ("DATABASE_URL", None),
            ("PG_DATABASE_URL", Some("postgres://localhost/toros")),
        ],
        || assert_eq!(RepositoryType::from_env(), RepositoryType::Postgres),
    );
}

#[test]
fn test_explicit_repository_type_wins_over_database_url() {
    support::with_scoped_env(
        &[
            ("REPOSITORY_TYPE", Some("local")),
            ("DATABASE_URL", Some("postgres://localhost/toros")),
        ],
        || assert_eq!(RepositoryType::from_env(), RepositoryType::Local),
    );
}

#[test]
fn test_invalid_repository_type_falls_back_to_local() {
    support::with_scoped_env(
        &[
            ("REPOSITORY_TYPE", Some("invalid")),
            ("DATABASE_URL", None),
            ("PG_DATABASE_URL", None),
        ],
        || assert_eq!(RepositoryType::from_env(), RepositoryType::Local),
    );
}

#[tokio::test]
async fn test_create_local_via_factory() {
    let repo = RepositoryFactory::create(RepositoryType::Local, None)
        .await
        .unwrap();
    assert!(repo.health_check().await.unwrap());
    assert!(repo.list_bundles().await.unwrap().is_empty());
}

#[cfg(not(feature = "postgres-repo"))]
#[tokio::test]
async fn test_create_postgres_without_feature_fails() {
    let err = RepositoryFactory::create(RepositoryType::Postgres, None)
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("feature not enabled"));
}

#[cfg(feature = "postgres-repo")]
#[tokio::test]
async fn test_create_postgres_without_config_fails() {
    let err = RepositoryFactory::create(RepositoryType::Postgres, None)
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("requires PostgresConfig"));
}

#[tokio::test]
async fn test_snapshot_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    {
        let repo = RepositoryFactory::create_local_with_snapshot(&path).unwrap();
        repo.store_night_bundle(&NewNightBundle::new(BundleId(11), dir.path()), &[])
            .await
            .unwrap();
    }

    let reopened = RepositoryBuilder::new()
        .repository_type(RepositoryType::Local)
        .snapshot_path(&path)
        .build()
        .await
        .unwrap();
    let bundle = reopened.get_bundle(BundleId(11)).await.unwrap();
    assert_eq!(bundle.directory_path, dir.path());
}

#[tokio::test]
async fn test_builder_from_settings() {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        "[repository]\ntype = \"local\"\nsnapshot_path = {:?}\n",
        dir.path().join("store.json")
    );
    let settings = Settings::from_toml_str(&toml).unwrap();

    let repo = RepositoryBuilder::new()
        .from_settings(&settings)
        .unwrap()
        .build()
        .await
        .unwrap();
    assert!(repo.health_check().await.unwrap());
}

#[test]
fn test_settings_env_overrides() {
    support::with_scoped_env(
        &[
            ("REPOSITORY_TYPE", Some("local")),
            ("TOROS_SNAPSHOT_PATH", Some("/tmp/toros-store.json")),
            ("DATABASE_URL", None),
            ("PG_DATABASE_URL", None),
        ],
        || {
            let mut settings = Settings::default();
            settings.apply_env_overrides();
            assert_eq!(settings.repository_type().unwrap(), RepositoryType::Local);
            assert_eq!(
                settings.repository.snapshot_path.as_deref(),
                Some(std::path::Path::new("/tmp/toros-store.json"))
            );
        },
    );
}
