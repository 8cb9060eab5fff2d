//! Tests for db::repository::error and the exactly-one lookup contract.

use toros_pipeline::db::repository::{exactly_one, ErrorContext, RepositoryError};

#[test]
fn test_error_context_chaining() {
    let ctx = ErrorContext::new("store_combination")
        .with_entity("combination")
        .with_entity_id(42)
        .with_details("duplicate filename")
        .retryable();

    assert_eq!(ctx.operation.as_deref(), Some("store_combination"));
    assert_eq!(ctx.entity.as_deref(), Some("combination"));
    assert_eq!(ctx.entity_id.as_deref(), Some("42"));
    assert_eq!(ctx.details.as_deref(), Some("duplicate filename"));
    assert!(ctx.retryable);
}

#[test]
fn test_error_context_display() {
    let ctx = ErrorContext::new("get_bundle")
        .with_entity("night_bundle")
        .with_entity_id("20250210");

    let display = ctx.to_string();
    assert!(display.starts_with('['));
    assert!(display.contains("operation=get_bundle"));
    assert!(display.contains("entity=night_bundle"));
    assert!(display.contains("id=20250210"));
    assert!(!display.contains("retryable"));
}

#[test]
fn test_default_context_is_empty() {
    let ctx = ErrorContext::default();
    assert!(ctx.operation.is_none());
    assert!(ctx.entity.is_none());
    assert_eq!(ctx.to_string(), "[]");
}

#[test]
fn test_error_messages_name_their_kind() {
    let cases = [
        (RepositoryError::connection("refused"), "Connection error"),
        (RepositoryError::query("bad SQL"), "Query error"),
        (RepositoryError::not_found("bundle 1"), "Not found"),
        (
            RepositoryError::conflict_with_context("bundle 1 exists", ErrorContext::default()),
            "Conflict",
        ),
        (
            RepositoryError::validation_with_context("no inputs", ErrorContext::default()),
            "validation error",
        ),
        (RepositoryError::configuration("no url"), "Configuration error"),
        (RepositoryError::internal("poisoned"), "Internal error"),
    ];

    for (err, expected) in cases {
        assert!(
            err.to_string().contains(expected),
            "{} should contain {}",
            err,
            expected
        );
    }
}

#[test]
fn test_only_transient_errors_are_retryable() {
    assert!(RepositoryError::connection("refused").is_retryable());
    assert!(!RepositoryError::query("bad SQL").is_retryable());
    assert!(!RepositoryError::not_found("missing").is_retryable());
    assert!(!RepositoryError::conflict_with_context("duplicate", ErrorContext::default())
        .is_retryable());

    let serialization_failure = RepositoryError::QueryError {
        message: "could not serialize access".to_string(),
        context: ErrorContext::new("store_night_bundle").retryable(),
    };
    assert!(serialization_failure.is_retryable());
}

#[test]
fn test_with_operation_overrides_context() {
    let err = RepositoryError::conflict_with_context("duplicate", ErrorContext::default())
        .with_operation("store_night_bundle");
    assert_eq!(
        err.context().operation.as_deref(),
        Some("store_night_bundle")
    );
    assert!(err.to_string().contains("operation=store_night_bundle"));
}

#[test]
fn test_ambiguous_reports_match_count() {
    let err = RepositoryError::ambiguous_with_context(
        "DARK_MASTER for bundle 3",
        2,
        ErrorContext::new("get_single_combination"),
    );
    assert!(err.to_string().contains("found 2"));
    assert!(matches!(err, RepositoryError::Ambiguous { count: 2, .. }));
}

#[test]
fn test_exactly_one() {
    let ctx = || ErrorContext::new("lookup");

    assert_eq!(exactly_one(vec![7], "value", ctx()).unwrap(), 7);

    let err = exactly_one(Vec::<i32>::new(), "value", ctx()).unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { .. }));

    let err = exactly_one(vec![1, 2, 3], "value", ctx()).unwrap_err();
    assert!(matches!(err, RepositoryError::Ambiguous { count: 3, .. }));
}

#[test]
fn test_string_conversions_are_internal() {
    let err: RepositoryError = "lock poisoned".into();
    assert!(matches!(err, RepositoryError::InternalError { .. }));

    let err: RepositoryError = String::from("unexpected").into();
    assert!(err.to_string().contains("unexpected"));
}
