use bucket_sync_core::config::{ConnectorConfig, ConnectorScope, FilterConfig};
use bucket_sync_core::errors::SyncError;

#[test]
fn test_minimal_config_fills_in_defaults() {
    let cfg: ConnectorConfig = serde_json::from_str(
        r#"{ "connector_id": "conn-1", "org_id": "org-1" }"#,
    )
    .expect("minimal config should deserialise");

    assert_eq!(cfg.scope, ConnectorScope::Team);
    assert_eq!(cfg.created_by, None);
    assert_eq!(cfg.bucket_name, None);
    assert!(cfg.bucket_filter.is_empty());
    assert_eq!(cfg.default_region, "us-east-1");
    assert_eq!(cfg.batch_size, 100);
    assert_eq!(cfg.requests_per_second, 50);
    assert!(
        cfg.filters.index_file_content,
        "content indexing defaults to on"
    );
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_scope_deserialises_lowercase() {
    let cfg: ConnectorConfig = serde_json::from_str(
        r#"{ "connector_id": "c", "org_id": "o", "scope": "individual" }"#,
    )
    .expect("scope should deserialise");
    assert_eq!(cfg.scope, ConnectorScope::Individual);
}

#[test]
fn test_validation_rejects_empty_identity_and_zero_limits() {
    let mut cfg: ConnectorConfig =
        serde_json::from_str(r#"{ "connector_id": "c", "org_id": "o" }"#).expect("deserialise");

    cfg.connector_id = "  ".to_string();
    assert!(
        matches!(cfg.validate(), Err(SyncError::NotInitialised(_))),
        "a blank connector id is not initialised"
    );

    cfg.connector_id = "c".to_string();
    cfg.batch_size = 0;
    assert!(matches!(cfg.validate(), Err(SyncError::Config(_))));

    cfg.batch_size = 100;
    cfg.requests_per_second = 0;
    assert!(matches!(cfg.validate(), Err(SyncError::Config(_))));
}

#[test]
fn test_extension_allow_list_is_normalised() {
    let filters = FilterConfig {
        file_extensions: vec![
            ".PDF".to_string(),
            "Txt".to_string(),
            "".to_string(),
            ".".to_string(),
        ],
        ..FilterConfig::default()
    };
    let normalised = filters.normalized_extensions();
    assert_eq!(normalised.len(), 2);
    assert!(normalised.contains("pdf"));
    assert!(normalised.contains("txt"));
}

#[test]
fn test_date_bounds_parse_rfc3339() {
    let filters = FilterConfig {
        modified_after: Some("2024-01-01T00:00:00Z".to_string()),
        modified_before: Some("2024-06-30T23:59:59+02:00".to_string()),
        ..FilterConfig::default()
    };
    let bounds = filters.parse_bounds().expect("valid bounds should parse");
    assert_eq!(bounds.modified_after, Some(1_704_067_200_000));
    assert!(bounds.modified_before.is_some());
    assert_eq!(bounds.created_after, None);
}

#[test]
fn test_malformed_date_bound_is_a_config_error() {
    let filters = FilterConfig {
        created_before: Some("yesterday".to_string()),
        ..FilterConfig::default()
    };
    let err = filters
        .parse_bounds()
        .expect_err("a non-RFC 3339 bound must be rejected");
    match err {
        SyncError::Config(msg) => {
            assert!(
                msg.contains("created_before"),
                "the error must name the offending field, got {msg:?}"
            );
        }
        other => panic!("expected a config error, got {other:?}"),
    }
}
