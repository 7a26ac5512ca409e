use std::io::Write;

use super::*;
use crate::domain::types::{Scalar, fields};

const USER_TOML: &str = r#"
[logging]
level = "debug"
json = true

[entities.user]
connection = "default"
key = "user:{id}"
except = ["password"]
expire_seconds = 600

[entities.user.views]
by_email = "user:email:{email}"
"#;

#[test]
fn defaults_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.database.url, None);
    assert_eq!(
        settings.database.max_connections.get(),
        DEFAULT_DB_MAX_CONNECTIONS
    );
    assert!(settings.entities.is_empty());
}

#[test]
fn entity_tables_build_cache_configs() {
    let settings = from_toml(USER_TOML).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));

    let user = settings.entity("user").expect("user entity");
    assert!(user.is_enabled());
    assert_eq!(user.connection.as_deref(), Some("default"));
    assert!(user.is_excluded("password"));
    assert_eq!(user.expire, Some(Duration::from_secs(600)));
    assert_eq!(user.negative_value, crate::cache::DEFAULT_NEGATIVE_VALUE);
    assert_eq!(user.lock, LockConfig::default());

    let resolver = user.resolver();
    let row = fields([("id", Scalar::from(7)), ("email", Scalar::from("a@b.c"))]);
    assert_eq!(resolver.resolve(None, &row).as_deref(), Some("user:7"));
    assert_eq!(
        resolver.resolve(Some("by_email"), &row).as_deref(),
        Some("user:email:a%40b.c")
    );
}

#[test]
fn lock_and_negative_overrides() {
    let settings = from_toml(
        r#"
        [entities.order]
        connection = "orders"
        key = "order:{id}"
        negative_value = "missing"
        negative_ttl_seconds = 30
        lock_prefix = "fill:"
        lock_wait_seconds = 0
        lock_poll_millis = 50
        lock_lease_seconds = 10
        "#,
    )
    .expect("valid settings");

    let order = settings.entity("order").expect("order entity");
    assert_eq!(order.negative_value, "missing");
    assert_eq!(order.negative_ttl, Duration::from_secs(30));
    assert_eq!(
        order.lock,
        LockConfig {
            prefix: "fill:".to_string(),
            max_wait: Duration::ZERO,
            poll_interval: Duration::from_millis(50),
            lease: Duration::from_secs(10),
        }
    );
}

#[test]
fn entity_without_connection_stays_disabled() {
    let settings = from_toml(
        r#"
        [entities.audit]
        key = "audit:{id}"
        connection = ""
        "#,
    )
    .expect("valid settings");

    assert!(!settings.entity("audit").expect("audit entity").is_enabled());
}

#[test]
fn rejects_malformed_templates() {
    let err = from_toml(
        r#"
        [entities.user]
        connection = "default"
        key = "user:{id}{name}"
        "#,
    )
    .expect_err("adjacent placeholders");

    assert!(matches!(err, LoadError::Invalid { ref key, .. } if key == "entities.user.key"));

    let err = from_toml(
        r#"
        [entities.user.views]
        by_email = "user:{email"
        "#,
    )
    .expect_err("unclosed placeholder");

    assert!(
        matches!(err, LoadError::Invalid { ref key, .. } if key == "entities.user.views.by_email")
    );
}

#[test]
fn rejects_zero_durations_that_must_be_positive() {
    for (field, line) in [
        ("lock_poll_millis", "lock_poll_millis = 0"),
        ("negative_ttl_seconds", "negative_ttl_seconds = 0"),
        ("lock_lease_seconds", "lock_lease_seconds = 0"),
    ] {
        let err = from_toml(&format!("[entities.user]\n{line}\n")).expect_err(field);
        let expected = format!("entities.user.{field}");
        assert!(
            matches!(err, LoadError::Invalid { ref key, .. } if *key == expected),
            "unexpected error for {field}: {err}"
        );
    }
}

#[test]
fn rejects_invalid_log_level() {
    let err = from_toml("[logging]\nlevel = \"chatty\"\n").expect_err("invalid level");
    assert!(matches!(err, LoadError::Invalid { ref key, .. } if key == "logging.level"));
}

#[test]
fn explicit_file_is_required_and_loaded() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(USER_TOML.as_bytes()).expect("write config");

    let settings = load(Some(file.path())).expect("load settings");
    assert!(settings.entity("user").is_some_and(EntityCacheConfig::is_enabled));

    let missing = file.path().with_extension("absent.toml");
    assert!(matches!(load(Some(&missing)), Err(LoadError::Build(_))));
}
