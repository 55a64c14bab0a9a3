//! Unit tests for settings merging and resolution.

use mysql_clone::config::{
    CloneSettings, EndpointSettings, RunMode, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_USER,
};
use mysql_clone::copier::DEFAULT_CHUNK_SIZE;
use mysql_clone::error::CloneError;
use mysql_clone::process::DEFAULT_MAX_OUTPUT_LINES;
use mysql_clone::rewrite::{RewriteRuleConfig, RewriteSet};
use std::path::PathBuf;
use tempfile::TempDir;

fn minimal() -> CloneSettings {
    CloneSettings {
        password: Some("secret".into()),
        source: EndpointSettings {
            database: Some("shop".into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn problems(settings: CloneSettings) -> Vec<String> {
    match settings.resolve() {
        Err(CloneError::Config { problems }) => problems,
        Err(other) => panic!("expected a config error, got {other}"),
        Ok(_) => panic!("expected a config error, got a valid config"),
    }
}

#[test]
fn test_defaults() {
    let config = minimal().resolve().unwrap();

    assert_eq!(config.mode, RunMode::Full);
    assert_eq!(config.source.host, DEFAULT_HOST);
    assert_eq!(config.source.user, DEFAULT_USER);
    assert_eq!(config.source.port, DEFAULT_PORT);
    assert_eq!(config.target.host, DEFAULT_HOST);
    assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(config.max_output_lines, DEFAULT_MAX_OUTPUT_LINES);
    assert!(config.dump.routines);
    assert!(config.dump.hex_blob);
    assert!(!config.dump.single_transaction);
    assert_eq!(config.rewrites, RewriteSet::charset_normalization());
    assert_eq!(config.target_charset.charset.as_deref(), Some("utf8"));
    assert_eq!(config.target_charset.collation.as_deref(), Some("utf8_general_ci"));
}

#[test]
fn test_target_database_defaults_to_source() {
    let config = minimal().resolve().unwrap();
    assert_eq!(config.target.database, "shop");

    let mut settings = minimal();
    settings.target.database = Some("shop_copy".into());
    assert_eq!(settings.resolve().unwrap().target.database, "shop_copy");
}

#[test]
fn test_shared_host_and_user_fill_both_sides() {
    let mut settings = minimal();
    settings.host = Some("db.internal".into());
    settings.user = Some("admin".into());
    settings.target.host = Some("replica.internal".into());
    let config = settings.resolve().unwrap();

    assert_eq!(config.source.host, "db.internal");
    assert_eq!(config.source.user, "admin");
    assert_eq!(config.target.host, "replica.internal");
    assert_eq!(config.target.user, "admin");
}

#[test]
fn test_same_machine_shares_one_password() {
    let settings = CloneSettings {
        source: EndpointSettings {
            password: Some("first".into()),
            database: Some("shop".into()),
            ..Default::default()
        },
        target: EndpointSettings {
            database: Some("shop_copy".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let config = settings.resolve().unwrap();

    assert_eq!(config.source.password, "first");
    assert_eq!(config.target.password, "first");
}

#[test]
fn test_different_machines_need_their_own_passwords() {
    let settings = CloneSettings {
        source: EndpointSettings {
            password: Some("first".into()),
            database: Some("shop".into()),
            ..Default::default()
        },
        target: EndpointSettings {
            host: Some("elsewhere".into()),
            ..Default::default()
        },
        ..Default::default()
    };

    assert_eq!(problems(settings), vec!["target password is required"]);
}

#[test]
fn test_quoted_passwords_are_stripped() {
    let mut settings = minimal();
    settings.password = Some("'secret'".into());
    let config = settings.resolve().unwrap();
    assert_eq!(config.source.password, "secret");
}

#[test]
fn test_all_missing_values_are_listed() {
    let found = problems(CloneSettings::default());
    assert_eq!(
        found,
        vec![
            "source password is required",
            "source database is required",
            "target password is required",
            "target database is required",
        ]
    );
}

#[test]
fn test_blank_values_count_as_missing() {
    let mut settings = minimal();
    settings.source.database = Some("   ".into());
    assert!(problems(settings).contains(&"source database is required".to_string()));
}

#[test]
fn test_restore_only_needs_dump_file_but_not_source() {
    let settings = CloneSettings {
        restore_only: true,
        target: EndpointSettings {
            password: Some("secret".into()),
            database: Some("shop".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let found = problems(settings.clone());
    assert_eq!(found.len(), 1);
    assert!(found[0].contains("--dump-file"));

    let config = CloneSettings {
        dump_file: Some(PathBuf::from("shop.sql")),
        ..settings
    }
    .resolve()
    .unwrap();
    assert_eq!(config.mode, RunMode::RestoreOnly);
}

#[test]
fn test_dump_only_needs_dump_file_but_not_target() {
    let settings = CloneSettings {
        dump_only: true,
        dump_file: Some(PathBuf::from("shop.sql.gz")),
        source: EndpointSettings {
            host: Some("db1".into()),
            password: Some("secret".into()),
            database: Some("shop".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let config = settings.resolve().unwrap();
    assert_eq!(config.mode, RunMode::DumpOnly);
}

#[test]
fn test_modes_are_exclusive() {
    let mut settings = minimal();
    settings.restore_only = true;
    settings.dump_only = true;
    assert!(problems(settings)[0].contains("cannot be combined"));
}

#[test]
fn test_zero_chunk_size_rejected() {
    let mut settings = minimal();
    settings.chunk_size = Some(0);
    assert_eq!(problems(settings), vec!["chunk size must be positive"]);
}

#[test]
fn test_extra_rewrite_rules_appended() {
    let mut settings = minimal();
    settings.rewrites = vec![RewriteRuleConfig {
        find: "DEFINER=`a`".into(),
        replace: "           ".into(),
    }];
    let config = settings.resolve().unwrap();
    assert_eq!(config.rewrites.rules().len(), 3);
    assert_eq!(config.rewrites.rules()[2].pattern(), b"DEFINER=`a`");
}

#[test]
fn test_mismatched_rewrite_rule_rejected() {
    let mut settings = minimal();
    settings.rewrites = vec![RewriteRuleConfig {
        find: "utf8mb4".into(),
        replace: "utf8".into(),
    }];
    let err = settings.resolve().unwrap_err();
    assert!(matches!(err, CloneError::RewriteConfiguration(_)));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_retained_encodings_disable_rewrites() {
    let mut settings = minimal();
    settings.retain_original_encodings = true;
    let config = settings.resolve().unwrap();

    assert!(config.rewrites.is_empty());
    assert_eq!(config.target_charset.charset.as_deref(), Some("utf8mb4"));
    assert_eq!(
        config.target_charset.collation.as_deref(),
        Some("utf8mb4_0900_ai_ci")
    );
}

#[test]
fn test_explicit_charset_wins() {
    let mut settings = minimal();
    settings.charset = Some("latin1".into());
    let config = settings.resolve().unwrap();
    assert_eq!(config.target_charset.charset.as_deref(), Some("latin1"));
    assert_eq!(config.target_charset.collation, None);
}

#[test]
fn test_blank_after_restore_items_dropped() {
    let mut settings = minimal();
    settings.after_restore = vec!["".into(), "select 1;".into(), "  ".into()];
    assert_eq!(settings.resolve().unwrap().after_restore, vec!["select 1;"]);
}

#[test]
fn test_dump_flags_override_defaults() {
    let mut settings = minimal();
    settings.dump.routines = Some(false);
    settings.dump.single_transaction = Some(true);
    let config = settings.resolve().unwrap();
    assert!(!config.dump.routines);
    assert!(config.dump.single_transaction);
}

#[test]
fn test_load_yaml_and_merge_flags_on_top() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("clone.yaml");
    std::fs::write(
        &path,
        r#"
source:
  host: db1.internal
  database: shop
  password: s3cret
target:
  host: db2.internal
  password: other
chunk_size: 1024
dump:
  single_transaction: true
after_restore:
  - "update settings set value = 'dev';"
rewrites:
  - find: "DEFINER=`a`"
    replace: "           "
"#,
    )
    .unwrap();

    let file = CloneSettings::load(&path).unwrap();
    let flags = CloneSettings {
        target: EndpointSettings {
            database: Some("shop_copy".into()),
            ..Default::default()
        },
        chunk_size: Some(4096),
        ..Default::default()
    };
    let config = file.merge(flags).resolve().unwrap();

    assert_eq!(config.source.host, "db1.internal");
    assert_eq!(config.source.password, "s3cret");
    assert_eq!(config.target.host, "db2.internal");
    assert_eq!(config.target.password, "other");
    assert_eq!(config.target.database, "shop_copy");
    assert_eq!(config.chunk_size, 4096);
    assert!(config.dump.single_transaction);
    assert_eq!(config.after_restore.len(), 1);
    assert_eq!(config.rewrites.rules().len(), 3);
}

#[test]
fn test_invalid_yaml_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("clone.yaml");
    std::fs::write(&path, "source: [not, a, map]\n").unwrap();

    let err = CloneSettings::load(&path).unwrap_err();
    assert!(matches!(err, CloneError::Config { .. }));
}

#[test]
fn test_missing_config_file_is_io_error() {
    let err = CloneSettings::load(std::path::Path::new("/nonexistent/clone.yaml")).unwrap_err();
    assert!(matches!(err, CloneError::Io { .. }));
}
