use std::io::Write;

use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert!(settings.render_cache.enabled);
    assert!(settings.render_cache.send_cache_tags);
    assert_eq!(settings.render_cache.hash_algorithm, HashAlgorithm::Sha256);
    assert_eq!(settings.render_cache.default_bin, DEFAULT_BIN);
    assert_eq!(settings.store.capacity_per_bin.get(), 1000);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.render_cache.hash_algorithm = Some("sha256".to_string());

    let overrides = RenderCacheOverrides {
        log_level: Some("debug".to_string()),
        hash_algorithm: Some("sha512".to_string()),
        enabled: Some(false),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.render_cache.hash_algorithm, HashAlgorithm::Sha512);
    assert!(!settings.render_cache.enabled);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = RenderCacheOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn unknown_hash_algorithm_is_rejected() {
    let mut raw = RawSettings::default();
    raw.render_cache.hash_algorithm = Some("md5".to_string());

    let error = Settings::from_raw(raw).expect_err("md5 is not supported");
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "render_cache.hash_algorithm",
            ..
        }
    ));
}

#[test]
fn malformed_scope_is_rejected() {
    let mut raw = RawSettings::default();
    raw.render_cache.disabled_scopes = vec!["comment".to_string()];

    let error = Settings::from_raw(raw).expect_err("scope without kind");
    assert!(matches!(
        error,
        LoadError::Invalid {
            key: "render_cache.disabled_scopes",
            ..
        }
    ));
}

#[test]
fn unknown_kind_is_rejected() {
    let mut raw = RawSettings::default();
    raw.render_cache.disabled_kinds = vec!["view".to_string()];
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn zero_store_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.apply_overrides(&RenderCacheOverrides {
        store_capacity: Some(0),
        ..Default::default()
    });
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn empty_list_entries_are_dropped() {
    let mut raw = RawSettings::default();
    raw.render_cache.enabled_pages = vec![" node_page_view ".to_string(), String::new()];
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.render_cache.enabled_pages, ["node_page_view"]);
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "render-cache",
        "render",
        "--fixture",
        "/tmp/site.json",
        "--passes",
        "3",
        "--invalidate",
        "node:1",
        "--send-cache-tags",
        "false",
    ]);

    match args.command {
        Command::Render(render) => {
            assert_eq!(render.fixture, std::path::Path::new("/tmp/site.json"));
            assert_eq!(render.passes, 3);
            assert_eq!(render.invalidate, ["node:1"]);
            assert_eq!(render.overrides.send_cache_tags, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_keys_arguments() {
    let args = CliArgs::parse_from(["render-cache", "keys", "--fixture", "site.json"]);
    assert!(matches!(args.command, Command::Keys(_)));
}

#[test]
fn config_file_layer_is_applied() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(
        file,
        "[render_cache]\nsend_cache_tags = false\ndisabled_scopes = [\"entity:comment\"]\n\n[store]\ncapacity_per_bin = 5"
    )
    .expect("write config");

    let args = CliArgs::parse_from([
        "render-cache",
        "--config-file",
        file.path().to_str().expect("utf-8 path"),
        "keys",
        "--fixture",
        "site.json",
    ]);
    let settings = load(&args).expect("valid settings");

    assert!(!settings.render_cache.send_cache_tags);
    assert_eq!(settings.render_cache.disabled_scopes, ["entity:comment"]);
    assert_eq!(settings.store.capacity_per_bin.get(), 5);
}
