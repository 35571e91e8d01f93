use super::{load_settings_from, normalize_database_url, Settings};

use std::{collections::HashMap, fs};

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(
        normalize_database_url("data\\test.db"),
        "sqlite://data/test.db"
    );
}

#[test]
fn keeps_sqlite_urls_untouched() {
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url(" sqlite://./x.db?mode=rwc "),
        "sqlite://./x.db?mode=rwc"
    );
    assert_eq!(normalize_database_url(""), Settings::default().database_url);
}

#[test]
fn missing_file_and_empty_environment_yield_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings =
        load_settings_from(&dir.path().join("server.toml"), HashMap::new()).expect("settings");
    let defaults = Settings::default();
    assert_eq!(settings.bind_addr, defaults.bind_addr);
    assert_eq!(settings.database_url, defaults.database_url);
    assert_eq!(settings.max_preview_bytes, 5 * 1024 * 1024);
    assert_eq!(settings.max_request_bytes, 8 * 1024 * 1024);
    assert_eq!(settings.media_url, "/media");
}

#[test]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(
        &path,
        "bind_addr = \"0.0.0.0:9000\"\nmedia_root = \"/srv/media\"\nmax_preview_bytes = 1024\n",
    )
    .expect("write");

    let settings = load_settings_from(&path, HashMap::new()).expect("settings");
    assert_eq!(settings.bind_addr, "0.0.0.0:9000");
    assert_eq!(settings.media_root, "/srv/media");
    assert_eq!(settings.max_preview_bytes, 1024);
    assert_eq!(settings.media_url, "/media");
}

#[test]
fn prefixed_environment_beats_bare_variables_and_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(&path, "bind_addr = \"0.0.0.0:9000\"\n").expect("write");

    let settings = load_settings_from(
        &path,
        vars(&[
            ("SERVER_BIND", "127.0.0.1:7000"),
            ("DATABASE_URL", "sqlite://bare.db"),
            ("APP__DATABASE_URL", "sqlite://prefixed.db"),
            ("APP__MAX_REQUEST_BYTES", "4096"),
        ]),
    )
    .expect("settings");
    assert_eq!(settings.bind_addr, "127.0.0.1:7000");
    assert_eq!(settings.database_url, "sqlite://prefixed.db");
    assert_eq!(settings.max_request_bytes, 4096);
}

#[test]
fn root_media_url_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = load_settings_from(
        &dir.path().join("server.toml"),
        vars(&[("APP__MEDIA_URL", "/")]),
    );
    assert!(result.is_err());
}
