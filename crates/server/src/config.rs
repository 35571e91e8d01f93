use std::{collections::HashMap, path::Path};

use anyhow::Context;
use config::{Config, Environment, File, FileFormat, Map};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    /// Directory preview images are written to.
    pub media_root: String,
    /// URL prefix the media directory is served under.
    pub media_url: String,
    pub max_preview_bytes: usize,
    pub max_request_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/animator.db".into(),
            media_root: "./data/media".into(),
            media_url: "/media".into(),
            max_preview_bytes: server_api::DEFAULT_MAX_PREVIEW_BYTES,
            max_request_bytes: 8 * 1024 * 1024,
        }
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new("server.toml"), std::env::vars().collect())
}

/// Defaults, then the optional TOML file, then the bare `SERVER_BIND` /
/// `DATABASE_URL` variables, then `APP__*` variables.
pub(crate) fn load_settings_from(
    file: &Path,
    vars: HashMap<String, String>,
) -> anyhow::Result<Settings> {
    let mut bare = Map::new();
    for (var, key) in [("SERVER_BIND", "BIND_ADDR"), ("DATABASE_URL", "DATABASE_URL")] {
        if let Some(value) = vars.get(var) {
            bare.insert(key.to_string(), value.clone());
        }
    }
    let prefixed: Map<String, String> = vars
        .into_iter()
        .filter(|(var, _)| var.starts_with("APP__"))
        .collect();

    let settings = Config::builder()
        .add_source(File::from(file).format(FileFormat::Toml).required(false))
        .add_source(Environment::default().source(Some(bare)))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true)
                .source(Some(prefixed)),
        )
        .build()
        .with_context(|| format!("failed to load settings from '{}'", file.display()))?
        .try_deserialize::<Settings>()
        .context("invalid server settings")?;

    if settings.media_url.trim_matches('/').is_empty() {
        anyhow::bail!("media_url must name a path below '/'");
    }
    Ok(settings)
}

/// Turns a plain file path into a `sqlite://` URL; blank input means the default.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
