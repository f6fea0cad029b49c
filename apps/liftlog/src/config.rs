use std::{collections::HashMap, fs, str::FromStr};

use clap::ValueEnum;
use serde::Deserialize;
use tracing::warn;

pub const SETTINGS_FILE: &str = "liftlog.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Rest,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "rest" => Ok(Self::Rest),
            other => Err(format!("unknown backend '{other}', expected sqlite or rest")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub backend: BackendKind,
    pub rest_url: Option<String>,
    pub rest_api_key: Option<String>,
    pub rest_access_token: Option<String>,
    pub user_id: Option<i64>,
    /// Zero writes the draft after every change.
    pub autosave_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/liftlog.db".into(),
            backend: BackendKind::Sqlite,
            rest_url: None,
            rest_api_key: None,
            rest_access_token: None,
            user_id: None,
            autosave_interval_secs: 0,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file(&mut settings, &raw);
    }

    for (key, value) in std::env::vars() {
        let name = key
            .strip_prefix("LIFTLOG_")
            .or_else(|| key.strip_prefix("APP__"));
        if let Some(name) = name {
            apply_value(&mut settings, &name.to_ascii_lowercase(), value);
        }
    }

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    match toml::from_str::<HashMap<String, String>>(raw) {
        Ok(file_cfg) => {
            for (key, value) in file_cfg {
                apply_value(settings, &key, value);
            }
        }
        Err(err) => warn!(file = SETTINGS_FILE, error = %err, "ignoring unreadable settings file"),
    }
}

fn apply_value(settings: &mut Settings, key: &str, value: String) {
    match key {
        "database_url" => settings.database_url = value,
        "backend" => match value.parse() {
            Ok(kind) => settings.backend = kind,
            Err(err) => warn!(error = %err, "ignoring backend setting"),
        },
        "rest_url" => settings.rest_url = Some(value),
        "rest_api_key" => settings.rest_api_key = Some(value),
        "rest_access_token" => settings.rest_access_token = Some(value),
        "user_id" => match value.parse::<i64>() {
            Ok(id) => settings.user_id = Some(id),
            Err(_) => warn!(value = %value, "ignoring non-numeric user_id"),
        },
        "autosave_interval_secs" => {
            if let Ok(parsed) = value.parse::<u64>() {
                settings.autosave_interval_secs = parsed;
            }
        }
        _ => {}
    }
}

/// Turns a bare path or `sqlite:` prefix into a `sqlite://` url. The storage
/// layer creates missing parent directories when it opens the file.
pub fn prepare_database_url(raw_database_url: &str) -> String {
    let raw = raw_database_url.trim();

    if raw.is_empty() {
        return Settings::default().database_url;
    }
    if raw.starts_with("sqlite::memory:") || raw.contains("://") {
        return raw.to_string();
    }

    let path = raw.strip_prefix("sqlite:").unwrap_or(raw);
    format!("sqlite://{}", path.replace('\\', "/"))
}
