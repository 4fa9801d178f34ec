use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8443";
const APP_DIR_NAME: &str = "chat_desktop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopSettings {
    pub server_url: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub debounce: Duration,
}

impl Default for DesktopSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            data_dir: default_data_dir(),
            request_timeout: client_core::surface::DEFAULT_REQUEST_TIMEOUT,
            debounce: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    data_dir: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
    debounce_ms: Option<u64>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn load_settings(path: &Path) -> DesktopSettings {
    load_settings_from(path, |key| std::env::var(key).ok())
}

/// Defaults, then `path` if it exists, then `CHAT_*` environment overrides.
pub(crate) fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> DesktopSettings {
    let mut settings = DesktopSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.server_url {
                    settings.server_url = v;
                }
                if let Some(v) = file_cfg.data_dir {
                    settings.data_dir = v;
                }
                if let Some(v) = file_cfg.request_timeout_secs.filter(|v| *v > 0) {
                    settings.request_timeout = Duration::from_secs(v);
                }
                if let Some(v) = file_cfg.debounce_ms {
                    settings.debounce = Duration::from_millis(v);
                }
            }
            Err(error) => warn!(path = %path.display(), %error, "ignoring malformed settings file"),
        }
    }

    if let Some(v) = env("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("CHAT_DATA_DIR") {
        settings.data_dir = PathBuf::from(v);
    }
    if let Some(v) = env("CHAT_REQUEST_TIMEOUT_SECS") {
        match v.parse::<u64>() {
            Ok(secs) if secs > 0 => settings.request_timeout = Duration::from_secs(secs),
            _ => warn!(value = %v, "ignoring invalid CHAT_REQUEST_TIMEOUT_SECS"),
        }
    }
    if let Some(v) = env("CHAT_DEBOUNCE_MS") {
        match v.parse::<u64>() {
            Ok(ms) => settings.debounce = Duration::from_millis(ms),
            Err(_) => warn!(value = %v, "ignoring invalid CHAT_DEBOUNCE_MS"),
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
