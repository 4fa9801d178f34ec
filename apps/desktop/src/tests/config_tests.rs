use super::{load_settings_from, DesktopSettings, DEFAULT_SERVER_URL};

use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn missing_file_and_env_yield_defaults() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let settings = load_settings_from(&temp_root.path().join("desktop.toml"), env_from(&[]));
    assert_eq!(settings, DesktopSettings::default());
    assert_eq!(settings.server_url, DEFAULT_SERVER_URL);
    assert!(settings.data_dir.ends_with("chat_desktop"));
}

#[test]
fn file_values_are_applied() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let path = temp_root.path().join("desktop.toml");
    fs::write(
        &path,
        "server_url = \"https://chat.example\"\ndata_dir = \"/tmp/chat\"\nrequest_timeout_secs = 3\ndebounce_ms = 50\n",
    )
    .expect("write settings");

    let settings = load_settings_from(&path, env_from(&[]));
    assert_eq!(settings.server_url, "https://chat.example");
    assert_eq!(settings.data_dir, PathBuf::from("/tmp/chat"));
    assert_eq!(settings.request_timeout, Duration::from_secs(3));
    assert_eq!(settings.debounce, Duration::from_millis(50));
}

#[test]
fn env_overrides_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let path = temp_root.path().join("desktop.toml");
    fs::write(&path, "server_url = \"https://file.example\"\n").expect("write settings");

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("CHAT_SERVER_URL", "http://env.example:9000"),
            ("CHAT_DATA_DIR", "/var/chat"),
            ("CHAT_REQUEST_TIMEOUT_SECS", "7"),
        ]),
    );
    assert_eq!(settings.server_url, "http://env.example:9000");
    assert_eq!(settings.data_dir, PathBuf::from("/var/chat"));
    assert_eq!(settings.request_timeout, Duration::from_secs(7));
}

#[test]
fn invalid_values_are_ignored() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let path = temp_root.path().join("desktop.toml");
    fs::write(&path, "server_url = [not toml").expect("write settings");

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("CHAT_REQUEST_TIMEOUT_SECS", "0"),
            ("CHAT_DEBOUNCE_MS", "soon"),
        ]),
    );
    assert_eq!(settings, DesktopSettings::default());
}
