use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::domain::{Credentials, Nickname};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::CommandError;

pub const PROFILE_FILE_NAME: &str = "profile.json";

/// The one local account of this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub nickname: Nickname,
    pub auth_key: String,
    pub registered_at: DateTime<Utc>,
}

impl Profile {
    pub fn from_credentials(credentials: Credentials) -> Self {
        Self {
            nickname: credentials.nickname,
            auth_key: credentials.auth_key,
            registered_at: Utc::now(),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            nickname: self.nickname.clone(),
            auth_key: self.auth_key.clone(),
        }
    }
}

enum Backing {
    File(PathBuf),
    Memory(Mutex<Option<Profile>>),
}

pub struct ProfileStore {
    backing: Backing,
}

impl ProfileStore {
    /// Profile persisted as JSON at `path`; the file appears on first save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            backing: Backing::File(path.into()),
        }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::open(data_dir.join(PROFILE_FILE_NAME))
    }

    /// Profile that lives only as long as the process.
    pub fn ephemeral() -> Self {
        Self {
            backing: Backing::Memory(Mutex::new(None)),
        }
    }

    pub async fn load(&self) -> Result<Option<Profile>, CommandError> {
        match &self.backing {
            Backing::Memory(slot) => Ok(slot.lock().await.clone()),
            Backing::File(path) => {
                let raw = match tokio::fs::read(path).await {
                    Ok(raw) => raw,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(err) => {
                        return Err(CommandError::Storage(format!(
                            "failed to read profile '{}': {err}",
                            path.display()
                        )))
                    }
                };
                serde_json::from_slice(&raw).map(Some).map_err(|err| {
                    CommandError::Storage(format!(
                        "profile '{}' is corrupt: {err}",
                        path.display()
                    ))
                })
            }
        }
    }

    /// Writes through a sibling temp file so a crash never leaves a torn profile.
    pub async fn save(&self, profile: &Profile) -> Result<(), CommandError> {
        match &self.backing {
            Backing::Memory(slot) => {
                *slot.lock().await = Some(profile.clone());
                Ok(())
            }
            Backing::File(path) => {
                let storage_err = |what: &str, err: std::io::Error| {
                    CommandError::Storage(format!("failed to {what} '{}': {err}", path.display()))
                };
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| storage_err("create directory for", e))?;
                }
                let json = serde_json::to_vec_pretty(profile)
                    .map_err(|e| CommandError::Storage(format!("failed to encode profile: {e}")))?;
                let tmp = path.with_extension("json.tmp");
                tokio::fs::write(&tmp, json)
                    .await
                    .map_err(|e| storage_err("write", e))?;
                tokio::fs::rename(&tmp, path)
                    .await
                    .map_err(|e| storage_err("replace", e))?;
                info!(path = %path.display(), nickname = %profile.nickname, "profile saved");
                Ok(())
            }
        }
    }
}
