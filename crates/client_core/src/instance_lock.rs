use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fs2::FileExt;
use tracing::debug;

use crate::error::CommandError;

pub const LOCK_FILE_NAME: &str = "lockfile";

/// Exclusive claim on a data directory, so two hosts never share one
/// profile. Released when dropped.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(data_dir: &Path) -> Result<Self, CommandError> {
        std::fs::create_dir_all(data_dir).map_err(|err| {
            CommandError::Storage(format!(
                "failed to create data directory '{}': {err}",
                data_dir.display()
            ))
        })?;
        let path = data_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                CommandError::Storage(format!("failed to open lock '{}': {err}", path.display()))
            })?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %path.display(), "data directory locked");
                Ok(Self { file, path })
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(CommandError::Conflict(format!(
                "data directory '{}' is already in use by another instance",
                data_dir.display()
            ))),
            Err(err) => Err(CommandError::Storage(format!(
                "failed to lock '{}': {err}",
                path.display()
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), %err, "failed to unlock data directory");
        }
    }
}
