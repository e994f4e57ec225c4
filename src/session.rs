//! Session management for the Discord client
//!
//! Provides:
//! - Credential validation when the session is opened
//! - File-based locking so two runs never append to the same log at once

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tracing::info;

use crate::discord::DiscordClient;
use crate::error::{Error, Result};

/// Lock guard held for the whole run, next to the output file.
///
/// The lock file is never deleted, so every run locks the same inode.
pub struct RunLock {
    lock_file: Option<File>,
}

impl RunLock {
    /// Lock file path used for `output`: `<output>.lock`.
    pub fn lock_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire an exclusive lock for writing to `output`.
    pub fn acquire(output: &Path) -> Result<Self> {
        let path = Self::lock_path(output);
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                lock_file: Some(lock_file),
            }),
            Err(_) => Err(Error::OutputLocked(output.display().to_string())),
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// An authenticated API session shared by every channel scrape.
pub struct Session {
    client: Arc<DiscordClient>,
    bot_name: String,
}

impl Session {
    /// Validate the token against `/users/@me`. An invalid token fails here,
    /// before any output is written.
    pub async fn open(client: DiscordClient) -> Result<Self> {
        let me = client.current_user().await?;
        info!(bot = %me.username, id = %me.id, "Logged in");
        Ok(Self {
            client: Arc::new(client),
            bot_name: me.username,
        })
    }

    pub fn client(&self) -> Arc<DiscordClient> {
        Arc::clone(&self.client)
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    pub fn close(self) {
        info!(bot = %self.bot_name, "Session closed");
    }
}
