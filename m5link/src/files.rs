//! File operations on the device, with a host-side content cache.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use log::{debug, warn};

use crate::connection::Connection;
use crate::error::Result;
use crate::port::Port;
use crate::protocol::command::CommandCode;
use crate::transfer::{TransferConfig, TransferOutcome, TransferProgress, bulk_download_with};

/// Device files seen through one [`Connection`].
///
/// File contents read from or written to the device are cached by path, so
/// reopening a file does not cost another round-trip.
pub struct DeviceFiles<'c, P: Port> {
    conn: &'c Connection<P>,
    transfer: TransferConfig,
    cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl<'c, P: Port> DeviceFiles<'c, P> {
    /// Wrap a connection with an empty cache.
    pub fn new(conn: &'c Connection<P>) -> Self {
        Self {
            conn,
            transfer: TransferConfig::default(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Use custom transfer settings for [`save_file`](Self::save_file).
    #[must_use]
    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Underlying connection.
    pub fn connection(&self) -> &'c Connection<P> {
        self.conn
    }

    /// Read a file, from the cache when possible.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        if let Some(content) = self.cached(path) {
            debug!("Cache hit for {path}");
            return Ok(content);
        }

        let content = self.conn.send_command(CommandCode::ReadFile, path, false)?;
        self.cache_lock()
            .insert(path.to_string(), content.clone());
        Ok(content)
    }

    /// Store `text` at `path` on the device.
    ///
    /// The cache is updated before the transfer starts. Returns whether the
    /// transfer completed; failures are logged.
    pub fn save_file(&self, path: &str, text: &str, progress: &dyn TransferProgress) -> bool {
        self.cache_lock()
            .insert(path.to_string(), text.as_bytes().to_vec());

        match bulk_download_with(self.conn, path, text, progress, &self.transfer) {
            TransferOutcome::Completed { .. } => true,
            TransferOutcome::Failed { stage, error } => {
                warn!("Saving {path} failed at {stage:?}: {error}");
                false
            },
        }
    }

    /// List the entries of a directory.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let reply = self.conn.send_command(CommandCode::ListDir, path, false)?;
        Ok(String::from_utf8_lossy(&reply)
            .lines()
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(String::from)
            .collect())
    }

    /// Execute a script on the device; the console is cleared first.
    pub fn run_file(&self, path: &str) -> Result<Vec<u8>> {
        self.conn.send_command(CommandCode::RunFile, path, true)
    }

    /// Forget the cached content of `path`.
    pub fn remove_cache(&self, path: &str) {
        self.cache_lock().remove(path);
    }

    /// Cached content of `path`, if any.
    pub fn cached(&self, path: &str) -> Option<Vec<u8>> {
        self.cache_lock().get(path).cloned()
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
