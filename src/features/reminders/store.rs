//! Durable reminder persistence.
//!
//! The whole collection is written as one indented JSON document. Writes go
//! to a side file first and are renamed over the canonical path, so a crash
//! mid-write can never leave a half-written file as the state the next boot
//! reads. The previous good state stays authoritative until the rename.
//!
//! No locking happens here; the repository is the single mutation path.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use anyhow::{Context, Result};
use log::{debug, error};
use std::path::{Path, PathBuf};

use crate::features::reminders::item::Reminder;

/// Atomic-replace file store for the reminder collection.
pub struct ReminderStore {
    path: PathBuf,
}

impl ReminderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ReminderStore { path: path.into() }
    }

    /// Path of the canonical reminder file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last persisted collection.
    ///
    /// A missing file is a normal first boot. Unreadable or corrupt content
    /// means the state is gone; that is logged loudly and mapped to an empty
    /// collection rather than propagated as a crash.
    pub async fn load(&self) -> Vec<Reminder> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "No reminder file at {} yet; starting empty",
                    self.path.display()
                );
                return Vec::new();
            }
            Err(e) => {
                error!(
                    "Could not read reminder file {}; starting empty: {e}",
                    self.path.display()
                );
                return Vec::new();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(items) => items,
            Err(e) => {
                error!(
                    "Reminder file {} is corrupt; starting empty (previous reminders are lost): {e}",
                    self.path.display()
                );
                Vec::new()
            }
        }
    }

    /// Persist the full collection atomically.
    ///
    /// On failure the canonical file is untouched and the error surfaces to
    /// the caller; the in-memory state and the previous on-disk state remain
    /// consistent with each other on the next successful save.
    pub async fn save(&self, items: &[Reminder]) -> Result<()> {
        let json = serde_json::to_vec_pretty(items).context("Could not serialize reminders")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Could not create reminder directory {}", parent.display())
                })?;
            }
        }

        let side = self.side_path();
        tokio::fs::write(&side, &json)
            .await
            .with_context(|| format!("Could not write reminder file {}", side.display()))?;
        tokio::fs::rename(&side, &self.path)
            .await
            .with_context(|| {
                format!(
                    "Could not replace reminder file {} with {}",
                    self.path.display(),
                    side.display()
                )
            })?;

        debug!(
            "Saved {} reminder(s) to {}",
            items.len(),
            self.path.display()
        );
        Ok(())
    }

    fn side_path(&self) -> PathBuf {
        let mut raw = self.path.clone().into_os_string();
        raw.push(".tmp");
        PathBuf::from(raw)
    }
}
