//! services/app/src/adapters/settings_store.rs
//!
//! Persists `AppSettings` in `settings.json` under a single `settings` key.

use super::json_store::write_atomically;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tubestudy_core::domain::AppSettings;
use tubestudy_core::ports::StoreResult;

pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    settings: AppSettings,
    #[serde(flatten)]
    other: Map<String, Value>,
}

#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            path: dir.join(SETTINGS_FILE_NAME),
        })
    }

    pub fn close(self) {
        info!("Closed settings store at {}", self.path.display());
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the settings, falling back to defaults when the file is missing or unreadable.
    pub async fn load(&self) -> AppSettings {
        self.read_document().await.settings
    }

    pub async fn save(&self, settings: &AppSettings) -> StoreResult<()> {
        let mut document = self.read_document().await;
        document.settings = settings.clone();
        let bytes = serde_json::to_vec_pretty(&document)?;
        write_atomically(&self.path, &bytes).await?;
        info!("Saved settings to {}", self.path.display());
        Ok(())
    }

    async fn read_document(&self) -> SettingsDocument {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return SettingsDocument::default()
            }
            Err(e) => {
                warn!("Could not read {}: {}", self.path.display(), e);
                return SettingsDocument::default();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(
                "{} is not valid settings JSON, using defaults: {}",
                self.path.display(),
                e
            );
            SettingsDocument::default()
        })
    }
}
