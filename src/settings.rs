use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::utils::logging::debug_mode;

/// Browser the extension is built for. Only Chromium exposes the
/// "allow access to file URLs" switch the file-permission flow checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserTarget {
    #[default]
    Chrome,
    Firefox,
    Safari,
}

/// Host-runtime tunables. Persisted as pretty JSON next to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeSettings {
    /// How long a bridge query/toggle waits for a frame before `Unreachable`.
    pub query_timeout_ms: u64,
    /// Quiet window the mutation watcher waits for before one reprocessing pass.
    pub mutation_debounce_ms: u64,
    pub file_access_granted: bool,
    pub target: BrowserTarget,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            query_timeout_ms: 1_500,
            mutation_debounce_ms: 100,
            file_access_granted: false,
            target: BrowserTarget::Chrome,
        }
    }
}

impl RuntimeSettings {
    /// Defaults, shortened when `JIFFY_DEBUG` is set.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if debug_mode() {
            settings.query_timeout_ms = 300;
            settings.mutation_debounce_ms = 20;
        }
        settings
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(self.mutation_debounce_ms)
    }

    /// File pages are only blocked where the browser gates them behind a grant.
    pub fn file_access_effective(&self) -> bool {
        self.file_access_granted || self.target != BrowserTarget::Chrome
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<RuntimeSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                RuntimeSettings::from_env()
            })
        } else {
            RuntimeSettings::from_env()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> RuntimeSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: RuntimeSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &RuntimeSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, RuntimeSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RuntimeSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
