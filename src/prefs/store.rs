//! Scoped preference resolution over a shared `StorageBackend`.
//!
//! The global profile lives under `prefs:global` as a full snapshot. A site
//! override lives under `prefs:origin:<origin>` as a sparse record; its mere
//! existence makes that origin resolve locally.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backend::StorageBackend;
use super::model::{
    validation, AppConfig, EffectivePreferences, PartialPreferences, PreferenceUpdate,
    Preferences, Scope,
};
use crate::error::{ReaderError, Result};
use crate::{log_debug, log_warn};

const ENABLE_LOGS: bool = true;

pub const GLOBAL_KEY: &str = "prefs:global";
pub const ORIGIN_KEY_PREFIX: &str = "prefs:origin:";
pub const APP_CONFIG_KEY: &str = "app:config";

pub fn origin_key(origin: &str) -> String {
    format!("{ORIGIN_KEY_PREFIX}{origin}")
}

#[derive(Clone)]
pub struct PreferenceStore {
    backend: Arc<dyn StorageBackend>,
}

impl PreferenceStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Effective preferences for `origin`. Never fails: an unreadable store
    /// yields the defaults flagged with `StoreUnavailable`.
    pub async fn get(&self, origin: &str) -> EffectivePreferences {
        match self.resolve(origin).await {
            Ok(prefs) => EffectivePreferences::resolved(prefs),
            Err(err) => {
                log_warn!("Falling back to default preferences for {origin}: {err}");
                EffectivePreferences::fallback()
            }
        }
    }

    pub async fn set(&self, origin: &str, update: PreferenceUpdate) -> Result<()> {
        let changes = validation::normalize(update.changes)?;

        match update.scope {
            Scope::Global => {
                let global = self.load_global().await?;
                let merged = changes.apply_to(&global).with_scope(Scope::Global);
                self.write(GLOBAL_KEY, &merged).await?;
                // Choosing "global" on a site hands it back to the global profile.
                self.remove(&origin_key(origin)).await?;
            }
            Scope::Local => {
                let key = origin_key(origin);
                let mut override_record = self
                    .read::<PartialPreferences>(&key)
                    .await?
                    .unwrap_or_default();
                override_record.merge(&changes);
                self.write(&key, &override_record).await?;
            }
            Scope::Reset => {
                self.remove(&origin_key(origin)).await?;
            }
        }

        log_debug!("Stored {} preferences for {origin}", update.scope.as_str());
        Ok(())
    }

    /// Calls `callback` with fresh effective preferences whenever the global
    /// record or this origin's override changes, from any context sharing
    /// the backend. Stops when the returned handle is cancelled or dropped.
    pub fn watch<F>(&self, origin: &str, mut callback: F) -> PreferenceWatch
    where
        F: FnMut(EffectivePreferences) + Send + 'static,
    {
        let mut changes = self.backend.subscribe();
        let token = CancellationToken::new();
        let cancel = token.clone();
        let store = self.clone();
        let origin = origin.to_string();
        let own_key = origin_key(&origin);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(change) if change.key == GLOBAL_KEY || change.key == own_key => {
                            callback(store.get(&origin).await);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            log_debug!("Preference watch for {origin} lagged by {skipped}");
                            callback(store.get(&origin).await);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        PreferenceWatch {
            token,
            handle: Some(handle),
        }
    }

    /// App-level configuration; defaults when missing or unreadable.
    pub async fn app_config(&self) -> AppConfig {
        match self.read::<AppConfig>(APP_CONFIG_KEY).await {
            Ok(config) => config.unwrap_or_default(),
            Err(err) => {
                log_warn!("Falling back to default app config: {err}");
                AppConfig::default()
            }
        }
    }

    pub async fn set_app_config(&self, config: &AppConfig) -> Result<()> {
        self.write(APP_CONFIG_KEY, config).await
    }

    pub async fn toggle_display_color_mode(&self) -> Result<AppConfig> {
        let mut config = self.app_config().await;
        config.display_color_mode = config.display_color_mode.next();
        self.set_app_config(&config).await?;
        Ok(config)
    }

    pub async fn toggle_control_panel_text(&self) -> Result<AppConfig> {
        let mut config = self.app_config().await;
        config.transform_control_panel_text = !config.transform_control_panel_text;
        self.set_app_config(&config).await?;
        Ok(config)
    }

    async fn resolve(&self, origin: &str) -> Result<Preferences> {
        let global = self.load_global().await?;
        let resolved = match self.read::<PartialPreferences>(&origin_key(origin)).await? {
            Some(override_record) => override_record.apply_to(&global).with_scope(Scope::Local),
            None => global.with_scope(Scope::Global),
        };
        Ok(resolved)
    }

    async fn load_global(&self) -> Result<Preferences> {
        Ok(self.read::<Preferences>(GLOBAL_KEY).await?.unwrap_or_default())
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = self.backend.get(key).await.map_err(ReaderError::store)?;
        raw.map(|value| {
            serde_json::from_str(&value)
                .map_err(|err| ReaderError::store(format!("corrupt record {key}: {err}")))
        })
        .transpose()
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).map_err(ReaderError::store)?;
        self.backend.set(key, json).await.map_err(ReaderError::store)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove(key).await.map_err(ReaderError::store)
    }
}

/// Handle for a running `PreferenceStore::watch` task.
pub struct PreferenceWatch {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PreferenceWatch {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancels and waits for the task to finish.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PreferenceWatch {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
