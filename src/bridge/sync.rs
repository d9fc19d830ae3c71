//! Controller-side view of each tab's reading mode.
//!
//! The cache only ever holds what a frame acknowledged. A toggle is not
//! reflected until the primary frame answers `ok`, and a rejected toggle
//! drops the entry. Queries always go to the frame, so a page that went
//! away without navigating shows up as unreachable.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::time;

use super::hub::{FrameId, MessageHub, TabId, PRIMARY_FRAME};
use super::protocol::{
    decode, encode, ContentMessage, ReadingModeChanged, ReadingModeReply, ToggleReply,
};
use super::session::{SessionCache, SessionState};
use crate::classifier::{diagnose, HostCapabilities};
use crate::error::{ReaderError, UserCondition};
use crate::settings::RuntimeSettings;
use crate::{log_debug, log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("reading mode is not available on this page")]
    RestrictedPage,
    #[error("file URL access has not been granted")]
    FileAccessRequired,
    #[error("the page did not respond")]
    PageNotDetected,
}

impl BridgeError {
    pub fn condition(&self) -> UserCondition {
        match self {
            BridgeError::RestrictedPage => UserCondition::PageNotSupported,
            BridgeError::FileAccessRequired => UserCondition::FileAccessRequired,
            BridgeError::PageNotDetected => UserCondition::PageNotDetected,
        }
    }
}

impl From<UserCondition> for BridgeError {
    fn from(condition: UserCondition) -> Self {
        match condition {
            UserCondition::PageNotSupported => BridgeError::RestrictedPage,
            UserCondition::FileAccessRequired => BridgeError::FileAccessRequired,
            UserCondition::PageNotDetected | UserCondition::StoreUnavailable => {
                BridgeError::PageNotDetected
            }
        }
    }
}

/// Outcome of an acknowledged toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAck {
    /// The primary frame switched; carries the new mode.
    Applied(bool),
    /// The primary frame answered but could not switch.
    Rejected,
}

pub struct SyncBridge {
    hub: Arc<MessageHub>,
    cache: Arc<Mutex<SessionCache>>,
    settings: RuntimeSettings,
}

impl SyncBridge {
    pub fn new(hub: Arc<MessageHub>, settings: RuntimeSettings) -> Self {
        Self {
            hub,
            cache: Arc::new(Mutex::new(SessionCache::new())),
            settings,
        }
    }

    pub fn hub(&self) -> &Arc<MessageHub> {
        &self.hub
    }

    fn cache(&self) -> MutexGuard<'_, SessionCache> {
        lock_cache(&self.cache)
    }

    /// Cached state of the tab's primary frame, without asking it.
    pub fn cached(&self, tab: TabId) -> SessionState {
        match self.hub.generation(tab) {
            Some(generation) => self.cache().get(tab, PRIMARY_FRAME, generation),
            None => SessionState::Unknown,
        }
    }

    pub fn forget(&self, tab: TabId) {
        self.cache().forget_tab(tab);
    }

    /// Reading mode of the tab's primary frame. Always asks the frame; the
    /// answer, or its absence, is what lands in the cache.
    pub async fn query(&self, tab: TabId) -> Result<bool, BridgeError> {
        let Some(generation) = self.hub.generation(tab) else {
            self.forget(tab);
            return Err(BridgeError::PageNotDetected);
        };

        let payload = self.payload(ContentMessage::GetReadingMode)?;
        let reply = self
            .request(tab, PRIMARY_FRAME, payload)
            .await
            .and_then(|raw| decode::<ReadingModeReply>(&raw));

        match reply {
            Ok(ReadingModeReply { data }) => {
                self.cache()
                    .record(tab, PRIMARY_FRAME, generation, SessionState::from_mode(data));
                Ok(data)
            }
            Err(err) => Err(self.unreachable(tab, generation, err)),
        }
    }

    /// Asks every frame of the tab to switch to `desired`. The primary
    /// frame's acknowledgment decides the result; other frames update
    /// their own cache entries as their answers come in.
    pub async fn toggle(&self, tab: TabId, desired: bool) -> Result<ToggleAck, BridgeError> {
        let Some(generation) = self.hub.generation(tab) else {
            self.forget(tab);
            return Err(BridgeError::PageNotDetected);
        };

        let payload = self.payload(ContentMessage::SetReadingMode { data: desired })?;

        for frame in self.hub.frames(tab) {
            if frame != PRIMARY_FRAME {
                self.spawn_secondary(tab, frame, generation, payload.clone(), desired);
            }
        }

        let reply = self
            .request(tab, PRIMARY_FRAME, payload)
            .await
            .and_then(|raw| decode::<ToggleReply>(&raw));

        match reply {
            Ok(ToggleReply { ok: true }) => {
                self.cache().record(
                    tab,
                    PRIMARY_FRAME,
                    generation,
                    SessionState::from_mode(desired),
                );
                self.hub.broadcast(ReadingModeChanged::new(tab, desired));
                log_info!("Reading mode {} on tab {tab}", if desired { "on" } else { "off" });
                Ok(ToggleAck::Applied(desired))
            }
            Ok(ToggleReply { ok: false }) => {
                log_warn!("Tab {tab} rejected reading mode {desired}");
                self.cache()
                    .record(tab, PRIMARY_FRAME, generation, SessionState::Unknown);
                Ok(ToggleAck::Rejected)
            }
            Err(err) => Err(self.unreachable(tab, generation, err)),
        }
    }

    fn payload(&self, message: ContentMessage) -> Result<String, BridgeError> {
        encode(&message).map_err(|err| {
            log_error!("Failed to encode {message:?}: {err}");
            BridgeError::PageNotDetected
        })
    }

    async fn request(
        &self,
        tab: TabId,
        frame: FrameId,
        payload: String,
    ) -> crate::error::Result<String> {
        let timeout = self.settings.query_timeout();
        round_trip(&self.hub, tab, frame, payload, timeout)
            .await
            .ok_or(ReaderError::Unreachable {
                tab,
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    fn unreachable(&self, tab: TabId, generation: u64, err: ReaderError) -> BridgeError {
        log_warn!("Tab {tab} did not acknowledge: {err}");
        self.cache()
            .record(tab, PRIMARY_FRAME, generation, SessionState::Unreachable);
        let url = self.hub.tab_url(tab).unwrap_or_default();
        BridgeError::from(diagnose(&url, HostCapabilities::from(&self.settings)))
    }

    fn spawn_secondary(
        &self,
        tab: TabId,
        frame: FrameId,
        generation: u64,
        payload: String,
        desired: bool,
    ) {
        let hub = self.hub.clone();
        let cache = self.cache.clone();
        let timeout = self.settings.query_timeout();

        tokio::spawn(async move {
            let state = match round_trip(&hub, tab, frame, payload, timeout).await {
                Some(raw) => match decode::<ToggleReply>(&raw) {
                    Ok(ToggleReply { ok: true }) => SessionState::from_mode(desired),
                    Ok(ToggleReply { ok: false }) => SessionState::Unknown,
                    Err(_) => SessionState::Unreachable,
                },
                None => SessionState::Unreachable,
            };
            log_debug!("Frame {frame} of tab {tab} settled as {state:?}");
            lock_cache(&cache).record(tab, frame, generation, state);
        });
    }
}

fn lock_cache(cache: &Mutex<SessionCache>) -> MutexGuard<'_, SessionCache> {
    cache
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sends `payload` and waits for the reply, all within `timeout`.
async fn round_trip(
    hub: &MessageHub,
    tab: TabId,
    frame: FrameId,
    payload: String,
    timeout: Duration,
) -> Option<String> {
    let exchange = async {
        let (id, response) = hub.send(tab, frame, payload).await?;
        log_debug!("Request {id} posted to frame {frame} of tab {tab}");
        response.await.ok()
    };
    time::timeout(timeout, exchange).await.ok().flatten()
}
