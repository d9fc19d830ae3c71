//! In-process stand-in for the extension messaging runtime.
//!
//! The hub owns the tab registry, hands each frame a port to receive
//! requests on, and fans out `ReadingModeChanged` notifications. Delivery
//! is best-effort: a request to a frame whose port is gone is dropped and
//! the sender sees no reply.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use super::protocol::ReadingModeChanged;
use crate::error::{ReaderError, Result};
use crate::{log_debug, log_info};

const ENABLE_LOGS: bool = true;

pub type TabId = u32;
pub type FrameId = u32;

/// The top-level document of a tab.
pub const PRIMARY_FRAME: FrameId = 0;

const PORT_CAPACITY: usize = 32;
const BROADCAST_CAPACITY: usize = 64;

/// A request on its way to a frame, with the slot for its single reply.
#[derive(Debug)]
pub struct Envelope {
    pub id: Uuid,
    pub payload: String,
    pub reply: oneshot::Sender<String>,
}

pub type FramePort = mpsc::Receiver<Envelope>;

#[derive(Debug)]
struct TabEntry {
    url: String,
    generation: u64,
    frames: BTreeMap<FrameId, mpsc::Sender<Envelope>>,
}

#[derive(Debug, Default)]
struct HubState {
    tabs: HashMap<TabId, TabEntry>,
    next_tab: TabId,
    active: Option<TabId>,
}

pub struct MessageHub {
    state: Mutex<HubState>,
    changes: broadcast::Sender<ReadingModeChanged>,
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            changes: broadcast::channel(BROADCAST_CAPACITY).0,
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a tab on `url` and makes it the active one.
    pub fn open_tab(&self, url: &str) -> TabId {
        let mut state = self.state();
        state.next_tab += 1;
        let tab = state.next_tab;
        state.tabs.insert(
            tab,
            TabEntry {
                url: url.to_string(),
                generation: 0,
                frames: BTreeMap::new(),
            },
        );
        state.active = Some(tab);
        log_debug!("Opened tab {tab} on {url}");
        tab
    }

    pub fn activate(&self, tab: TabId) -> bool {
        let mut state = self.state();
        if state.tabs.contains_key(&tab) {
            state.active = Some(tab);
            true
        } else {
            false
        }
    }

    pub fn active_tab(&self) -> Option<TabId> {
        self.state().active
    }

    pub fn tab_url(&self, tab: TabId) -> Option<String> {
        self.state().tabs.get(&tab).map(|entry| entry.url.clone())
    }

    /// Navigation generation; bumps on every navigate or reload.
    pub fn generation(&self, tab: TabId) -> Option<u64> {
        self.state().tabs.get(&tab).map(|entry| entry.generation)
    }

    /// Loads `url` in `tab`. Every frame of the old document is torn down.
    pub fn navigate(&self, tab: TabId, url: &str) -> Result<u64> {
        let mut state = self.state();
        let entry = state
            .tabs
            .get_mut(&tab)
            .ok_or_else(|| ReaderError::Protocol(format!("no tab {tab}")))?;
        entry.url = url.to_string();
        entry.generation += 1;
        entry.frames.clear();
        log_debug!("Tab {tab} navigated to {url} (generation {})", entry.generation);
        Ok(entry.generation)
    }

    pub fn reload(&self, tab: TabId) -> Result<u64> {
        let url = self
            .tab_url(tab)
            .ok_or_else(|| ReaderError::Protocol(format!("no tab {tab}")))?;
        self.navigate(tab, &url)
    }

    pub fn close_tab(&self, tab: TabId) -> bool {
        let mut state = self.state();
        let closed = state.tabs.remove(&tab).is_some();
        if state.active == Some(tab) {
            state.active = None;
        }
        closed
    }

    /// Connects a frame of `tab`; requests for it arrive on the returned port.
    /// Registering an existing frame id replaces its old port.
    pub fn register_frame(&self, tab: TabId, frame: FrameId) -> Result<FramePort> {
        let mut state = self.state();
        let entry = state
            .tabs
            .get_mut(&tab)
            .ok_or_else(|| ReaderError::Protocol(format!("no tab {tab}")))?;
        let (tx, rx) = mpsc::channel(PORT_CAPACITY);
        entry.frames.insert(frame, tx);
        log_info!("Frame {frame} of tab {tab} connected");
        Ok(rx)
    }

    pub fn deregister_frame(&self, tab: TabId, frame: FrameId) {
        if let Some(entry) = self.state().tabs.get_mut(&tab) {
            if entry.frames.remove(&frame).is_some() {
                log_info!("Frame {frame} of tab {tab} disconnected");
            }
        }
    }

    pub fn frames(&self, tab: TabId) -> Vec<FrameId> {
        self.state()
            .tabs
            .get(&tab)
            .map(|entry| entry.frames.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Posts `payload` to a frame. `None` when the frame has no live port.
    pub async fn send(
        &self,
        tab: TabId,
        frame: FrameId,
        payload: String,
    ) -> Option<(Uuid, oneshot::Receiver<String>)> {
        let port = {
            let state = self.state();
            state.tabs.get(&tab)?.frames.get(&frame)?.clone()
        };

        let id = Uuid::new_v4();
        let (reply, response) = oneshot::channel();
        port.send(Envelope { id, payload, reply }).await.ok()?;
        Some((id, response))
    }

    pub fn broadcast(&self, event: ReadingModeChanged) {
        // No listeners is fine.
        let _ = self.changes.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReadingModeChanged> {
        self.changes.subscribe()
    }
}
