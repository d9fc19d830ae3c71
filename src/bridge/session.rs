use std::collections::HashMap;

use serde::Serialize;

use super::hub::{FrameId, TabId};

/// Reading-mode state of one frame as last acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Unknown,
    Off,
    On,
    /// The last request went unanswered.
    Unreachable,
}

impl SessionState {
    pub fn from_mode(enabled: bool) -> Self {
        if enabled {
            SessionState::On
        } else {
            SessionState::Off
        }
    }

    /// `Some` only for states confirmed by the frame.
    pub fn mode(&self) -> Option<bool> {
        match self {
            SessionState::On => Some(true),
            SessionState::Off => Some(false),
            SessionState::Unknown | SessionState::Unreachable => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    state: SessionState,
    generation: u64,
}

/// Per-(tab, frame) states, each stamped with the navigation generation it
/// was observed in. A stamp older than the tab's current generation reads
/// as `Unknown` and is evicted.
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: HashMap<(TabId, FrameId), CacheEntry>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, tab: TabId, frame: FrameId, generation: u64) -> SessionState {
        match self.entries.get(&(tab, frame)).copied() {
            Some(entry) if entry.generation == generation => entry.state,
            Some(_) => {
                self.entries.remove(&(tab, frame));
                SessionState::Unknown
            }
            None => SessionState::Unknown,
        }
    }

    pub fn record(&mut self, tab: TabId, frame: FrameId, generation: u64, state: SessionState) {
        if state == SessionState::Unknown {
            self.entries.remove(&(tab, frame));
        } else {
            self.entries
                .insert((tab, frame), CacheEntry { state, generation });
        }
    }

    pub fn forget_tab(&mut self, tab: TabId) {
        self.entries.retain(|(entry_tab, _), _| *entry_tab != tab);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
