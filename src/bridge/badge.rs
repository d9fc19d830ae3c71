use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::hub::{MessageHub, TabId};
use crate::log_debug;

const ENABLE_LOGS: bool = true;

pub const BADGE_ON: &str = "On";

pub fn badge_text(enabled: bool) -> &'static str {
    if enabled {
        BADGE_ON
    } else {
        ""
    }
}

#[derive(Debug, Default)]
struct BadgeState {
    texts: HashMap<TabId, &'static str>,
    updates: usize,
}

/// Toolbar badge: mirrors `ReadingModeChanged` broadcasts into per-tab text.
pub struct BadgeIndicator {
    state: Arc<Mutex<BadgeState>>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BadgeIndicator {
    pub fn spawn(hub: &MessageHub) -> Self {
        let mut changes = hub.subscribe();
        let state = Arc::new(Mutex::new(BadgeState::default()));
        let token = CancellationToken::new();

        let task_state = state.clone();
        let cancel = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(event) => {
                            let text = badge_text(event.data);
                            let mut state = lock(&task_state);
                            if state.texts.get(&event.tab) == Some(&text) {
                                continue;
                            }
                            state.texts.insert(event.tab, text);
                            state.updates += 1;
                            log_debug!("Badge for tab {} set to {text:?}", event.tab);
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        Self {
            state,
            token,
            handle: Some(handle),
        }
    }

    pub fn text(&self, tab: TabId) -> &'static str {
        lock(&self.state).texts.get(&tab).copied().unwrap_or("")
    }

    /// Number of times any badge actually changed.
    pub fn updates(&self) -> usize {
        lock(&self.state).updates
    }

    pub fn clear(&self, tab: TabId) {
        lock(&self.state).texts.remove(&tab);
    }

    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for BadgeIndicator {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn lock(state: &Mutex<BadgeState>) -> MutexGuard<'_, BadgeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
