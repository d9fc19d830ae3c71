//! JSON messages exchanged between the controller and document frames.

use serde::{Deserialize, Serialize};

use super::hub::TabId;
use crate::error::{ReaderError, Result};

pub const BADGE_MESSAGE: &str = "setIconBadgeText";

/// Requests a frame understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentMessage {
    GetReadingMode,
    SetReadingMode { data: bool },
}

/// Reply to `getReadingMode`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadingModeReply {
    pub data: bool,
}

/// Reply to `setReadingMode`. Sent even when applying failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleReply {
    pub ok: bool,
}

/// Fan-out notification after an acknowledged toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadingModeChanged {
    pub message: String,
    pub data: bool,
    pub tab: TabId,
}

impl ReadingModeChanged {
    pub fn new(tab: TabId, enabled: bool) -> Self {
        Self {
            message: BADGE_MESSAGE.to_string(),
            data: enabled,
            tab,
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    serde_json::to_string(message).map_err(|err| ReaderError::Protocol(err.to_string()))
}

pub fn decode<'a, T: Deserialize<'a>>(payload: &'a str) -> Result<T> {
    serde_json::from_str(payload)
        .map_err(|err| ReaderError::Protocol(format!("{err} in {payload}")))
}
