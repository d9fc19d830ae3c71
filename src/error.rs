//! Error and condition types shared across the store, bridge and transformer.
//!
//! `ReaderError` is what the core returns internally. `UserCondition` is the
//! typed, user-facing form the popup renders; every `ReaderError` is folded
//! into one of them at the boundary nearest its origin.

use serde::Serialize;
use thiserror::Error;

use crate::dom::NodeId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReaderError {
    #[error("preference store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("no acknowledgment from tab {tab} within {timeout_ms}ms")]
    Unreachable { tab: u32, timeout_ms: u64 },

    #[error("page is restricted: {0}")]
    RestrictedPage(String),

    #[error("file access not granted for {0}")]
    FileSystemUnauthorized(String),

    #[error("skipped node {node:?}: {reason}")]
    TransformNodeSkipped { node: NodeId, reason: String },

    #[error("invalid preference {field}: {reason}")]
    InvalidPreference { field: &'static str, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ReaderError>;

impl ReaderError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(err.to_string())
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPreference {
            field,
            reason: reason.into(),
        }
    }

    pub fn skipped(node: NodeId, reason: impl Into<String>) -> Self {
        Self::TransformNodeSkipped {
            node,
            reason: reason.into(),
        }
    }

    /// The user-facing condition this error surfaces as, if any.
    /// Skipped nodes and invalid inputs are local concerns and never reach the UI.
    pub fn condition(&self) -> Option<UserCondition> {
        match self {
            Self::StoreUnavailable(_) => Some(UserCondition::StoreUnavailable),
            Self::Unreachable { .. } | Self::Protocol(_) => Some(UserCondition::PageNotDetected),
            Self::RestrictedPage(_) => Some(UserCondition::PageNotSupported),
            Self::FileSystemUnauthorized(_) => Some(UserCondition::FileAccessRequired),
            Self::TransformNodeSkipped { .. } | Self::InvalidPreference { .. } => None,
        }
    }
}

/// Conditions the settings popup can show instead of its controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UserCondition {
    /// Internal or store page the extension cannot script.
    PageNotSupported,
    /// The document context never answered; a reload usually fixes it.
    PageNotDetected,
    /// Local file opened without the "allow access to file URLs" grant.
    FileAccessRequired,
    /// Preferences could not be read; defaults are in effect.
    StoreUnavailable,
}

impl UserCondition {
    /// Short remediation hint, if the condition has one.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::PageNotSupported => None,
            Self::PageNotDetected => Some("reload the page"),
            Self::FileAccessRequired => {
                Some("open the extension page, allow access to file URLs, then reload")
            }
            Self::StoreUnavailable => Some("preferences will be saved once storage recovers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_nodes_never_surface() {
        let err = ReaderError::skipped(NodeId::from_raw(3), "detached");
        assert_eq!(err.condition(), None);
    }

    #[test]
    fn unreachable_surfaces_as_not_detected() {
        let err = ReaderError::Unreachable {
            tab: 1,
            timeout_ms: 500,
        };
        assert_eq!(err.condition(), Some(UserCondition::PageNotDetected));
        assert_eq!(
            UserCondition::PageNotDetected.remediation(),
            Some("reload the page")
        );
    }
}
