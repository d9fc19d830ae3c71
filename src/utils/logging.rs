//! Module-gated logging macros on top of the `log` facade.
//!
//! A module opts in by defining the flag before using the macros:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn};
//!
//! log_info!("frame {} attached", frame_id);
//! ```
//!
//! `log_debug!` is additionally gated on debug mode (`JIFFY_DEBUG=1`), so
//! per-node chatter from the transformer stays out of normal runs even
//! when `RUST_LOG=debug` is set for other crates.

use std::sync::OnceLock;

static DEBUG_MODE: OnceLock<bool> = OnceLock::new();

/// True when `JIFFY_DEBUG` is `1` or `true` (case-insensitive).
pub fn debug_mode() -> bool {
    *DEBUG_MODE.get_or_init(|| {
        std::env::var("JIFFY_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}

/// Installs the `env_logger` backend. Reads `RUST_LOG`; falls back to
/// `info`, or `debug` in debug mode. Safe to call more than once.
pub fn init() {
    let default_level = if debug_mode() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .try_init();
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS && $crate::utils::logging::debug_mode() {
            log::debug!($($arg)*);
        }
    };
}
