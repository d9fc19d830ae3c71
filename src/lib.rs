pub mod bridge;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod db;
pub mod dom;
pub mod error;
pub mod frame;
pub mod popup;
pub mod prefs;
pub mod settings;
pub mod transform;
pub mod utils;

use clap::Parser;

pub use bridge::{BadgeIndicator, MessageHub, SyncBridge};
pub use error::{ReaderError, UserCondition};
pub use frame::FrameAgent;
pub use popup::PopupController;
pub use prefs::{PreferenceStore, Preferences};

pub fn run() -> anyhow::Result<()> {
    utils::logging::init();

    let cli = cli::Cli::parse();
    log::debug!("JiffyReader starting: {:?}", cli.command);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli::execute(cli))
}
