use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::bridge::{MessageHub, SyncBridge, ToggleAck, PRIMARY_FRAME};
use crate::classifier::{classify, origin_of, HostCapabilities, PageCategory};
use crate::config::{SaccadeColor, SaccadeStyle};
use crate::db::SqliteBackend;
use crate::dom::Document;
use crate::error::ReaderError;
use crate::frame::FrameAgent;
use crate::prefs::{
    MemoryBackend, PartialPreferences, PreferenceStore, PreferenceUpdate, Scope, StorageBackend,
};
use crate::settings::{RuntimeSettings, SettingsStore};
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

#[derive(Parser, Debug)]
#[command(name = "jiffyreader", about = "Bionic reading overlay for (X)HTML documents")]
pub struct Cli {
    /// Directory holding the preference database and runtime settings
    #[arg(long, default_value = ".jiffyreader")]
    pub data_dir: PathBuf,

    /// Persistently allow transforming file:// pages
    #[arg(long, default_value_t = false)]
    pub allow_file_access: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Transform markup as if reading mode were switched on for URL
    Apply {
        #[arg(long)]
        url: String,
        /// Markup file; reads stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Inspect or edit stored preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
    /// Print the page category and origin of URL
    Classify { url: String },
}

#[derive(Subcommand, Debug)]
pub enum PrefsAction {
    Get {
        #[arg(long)]
        url: String,
    },
    Set(PrefsSetArgs),
}

#[derive(Args, Debug)]
pub struct PrefsSetArgs {
    #[arg(long)]
    pub url: String,
    /// global, local or reset
    #[arg(long, default_value = "global")]
    pub scope: String,
    #[arg(long)]
    pub fixation_strength: Option<u8>,
    #[arg(long)]
    pub saccades_interval: Option<u8>,
    #[arg(long)]
    pub edge_opacity: Option<u8>,
    #[arg(long)]
    pub color: Option<String>,
    #[arg(long)]
    pub style: Option<String>,
    #[arg(long)]
    pub line_height: Option<f32>,
    #[arg(long)]
    pub on_page_load: Option<bool>,
}

impl PrefsSetArgs {
    fn update(&self) -> Result<PreferenceUpdate> {
        let scope = Scope::parse(&self.scope)
            .ok_or_else(|| anyhow!("unknown scope '{}'", self.scope))?;
        let saccades_color = self
            .color
            .as_deref()
            .map(|value| {
                SaccadeColor::parse(value).ok_or_else(|| anyhow!("unknown color '{value}'"))
            })
            .transpose()?;
        let saccades_style = self
            .style
            .as_deref()
            .map(|value| {
                SaccadeStyle::parse(value).ok_or_else(|| anyhow!("unknown style '{value}'"))
            })
            .transpose()?;

        Ok(PreferenceUpdate::new(
            scope,
            PartialPreferences {
                saccades_interval: self.saccades_interval,
                fixation_strength: self.fixation_strength,
                fixation_edge_opacity: self.edge_opacity,
                saccades_color,
                saccades_style,
                line_height: self.line_height,
                on_page_load: self.on_page_load,
            },
        ))
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    let settings_store = SettingsStore::new(cli.data_dir.join("settings.json"))?;
    if cli.allow_file_access && !settings_store.current().file_access_granted {
        let mut next = settings_store.current();
        next.file_access_granted = true;
        settings_store.update(next)?;
        log_info!("File URL access granted");
    }
    let settings = settings_store.current();

    match cli.command {
        Command::Classify { url } => {
            let category = classify(&url, HostCapabilities::from(&settings));
            println!("{}\t{}", serde_json::to_string(&category)?, origin_of(&url));
            Ok(())
        }
        Command::Prefs { action } => {
            let store = open_store(&cli.data_dir);
            match action {
                PrefsAction::Get { url } => {
                    let effective = store.get(&origin_of(&url)).await;
                    if let Some(condition) = effective.condition {
                        log_warn!("Showing defaults: {condition:?}");
                    }
                    println!("{}", serde_json::to_string_pretty(&effective.prefs)?);
                    Ok(())
                }
                PrefsAction::Set(args) => {
                    let origin = origin_of(&args.url);
                    store.set(&origin, args.update()?).await?;
                    let effective = store.get(&origin).await;
                    println!("{}", serde_json::to_string_pretty(&effective.prefs)?);
                    Ok(())
                }
            }
        }
        Command::Apply { url, file } => {
            let markup = read_markup(file.as_ref())?;
            let store = open_store(&cli.data_dir);
            let transformed = apply_markup(&url, &markup, store, settings).await?;
            println!("{transformed}");
            Ok(())
        }
    }
}

/// Loads `markup` as the page at `url`, switches reading mode on through the
/// bridge, and returns the resulting markup.
pub async fn apply_markup(
    url: &str,
    markup: &str,
    store: PreferenceStore,
    settings: RuntimeSettings,
) -> Result<String> {
    match classify(url, HostCapabilities::from(&settings)) {
        PageCategory::Normal => {}
        PageCategory::Restricted => return Err(ReaderError::RestrictedPage(url.into()).into()),
        PageCategory::FileSystemUnauthorized => {
            return Err(ReaderError::FileSystemUnauthorized(url.into()).into())
        }
    }

    let document = Document::parse(markup).context("failed to parse markup")?;
    let hub = Arc::new(MessageHub::new());
    let tab = hub.open_tab(url);
    let mut agent = FrameAgent::new(hub.clone(), store, tab, PRIMARY_FRAME, document)
        .with_settings(settings.clone());
    agent.start().await?;

    let bridge = SyncBridge::new(hub, settings);
    let ack = bridge.toggle(tab, true).await;
    let output = agent.context().lock().await.document.to_markup();
    agent.stop().await;

    match ack {
        Ok(ToggleAck::Applied(true)) => Ok(output),
        Ok(other) => bail!("page did not switch on: {other:?}"),
        Err(err) => bail!("{err}"),
    }
}

fn open_store(data_dir: &std::path::Path) -> PreferenceStore {
    let backend: Arc<dyn StorageBackend> =
        match SqliteBackend::open(data_dir.join("jiffyreader.sqlite3")) {
            Ok(backend) => Arc::new(backend),
            Err(err) => {
                log_warn!("Preference database unavailable, using memory: {err:#}");
                Arc::new(MemoryBackend::new())
            }
        };
    PreferenceStore::new(backend)
}

fn read_markup(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut markup = String::new();
            std::io::stdin()
                .read_to_string(&mut markup)
                .context("failed to read markup from stdin")?;
            Ok(markup)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefs_set_flags() {
        let cli = Cli::try_parse_from([
            "jiffyreader",
            "prefs",
            "set",
            "--url",
            "https://example.com/x",
            "--scope",
            "local",
            "--fixation-strength",
            "3",
            "--color",
            "dark-100",
        ])
        .unwrap();
        let Command::Prefs {
            action: PrefsAction::Set(args),
        } = cli.command
        else {
            panic!("expected prefs set");
        };
        let update = args.update().unwrap();
        assert_eq!(update.scope, Scope::Local);
        assert_eq!(update.changes.fixation_strength, Some(3));
        assert_eq!(update.changes.saccades_color, Some(SaccadeColor::Dark100));
    }

    #[test]
    fn rejects_unknown_scope() {
        let args = PrefsSetArgs {
            url: "https://example.com".into(),
            scope: "everywhere".into(),
            fixation_strength: None,
            saccades_interval: None,
            edge_opacity: None,
            color: None,
            style: None,
            line_height: None,
            on_page_load: None,
        };
        assert!(args.update().is_err());
    }

    #[tokio::test]
    async fn apply_markup_transforms_and_refuses_restricted_pages() {
        let store = PreferenceStore::new(Arc::new(MemoryBackend::new()));
        let output = apply_markup(
            "https://example.com",
            "<p>Fast reading</p>",
            store.clone(),
            RuntimeSettings::default(),
        )
        .await
        .unwrap();
        assert!(output.contains("<br-fixation>Fa</br-fixation><br-edge>st</br-edge>"));

        let err = apply_markup(
            "chrome://settings",
            "<p>x</p>",
            store,
            RuntimeSettings::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReaderError>(),
            Some(ReaderError::RestrictedPage(_))
        ));
    }
}
