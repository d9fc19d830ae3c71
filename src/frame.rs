//! Document-side agent: one per frame of a tab.
//!
//! The agent owns the frame's `FrameContext` (document plus transformer)
//! behind a single async mutex, and runs three tasks while started: the
//! request loop on the frame's hub port, the mutation watcher, and a
//! preference watch for the frame's origin.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::{decode, encode, ContentMessage, ReadingModeReply, ToggleReply};
use crate::bridge::{FrameId, FramePort, MessageHub, TabId};
use crate::classifier::origin_of;
use crate::dom::Document;
use crate::error::Result;
use crate::prefs::{PreferenceStore, PreferenceWatch, Preferences};
use crate::settings::RuntimeSettings;
use crate::transform::watcher::{coalesce, edited_wrappers};
use crate::transform::{DocumentTransformer, MutationWatcher, PassReport};
use crate::{log_debug, log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// A frame's document together with the transformer that owns its overlay.
#[derive(Debug)]
pub struct FrameContext {
    pub document: Document,
    pub transformer: DocumentTransformer,
}

impl FrameContext {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            transformer: DocumentTransformer::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.transformer.is_active()
    }

    /// Turns the overlay on. The pass's own writes are dropped from the
    /// mutation log so the watcher never sees them.
    pub fn enable(&mut self, prefs: &Preferences) -> PassReport {
        let report = self.transformer.apply(&mut self.document, prefs);
        self.document.take_mutations();
        report
    }

    pub fn disable(&mut self) -> usize {
        self.absorb_page_edits();
        let restored = self.transformer.revert(&mut self.document);
        self.document.take_mutations();
        restored
    }

    /// Switches the overlay using the transformer's current preferences.
    pub fn set_reading_mode(&mut self, enabled: bool) -> bool {
        if enabled {
            if self.transformer.is_active() {
                return true;
            }
            let prefs = self.transformer.prefs().clone();
            let report = self.enable(&prefs);
            if !report.skipped.is_empty() {
                log_warn!("{} nodes skipped while enabling", report.skipped.len());
            }
        } else {
            self.disable();
        }
        true
    }

    pub fn refresh(&mut self, prefs: &Preferences) -> PassReport {
        self.absorb_page_edits();
        let report = self.transformer.refresh(&mut self.document, prefs);
        self.document.take_mutations();
        report
    }

    /// Processes page-side mutations recorded since the last drain.
    /// `None` when there was nothing to reprocess.
    pub fn reapply_pending(&mut self) -> Option<PassReport> {
        let mutations = self.document.take_mutations();
        if mutations.is_empty() || !self.transformer.is_active() {
            return None;
        }

        let edited = edited_wrappers(&self.document, &mutations);
        let roots = coalesce(&self.document, mutations);
        if roots.is_empty() && edited.is_empty() {
            return None;
        }

        let mut report = PassReport::default();
        for wrapper in edited {
            report.merge(self.transformer.resync(&mut self.document, wrapper));
        }
        for root in roots {
            report.merge(self.transformer.apply_subtree(&mut self.document, root));
        }
        self.document.take_mutations();
        Some(report)
    }

    /// Folds unprocessed page edits inside wrappers into their marks before
    /// the overlay is torn down. Other pending records need no pass: a
    /// refresh re-applies the whole document and a disable drops the overlay.
    fn absorb_page_edits(&mut self) {
        let pending = self.document.take_mutations();
        if !self.transformer.is_active() {
            return;
        }
        for wrapper in edited_wrappers(&self.document, &pending) {
            self.transformer.resync(&mut self.document, wrapper);
        }
    }
}

struct Running {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    watcher: MutationWatcher,
    preferences: PreferenceWatch,
}

pub struct FrameAgent {
    hub: Arc<MessageHub>,
    store: PreferenceStore,
    settings: RuntimeSettings,
    tab: TabId,
    frame: FrameId,
    origin: String,
    context: Arc<Mutex<FrameContext>>,
    notify: Arc<Notify>,
    running: Option<Running>,
}

impl FrameAgent {
    pub fn new(
        hub: Arc<MessageHub>,
        store: PreferenceStore,
        tab: TabId,
        frame: FrameId,
        document: Document,
    ) -> Self {
        let origin = origin_of(&hub.tab_url(tab).unwrap_or_default());
        Self {
            hub,
            store,
            settings: RuntimeSettings::from_env(),
            tab,
            frame,
            origin,
            context: Arc::new(Mutex::new(FrameContext::new(document))),
            notify: Arc::new(Notify::new()),
            running: None,
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn context(&self) -> Arc<Mutex<FrameContext>> {
        self.context.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn mutation_passes(&self) -> usize {
        self.running
            .as_ref()
            .map(|running| running.watcher.passes())
            .unwrap_or(0)
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let port = self.hub.register_frame(self.tab, self.frame)?;
        let effective = self.store.get(&self.origin).await;

        {
            let mut context = self.context.lock().await;
            context.document.observe(self.notify.clone());
            if effective.prefs.on_page_load {
                let report = context.enable(&effective.prefs);
                log_info!(
                    "Applied on load for {} ({} nodes)",
                    self.origin,
                    report.transformed
                );
            } else {
                context.refresh(&effective.prefs);
            }
        }

        let token = CancellationToken::new();
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(serve(
            port,
            self.context.clone(),
            token.clone(),
        )));

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let preferences = self.store.watch(&self.origin, move |effective| {
            let _ = updates_tx.send(effective);
        });
        tasks.push(tokio::spawn(follow_preferences(
            updates_rx,
            self.context.clone(),
            token.clone(),
        )));

        let watcher = MutationWatcher::spawn(
            self.context.clone(),
            self.notify.clone(),
            self.settings.mutation_debounce(),
        );

        self.running = Some(Running {
            token,
            tasks,
            watcher,
            preferences,
        });
        log_debug!("Frame {} of tab {} started", self.frame, self.tab);
        Ok(())
    }

    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.token.cancel();
        running.preferences.stop().await;
        running.watcher.stop().await;
        for task in running.tasks {
            let _ = task.await;
        }

        self.hub.deregister_frame(self.tab, self.frame);
        self.context.lock().await.document.disconnect();
        log_debug!("Frame {} of tab {} stopped", self.frame, self.tab);
    }
}

/// Request loop. Every request gets exactly one reply.
async fn serve(mut port: FramePort, context: Arc<Mutex<FrameContext>>, token: CancellationToken) {
    loop {
        let envelope = tokio::select! {
            _ = token.cancelled() => break,
            envelope = port.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let reply = handle_request(&context, &envelope.payload).await;
        if envelope.reply.send(reply).is_err() {
            log_debug!("Requester for {} went away before the reply", envelope.id);
        }
    }
}

async fn handle_request(context: &Mutex<FrameContext>, payload: &str) -> String {
    match decode::<ContentMessage>(payload) {
        Ok(ContentMessage::GetReadingMode) => {
            let data = context.lock().await.is_active();
            reply(&ReadingModeReply { data })
        }
        Ok(ContentMessage::SetReadingMode { data }) => {
            let ok = context.lock().await.set_reading_mode(data);
            reply(&ToggleReply { ok })
        }
        Err(err) => {
            log_warn!("Unrecognised request: {err}");
            reply(&ToggleReply { ok: false })
        }
    }
}

fn reply<T: Serialize>(message: &T) -> String {
    encode(message).unwrap_or_else(|_| r#"{"ok":false}"#.to_string())
}

async fn follow_preferences(
    mut updates: mpsc::UnboundedReceiver<crate::prefs::EffectivePreferences>,
    context: Arc<Mutex<FrameContext>>,
    token: CancellationToken,
) {
    loop {
        let effective = tokio::select! {
            _ = token.cancelled() => break,
            update = updates.recv() => match update {
                Some(effective) => effective,
                None => break,
            },
        };

        if effective.is_degraded() {
            log_warn!("Ignoring preference update while the store is unavailable");
            continue;
        }
        let report = context.lock().await.refresh(&effective.prefs);
        log_debug!("Preferences refreshed ({} nodes)", report.transformed);
    }
}
