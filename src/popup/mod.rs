//! Controller context behind the settings popup.
//!
//! `open` resolves the active tab and returns what the popup should render;
//! every other call is one user action. The tab session only changes on an
//! acknowledged toggle or a `ReadingModeChanged` broadcast for this tab.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::{BridgeError, MessageHub, SyncBridge, TabId, ToggleAck};
use crate::classifier::origin_of;
use crate::config::{SaccadeColor, SaccadeStyle, LINE_HEIGHT_STEP};
use crate::dom::Document;
use crate::error::{ReaderError, Result, UserCondition};
use crate::prefs::{
    AppConfig, EffectivePreferences, PartialPreferences, PreferenceField, PreferenceStore,
    PreferenceUpdate, Preferences, Scope,
};
use crate::transform::DocumentTransformer;
use crate::{log_debug, log_info};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSession {
    pub br_mode: bool,
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PopupView {
    Ready {
        session: TabSession,
        prefs: EffectivePreferences,
        app: AppConfig,
    },
    Error(UserCondition),
}

/// One control in the popup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PreferenceEdit {
    SaccadesInterval(u8),
    FixationStrength(u8),
    FixationEdgeOpacity(u8),
    SaccadesColor(SaccadeColor),
    SaccadesStyle(SaccadeStyle),
    LineHeight(f32),
    OnPageLoad(bool),
}

impl PreferenceEdit {
    pub fn field(&self) -> PreferenceField {
        match self {
            PreferenceEdit::SaccadesInterval(_) => PreferenceField::SaccadesInterval,
            PreferenceEdit::FixationStrength(_) => PreferenceField::FixationStrength,
            PreferenceEdit::FixationEdgeOpacity(_) => PreferenceField::FixationEdgeOpacity,
            PreferenceEdit::SaccadesColor(_) => PreferenceField::SaccadesColor,
            PreferenceEdit::SaccadesStyle(_) => PreferenceField::SaccadesStyle,
            PreferenceEdit::LineHeight(_) => PreferenceField::LineHeight,
            PreferenceEdit::OnPageLoad(_) => PreferenceField::OnPageLoad,
        }
    }

    fn into_partial(self) -> PartialPreferences {
        let mut partial = PartialPreferences::default();
        match self {
            PreferenceEdit::SaccadesInterval(v) => partial.saccades_interval = Some(v),
            PreferenceEdit::FixationStrength(v) => partial.fixation_strength = Some(v),
            PreferenceEdit::FixationEdgeOpacity(v) => partial.fixation_edge_opacity = Some(v),
            PreferenceEdit::SaccadesColor(v) => partial.saccades_color = Some(v),
            PreferenceEdit::SaccadesStyle(v) => partial.saccades_style = Some(v),
            PreferenceEdit::LineHeight(v) => partial.line_height = Some(v),
            PreferenceEdit::OnPageLoad(v) => partial.on_page_load = Some(v),
        }
        partial
    }
}

#[derive(Debug, Default)]
struct PopupState {
    tab: Option<TabId>,
    session: Option<TabSession>,
    prefs: Preferences,
    app: AppConfig,
}

struct Listener {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PopupController {
    hub: Arc<MessageHub>,
    bridge: Arc<SyncBridge>,
    store: PreferenceStore,
    state: Arc<Mutex<PopupState>>,
    listener: Option<Listener>,
}

impl PopupController {
    pub fn new(bridge: Arc<SyncBridge>, store: PreferenceStore) -> Self {
        Self {
            hub: bridge.hub().clone(),
            bridge,
            store,
            state: Arc::new(Mutex::new(PopupState::default())),
            listener: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, PopupState> {
        lock(&self.state)
    }

    pub fn session(&self) -> Option<TabSession> {
        self.state().session.clone()
    }

    pub fn prefs(&self) -> Preferences {
        self.state().prefs.clone()
    }

    pub async fn open(&mut self) -> PopupView {
        let Some(tab) = self.hub.active_tab() else {
            return PopupView::Error(UserCondition::PageNotDetected);
        };
        let origin = origin_of(&self.hub.tab_url(tab).unwrap_or_default());
        let prefs = self.store.get(&origin).await;
        let app = self.store.app_config().await;

        {
            let mut state = self.state();
            state.tab = Some(tab);
            state.prefs = prefs.prefs.clone();
            state.app = app.clone();
            state.session = None;
        }
        self.listen(tab);

        match self.bridge.query(tab).await {
            Ok(br_mode) => {
                let session = TabSession { br_mode, origin };
                self.state().session = Some(session.clone());
                PopupView::Ready {
                    session,
                    prefs,
                    app,
                }
            }
            Err(err) => {
                log_info!("Popup opened on an unavailable tab: {err}");
                PopupView::Error(err.condition())
            }
        }
    }

    /// Flips reading mode on the active tab. Resolves to the acknowledged state.
    pub async fn toggle_reading_mode(&self) -> std::result::Result<bool, BridgeError> {
        let (tab, current) = {
            let state = self.state();
            match (state.tab, state.session.as_ref()) {
                (Some(tab), Some(session)) => (tab, session.br_mode),
                _ => return Err(BridgeError::PageNotDetected),
            }
        };

        let enabled = match self.bridge.toggle(tab, !current).await? {
            ToggleAck::Applied(enabled) => enabled,
            ToggleAck::Rejected => self.bridge.query(tab).await?,
        };
        if let Some(session) = self.state().session.as_mut() {
            session.br_mode = enabled;
        }
        Ok(enabled)
    }

    /// Applies one control change to the scope the popup currently shows.
    pub async fn update(&self, edit: PreferenceEdit) -> Result<Preferences> {
        let origin = self.origin()?;
        let scope = match self.state().prefs.scope {
            Scope::Local => Scope::Local,
            Scope::Global | Scope::Reset => Scope::Global,
        };
        log_debug!("Updating {:?} ({})", edit.field(), scope.as_str());
        self.store
            .set(&origin, PreferenceUpdate::new(scope, edit.into_partial()))
            .await?;
        self.reload(&origin).await
    }

    /// `Local` snapshots the shown values into a site override, `Global`
    /// makes them the global profile and drops the override, `Reset` drops
    /// the override alone.
    pub async fn set_scope(&self, scope: Scope) -> Result<Preferences> {
        let origin = self.origin()?;
        let update = match scope {
            Scope::Local | Scope::Global => {
                PreferenceUpdate::new(scope, PartialPreferences::from(&self.prefs()))
            }
            Scope::Reset => PreferenceUpdate::reset(),
        };
        self.store.set(&origin, update).await?;
        self.reload(&origin).await
    }

    pub async fn reset(&self) -> Result<Preferences> {
        self.set_scope(Scope::Reset).await
    }

    pub async fn increase_line_height(&self) -> Result<Preferences> {
        let next = self.prefs().line_height + LINE_HEIGHT_STEP;
        self.update(PreferenceEdit::LineHeight(next)).await
    }

    pub async fn decrease_line_height(&self) -> Result<Preferences> {
        let next = self.prefs().line_height - LINE_HEIGHT_STEP;
        self.update(PreferenceEdit::LineHeight(next)).await
    }

    pub async fn toggle_on_page_load(&self) -> Result<Preferences> {
        let next = !self.prefs().on_page_load;
        self.update(PreferenceEdit::OnPageLoad(next)).await
    }

    pub async fn toggle_display_color_mode(&self) -> Result<AppConfig> {
        let app = self.store.toggle_display_color_mode().await?;
        self.state().app = app.clone();
        Ok(app)
    }

    pub async fn toggle_control_panel_text(&self) -> Result<AppConfig> {
        let app = self.store.toggle_control_panel_text().await?;
        self.state().app = app.clone();
        Ok(app)
    }

    /// Markup for a popup label: escaped text, or text rendered with the
    /// reading effect when the app config asks for it.
    pub fn label(&self, text: &str) -> String {
        let (app, prefs) = {
            let state = self.state();
            (state.app.clone(), state.prefs.clone())
        };

        let mut doc = Document::new();
        let root = doc.root();
        let span = doc.create_element("span");
        let node = doc.create_text(text);
        if doc
            .append_child(span, node)
            .and_then(|()| doc.append_child(root, span))
            .is_err()
        {
            return doc.node_markup(node);
        }

        if app.transform_control_panel_text {
            DocumentTransformer::new().apply(&mut doc, &prefs);
        }
        doc.children(span)
            .iter()
            .map(|child| doc.node_markup(*child))
            .collect()
    }

    /// Fields currently at their recommended value.
    pub fn optimal_fields(&self) -> Vec<PreferenceField> {
        let prefs = self.prefs();
        PreferenceField::ALL
            .into_iter()
            .filter(|field| prefs.is_optimal(*field))
            .collect()
    }

    pub async fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.token.cancel();
            let _ = listener.handle.await;
        }
    }

    fn origin(&self) -> Result<String> {
        self.state()
            .session
            .as_ref()
            .map(|session| session.origin.clone())
            .ok_or_else(|| ReaderError::Protocol("popup has no open tab".into()))
    }

    async fn reload(&self, origin: &str) -> Result<Preferences> {
        let effective = self.store.get(origin).await;
        if effective.is_degraded() {
            return Err(ReaderError::StoreUnavailable(
                "preferences could not be re-read".into(),
            ));
        }
        self.state().prefs = effective.prefs.clone();
        Ok(effective.prefs)
    }

    fn listen(&mut self, tab: TabId) {
        if let Some(previous) = self.listener.take() {
            previous.token.cancel();
        }

        let mut changes = self.hub.subscribe();
        let state = self.state.clone();
        let token = CancellationToken::new();
        let cancel = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(event) if event.tab == tab => {
                            if let Some(session) = lock(&state).session.as_mut() {
                                session.br_mode = event.data;
                            }
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        self.listener = Some(Listener { token, handle });
    }
}

impl Drop for PopupController {
    fn drop(&mut self) {
        if let Some(listener) = &self.listener {
            listener.token.cancel();
        }
    }
}

fn lock(state: &Mutex<PopupState>) -> MutexGuard<'_, PopupState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{protocol::ReadingModeChanged, PRIMARY_FRAME};
    use crate::dom::Document;
    use crate::frame::FrameAgent;
    use crate::prefs::MemoryBackend;
    use crate::settings::RuntimeSettings;

    struct Harness {
        hub: Arc<MessageHub>,
        store: PreferenceStore,
        popup: PopupController,
        agent: Option<FrameAgent>,
    }

    async fn harness(url: &str, with_frame: bool) -> Harness {
        let hub = Arc::new(MessageHub::new());
        let tab = hub.open_tab(url);
        let store = PreferenceStore::new(Arc::new(MemoryBackend::new()));
        let agent = if with_frame {
            let document = Document::parse("<p>Popup driven page</p>").unwrap();
            let mut agent = FrameAgent::new(hub.clone(), store.clone(), tab, PRIMARY_FRAME, document);
            agent.start().await.unwrap();
            Some(agent)
        } else {
            None
        };
        let bridge = Arc::new(SyncBridge::new(hub.clone(), RuntimeSettings::default()));
        let popup = PopupController::new(bridge, store.clone());
        Harness {
            hub,
            store,
            popup,
            agent,
        }
    }

    #[tokio::test]
    async fn open_then_toggle() {
        let mut h = harness("https://example.com/a", true).await;
        match h.popup.open().await {
            PopupView::Ready { session, prefs, .. } => {
                assert!(!session.br_mode);
                assert_eq!(session.origin, "https://example.com");
                assert_eq!(prefs.prefs, Preferences::default());
            }
            other => panic!("unexpected view {other:?}"),
        }

        assert_eq!(h.popup.toggle_reading_mode().await, Ok(true));
        assert_eq!(h.popup.session().map(|s| s.br_mode), Some(true));
        assert_eq!(h.popup.toggle_reading_mode().await, Ok(false));

        h.popup.close().await;
        if let Some(mut agent) = h.agent.take() {
            agent.stop().await;
        }
    }

    #[tokio::test]
    async fn restricted_tabs_render_an_error() {
        let mut h = harness("chrome://extensions", false).await;
        assert_eq!(
            h.popup.open().await,
            PopupView::Error(UserCondition::PageNotSupported)
        );
        assert!(h.popup.update(PreferenceEdit::FixationStrength(3)).await.is_err());
    }

    #[tokio::test]
    async fn scope_switches_and_edits() {
        let mut h = harness("https://example.com", true).await;
        h.popup.open().await;

        let local = h.popup.set_scope(Scope::Local).await.unwrap();
        assert_eq!(local.scope, Scope::Local);

        let edited = h.popup.update(PreferenceEdit::FixationStrength(4)).await.unwrap();
        assert_eq!(edited.fixation_strength, 4);
        assert_eq!(
            h.store.get("https://elsewhere.org").await.prefs.fixation_strength,
            2
        );
        assert!(!h.popup.optimal_fields().contains(&PreferenceField::FixationStrength));

        let taller = h.popup.increase_line_height().await.unwrap();
        assert_eq!(taller.line_height, 1.5);
        let shorter = h.popup.decrease_line_height().await.unwrap();
        assert_eq!(shorter.line_height, 1.0);
        assert_eq!(h.popup.decrease_line_height().await.unwrap().line_height, 1.0);

        assert!(h.popup.toggle_on_page_load().await.unwrap().on_page_load);

        let reset = h.popup.reset().await.unwrap();
        assert_eq!(reset, Preferences::default());

        h.popup.close().await;
        if let Some(mut agent) = h.agent.take() {
            agent.stop().await;
        }
    }

    #[tokio::test]
    async fn global_scope_promotes_the_shown_values() {
        let mut h = harness("https://example.com", true).await;
        h.popup.open().await;

        h.popup.set_scope(Scope::Local).await.unwrap();
        h.popup.update(PreferenceEdit::FixationStrength(4)).await.unwrap();

        let global = h.popup.set_scope(Scope::Global).await.unwrap();
        assert_eq!(global.fixation_strength, 4);
        assert_eq!(global.scope, Scope::Global);
        assert_eq!(
            h.store.get("https://elsewhere.org").await.prefs.fixation_strength,
            4
        );

        h.popup.close().await;
        if let Some(mut agent) = h.agent.take() {
            agent.stop().await;
        }
    }

    #[tokio::test]
    async fn labels_follow_the_control_panel_setting() {
        let mut h = harness("https://example.com", true).await;
        h.popup.open().await;
        assert_eq!(h.popup.label("Line & height"), "Line &amp; height");

        let app = h.popup.toggle_control_panel_text().await.unwrap();
        assert!(app.transform_control_panel_text);
        assert_eq!(h.store.app_config().await, app);
        assert_eq!(
            h.popup.label("Line height"),
            "<br-span><br-fixation>Li</br-fixation><br-edge>ne</br-edge> \
             <br-fixation>he</br-fixation><br-edge>ight</br-edge></br-span>"
        );

        h.popup.close().await;
        if let Some(mut agent) = h.agent.take() {
            agent.stop().await;
        }
    }

    #[tokio::test]
    async fn broadcasts_for_the_tab_update_the_session() {
        let mut h = harness("https://example.com", true).await;
        h.popup.open().await;
        let tab = h.hub.active_tab().unwrap();

        h.hub.broadcast(ReadingModeChanged::new(tab + 1, true));
        h.hub.broadcast(ReadingModeChanged::new(tab, true));

        let mut seen = false;
        for _ in 0..50 {
            if h.popup.session().map(|s| s.br_mode) == Some(true) {
                seen = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(seen);

        h.popup.close().await;
        if let Some(mut agent) = h.agent.take() {
            agent.stop().await;
        }
    }

    #[tokio::test]
    async fn color_mode_round_trips_through_the_store() {
        let h = harness("https://example.com", false).await;
        let dark = h.popup.toggle_display_color_mode().await.unwrap();
        assert_eq!(h.store.app_config().await, dark);
    }
}
