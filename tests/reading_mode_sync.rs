use std::sync::Arc;
use std::time::Duration;

use jiffyreader_lib::bridge::{BridgeError, SessionState, ToggleAck, PRIMARY_FRAME};
use jiffyreader_lib::db::SqliteBackend;
use jiffyreader_lib::dom::Document;
use jiffyreader_lib::error::UserCondition;
use jiffyreader_lib::prefs::{MemoryBackend, PartialPreferences, PreferenceUpdate, Scope};
use jiffyreader_lib::settings::RuntimeSettings;
use jiffyreader_lib::{BadgeIndicator, FrameAgent, MessageHub, PreferenceStore, SyncBridge};

const PAGE: &str = "<html><body><h1>Reading mode</h1>\
<p>The quick brown fox jumps over the lazy dog.</p>\
<ul><li>first item</li><li>second item</li></ul>\
<pre><script>let untouched = true;</script></pre></body></html>";

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        query_timeout_ms: 200,
        mutation_debounce_ms: 10,
        ..RuntimeSettings::default()
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test]
async fn toggling_on_off_on_is_byte_identical() {
    let hub = Arc::new(MessageHub::new());
    let tab = hub.open_tab("https://news.example.com/story");
    let store = PreferenceStore::new(Arc::new(MemoryBackend::new()));
    let document = Document::parse(PAGE).unwrap();
    let original = document.to_markup();

    let mut agent = FrameAgent::new(hub.clone(), store, tab, PRIMARY_FRAME, document)
        .with_settings(settings());
    agent.start().await.unwrap();
    let bridge = SyncBridge::new(hub.clone(), settings());
    let context = agent.context();

    assert_eq!(bridge.toggle(tab, true).await, Ok(ToggleAck::Applied(true)));
    let first_on = context.lock().await.document.to_markup();
    assert_ne!(first_on, original);
    assert!(first_on.contains("let untouched = true;"));

    assert_eq!(bridge.toggle(tab, false).await, Ok(ToggleAck::Applied(false)));
    assert_eq!(context.lock().await.document.to_markup(), original);

    assert_eq!(bridge.toggle(tab, true).await, Ok(ToggleAck::Applied(true)));
    assert_eq!(context.lock().await.document.to_markup(), first_on);
    assert_eq!(bridge.query(tab).await, Ok(true));

    agent.stop().await;
}

#[tokio::test]
async fn stopped_frame_is_not_reported_as_live() {
    let hub = Arc::new(MessageHub::new());
    let tab = hub.open_tab("https://example.com");
    let store = PreferenceStore::new(Arc::new(MemoryBackend::new()));
    let mut agent = FrameAgent::new(
        hub.clone(),
        store,
        tab,
        PRIMARY_FRAME,
        Document::parse("<p>short lived</p>").unwrap(),
    )
    .with_settings(settings());
    agent.start().await.unwrap();
    let bridge = SyncBridge::new(hub.clone(), settings());

    assert_eq!(bridge.toggle(tab, true).await, Ok(ToggleAck::Applied(true)));
    agent.stop().await;
    assert!(hub.frames(tab).is_empty());

    assert_eq!(bridge.query(tab).await, Err(BridgeError::PageNotDetected));
    assert_eq!(bridge.cached(tab), SessionState::Unreachable);
}

#[tokio::test]
async fn page_mutations_are_picked_up_while_on() {
    let hub = Arc::new(MessageHub::new());
    let tab = hub.open_tab("https://example.com");
    let store = PreferenceStore::new(Arc::new(MemoryBackend::new()));
    let mut agent = FrameAgent::new(
        hub.clone(),
        store,
        tab,
        PRIMARY_FRAME,
        Document::parse(PAGE).unwrap(),
    )
    .with_settings(settings());
    agent.start().await.unwrap();
    let bridge = SyncBridge::new(hub, settings());
    bridge.toggle(tab, true).await.unwrap();

    let context = agent.context();
    {
        let mut guard = context.lock().await;
        let body = guard.document.children(guard.document.document_element())[0];
        for line in ["late paragraph one", "late paragraph two"] {
            let paragraph = guard.document.create_element("p");
            let text = guard.document.create_text(line);
            guard.document.append_child(paragraph, text).unwrap();
            guard.document.append_child(body, paragraph).unwrap();
        }
    }

    let picked_up = wait_until(|| agent.mutation_passes() >= 1).await;
    assert!(picked_up);
    let markup = context.lock().await.document.to_markup();
    assert!(markup.contains("<br-fixation>la</br-fixation><br-edge>te</br-edge>"));
    agent.stop().await;
}

#[tokio::test]
async fn badge_follows_acknowledged_toggles() {
    let hub = Arc::new(MessageHub::new());
    let badge = BadgeIndicator::spawn(&hub);
    let tab = hub.open_tab("https://example.com");
    let store = PreferenceStore::new(Arc::new(MemoryBackend::new()));
    let mut agent = FrameAgent::new(
        hub.clone(),
        store,
        tab,
        PRIMARY_FRAME,
        Document::parse("<p>badge me</p>").unwrap(),
    )
    .with_settings(settings());
    agent.start().await.unwrap();
    let bridge = SyncBridge::new(hub.clone(), settings());

    bridge.toggle(tab, true).await.unwrap();
    assert!(wait_until(|| badge.text(tab) == "On").await);
    bridge.toggle(tab, false).await.unwrap();
    assert!(wait_until(|| badge.text(tab).is_empty()).await);

    agent.stop().await;
    badge.stop().await;
}

#[tokio::test]
async fn restricted_and_silent_tabs_surface_conditions() {
    let hub = Arc::new(MessageHub::new());
    let bridge = SyncBridge::new(hub.clone(), settings());

    let settings_tab = hub.open_tab("chrome://settings");
    let err = bridge.toggle(settings_tab, true).await.unwrap_err();
    assert_eq!(err, BridgeError::RestrictedPage);
    assert_eq!(err.condition(), UserCondition::PageNotSupported);

    let silent = hub.open_tab("https://example.com");
    let _port = hub.register_frame(silent, PRIMARY_FRAME).unwrap();
    let started = tokio::time::Instant::now();
    assert_eq!(bridge.query(silent).await, Err(BridgeError::PageNotDetected));
    assert!(started.elapsed() < Duration::from_millis(1_000));
    assert_eq!(bridge.cached(silent), SessionState::Unreachable);
}

#[tokio::test]
async fn preferences_persist_across_sqlite_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.sqlite3");
    {
        let store = PreferenceStore::new(Arc::new(SqliteBackend::open(path.clone()).unwrap()));
        store
            .set(
                "https://example.com",
                PreferenceUpdate::new(
                    Scope::Local,
                    PartialPreferences {
                        fixation_strength: Some(4),
                        ..PartialPreferences::default()
                    },
                ),
            )
            .await
            .unwrap();
    }

    let store = PreferenceStore::new(Arc::new(SqliteBackend::open(path).unwrap()));
    let effective = store.get("https://example.com").await;
    assert_eq!(effective.prefs.fixation_strength, 4);
    assert_eq!(effective.prefs.scope, Scope::Local);
    assert_eq!(store.get("https://other.example").await.prefs.scope, Scope::Global);
}
