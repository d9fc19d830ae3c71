//! Debounced reprocessing of page-side document changes.
//!
//! The document pings a `Notify` on every change. One task per frame waits
//! for a quiet window, then drains the mutation log and runs a single
//! `apply_subtree` pass per surviving root, all under the frame lock.
//! Edits the page makes inside an existing wrapper resync that wrapper.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::engine::{enclosing_wrapper, is_overlay_node};
use crate::dom::{Document, Mutation, NodeId};
use crate::frame::FrameContext;
use crate::log_debug;

const ENABLE_LOGS: bool = true;

/// Roots worth reprocessing from a batch of mutation records: attached,
/// outside the overlay's own wrappers, and not nested under another root.
pub fn coalesce(doc: &Document, mutations: Vec<Mutation>) -> Vec<NodeId> {
    let mut candidates: Vec<NodeId> = mutations
        .into_iter()
        .flat_map(|mutation| match mutation {
            Mutation::ChildList { added, .. } => added,
            Mutation::CharacterData { target } => vec![target],
        })
        .filter(|id| doc.is_attached(*id) && !is_overlay_node(doc, *id))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    candidates
        .iter()
        .copied()
        .filter(|id| {
            !doc
                .ancestors(*id)
                .any(|ancestor| candidates.binary_search(&ancestor).is_ok())
        })
        .collect()
}

/// Wrappers whose contents the page changed in place.
pub fn edited_wrappers(doc: &Document, mutations: &[Mutation]) -> Vec<NodeId> {
    let mut wrappers: Vec<NodeId> = mutations
        .iter()
        .map(|mutation| match mutation {
            Mutation::ChildList { target, .. } | Mutation::CharacterData { target } => *target,
        })
        .filter(|id| doc.is_attached(*id))
        .filter_map(|id| enclosing_wrapper(doc, id))
        .collect();
    wrappers.sort_unstable();
    wrappers.dedup();
    wrappers
}

pub struct MutationWatcher {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    passes: Arc<AtomicUsize>,
}

impl MutationWatcher {
    pub fn spawn(
        context: Arc<Mutex<FrameContext>>,
        notify: Arc<Notify>,
        debounce: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let passes = Arc::new(AtomicUsize::new(0));

        let cancel = token.clone();
        let pass_count = passes.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = notify.notified() => {}
                }

                // Let the burst settle.
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = time::sleep(debounce) => break,
                        _ = notify.notified() => {}
                    }
                }

                let outcome = context.lock().await.reapply_pending();
                if let Some(report) = outcome {
                    pass_count.fetch_add(1, Ordering::SeqCst);
                    log_debug!(
                        "Mutation pass: {} transformed, {} skipped",
                        report.transformed,
                        report.skipped.len()
                    );
                }
            }
        });

        Self {
            token,
            handle: Some(handle),
            passes,
        }
    }

    /// Reprocessing passes that had at least one root to look at.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MutationWatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::Preferences;

    #[test]
    fn nested_and_overlay_records_are_dropped() {
        let mut doc = Document::parse("<div><p>old text</p></div>").unwrap();
        let div = doc.document_element();

        let section = doc.create_element("section");
        let inner = doc.create_text("fresh words");
        doc.append_child(section, inner).unwrap();
        doc.append_child(div, section).unwrap();
        let more = doc.create_text("more");
        doc.append_child(section, more).unwrap();

        let wrapper = doc.create_element("br-span");
        let ours = doc.create_text("ignored");
        doc.append_child(div, wrapper).unwrap();
        doc.append_child(wrapper, ours).unwrap();

        let mutations = doc.take_mutations();
        assert_eq!(mutations.len(), 5);
        assert_eq!(edited_wrappers(&doc, &mutations), vec![wrapper]);
        assert_eq!(coalesce(&doc, mutations), vec![section]);
    }

    #[test]
    fn text_edits_inside_a_wrapper_are_resynced() {
        let mut context = FrameContext::new(Document::parse("<p>plain words</p>").unwrap());
        context.enable(&Preferences::default());

        let doc = &mut context.document;
        let wrapper = doc.children(doc.document_element())[0];
        let fixation = doc.children(wrapper)[0];
        let prefix = doc.children(fixation)[0];
        doc.set_text(prefix, "spl").unwrap();
        assert_eq!(doc.text_content(wrapper), "splain words");

        let report = context.reapply_pending().unwrap();
        assert_eq!(report.transformed, 1);
        assert!(context
            .document
            .to_markup()
            .contains("<br-fixation>sp</br-fixation><br-edge>lain</br-edge>"));

        context.disable();
        assert_eq!(context.document.to_markup(), "<p>splain words</p>");
    }

    #[test]
    fn edits_still_pending_survive_a_disable() {
        let mut context = FrameContext::new(Document::parse("<p>first draft</p>").unwrap());
        context.enable(&Preferences::default());

        let doc = &mut context.document;
        let wrapper = doc.children(doc.document_element())[0];
        let edge = *doc.children(wrapper).last().unwrap();
        let rest = doc.children(edge)[0];
        doc.set_text(rest, "ft").unwrap();

        context.disable();
        assert_eq!(context.document.to_markup(), "<p>first drft</p>");
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_collapse_into_one_pass() {
        let mut document = Document::parse("<div><p>start</p></div>").unwrap();
        let notify = Arc::new(Notify::new());
        document.observe(notify.clone());

        let mut context = FrameContext::new(document);
        context.enable(&Preferences::default());
        let context = Arc::new(Mutex::new(context));
        let watcher =
            MutationWatcher::spawn(context.clone(), notify, Duration::from_millis(100));

        for index in 0..5 {
            let mut guard = context.lock().await;
            let div = guard.document.document_element();
            let paragraph = guard.document.create_element("p");
            let text = guard.document.create_text(format!("added line {index}"));
            guard.document.append_child(paragraph, text).unwrap();
            guard.document.append_child(div, paragraph).unwrap();
            drop(guard);
            time::sleep(Duration::from_millis(30)).await;
        }

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(watcher.passes(), 1);

        let guard = context.lock().await;
        let markup = guard.document.to_markup();
        assert_eq!(markup.matches("<br-span>").count(), 6);
        drop(guard);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn own_writes_never_retrigger() {
        let mut document = Document::parse("<p>just some text</p>").unwrap();
        let notify = Arc::new(Notify::new());
        document.observe(notify.clone());
        let context = Arc::new(Mutex::new(FrameContext::new(document)));
        let watcher =
            MutationWatcher::spawn(context.clone(), notify, Duration::from_millis(100));

        context.lock().await.enable(&Preferences::default());
        time::sleep(Duration::from_millis(500)).await;
        context.lock().await.disable();
        time::sleep(Duration::from_millis(500)).await;

        assert_eq!(watcher.passes(), 0);
        watcher.stop().await;
    }
}
