//! Applies and reverts the reading overlay on a `Document`.
//!
//! Each transformed text node is swapped for a `br-span` wrapper; the
//! wrapper's id keys a `FixationMark` holding the original text and the
//! detached text node itself, which revert puts back before handing the
//! wrapper's slots to the arena. Wrappers are never descended into, so
//! applying twice changes nothing.

use std::collections::HashMap;

use serde::Serialize;

use super::fixation::{plan_words, WordSpan};
use crate::dom::{Document, NodeId};
use crate::error::ReaderError;
use crate::prefs::Preferences;
use crate::{log_debug, log_warn};

const ENABLE_LOGS: bool = true;

pub const WRAPPER_TAG: &str = "br-span";
pub const FIXATION_TAG: &str = "br-fixation";
pub const EDGE_TAG: &str = "br-edge";

/// Subtrees that are not rendered as prose or belong to an editor.
const SKIPPED_TAGS: [&str; 10] = [
    "script", "style", "noscript", "template", "textarea", "input", "select", "option", "svg",
    "math",
];

/// Elements that flow inside a line of text. Saccade buckets run across
/// them and restart at the nearest enclosing block.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "cite", "code", "del", "dfn", "em", "font", "i", "ins",
    "kbd", "mark", "q", "s", "small", "span", "strong", "sub", "sup", "time", "u", "var",
];

const MODE_ATTR: &str = "br-mode";
const DIRECTIVE_ATTRS: [&str; 5] = [
    MODE_ATTR,
    "saccades-color",
    "saccades-style",
    "fixation-strength",
    "saccades-interval",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixationMark {
    pub original: String,
    pub words: Vec<WordSpan>,
    /// The replaced text node, detached while the wrapper stands in for it.
    pub text_node: NodeId,
}

#[derive(Debug, Default)]
pub struct PassReport {
    pub transformed: usize,
    pub skipped: Vec<ReaderError>,
}

impl PassReport {
    pub fn merge(&mut self, other: PassReport) {
        self.transformed += other.transformed;
        self.skipped.extend(other.skipped);
    }

    pub fn is_empty(&self) -> bool {
        self.transformed == 0 && self.skipped.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DocumentTransformer {
    marks: HashMap<NodeId, FixationMark>,
    prefs: Preferences,
    active: bool,
    /// Root `style` attribute as it was before the first apply.
    saved_style: Option<Option<String>>,
}

impl DocumentTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    pub fn mark(&self, wrapper: NodeId) -> Option<&FixationMark> {
        self.marks.get(&wrapper)
    }

    pub fn marked_nodes(&self) -> usize {
        self.marks.len()
    }

    /// Turns the overlay on for the whole document.
    pub fn apply(&mut self, doc: &mut Document, prefs: &Preferences) -> PassReport {
        self.prefs = prefs.clone();
        self.active = true;
        self.write_directives(doc);
        let root = doc.root();
        let report = self.apply_subtree(doc, root);
        log_debug!(
            "Applied overlay: {} nodes, {} skipped",
            report.transformed,
            report.skipped.len()
        );
        report
    }

    /// Transforms new text under `root`. A no-op while the overlay is off.
    pub fn apply_subtree(&mut self, doc: &mut Document, root: NodeId) -> PassReport {
        let mut report = PassReport::default();
        if !self.active {
            return report;
        }

        if !doc.is_attached(root) {
            let err = ReaderError::skipped(root, "detached before processing");
            log_warn!("{err}");
            report.skipped.push(err);
            return report;
        }

        if is_excluded(doc, root) || doc.ancestors(root).any(|id| is_excluded(doc, id)) {
            return report;
        }

        // A pass rooted inside a block starts counting at that root.
        let mut block = None;
        let mut next_word = 0;
        for text_node in collect_text_nodes(doc, root) {
            let owner = enclosing_block(doc, text_node);
            if block != Some(owner) {
                block = Some(owner);
                next_word = 0;
            }
            match self.transform_text(doc, text_node, &mut next_word) {
                Ok(true) => report.transformed += 1,
                Ok(false) => {}
                Err(err) => {
                    log_warn!("{err}");
                    report.skipped.push(err);
                }
            }
        }
        report
    }

    /// Restores every attached wrapper to its original text and clears the
    /// root directives. Returns how many nodes were restored.
    pub fn revert(&mut self, doc: &mut Document) -> usize {
        let mut restored = 0;
        for (wrapper, mark) in self.marks.drain() {
            if !doc.is_attached(wrapper) {
                log_debug!("Wrapper {wrapper:?} left the document; nothing to restore");
                let _ = doc.release(mark.text_node);
                continue;
            }
            if doc.text(mark.text_node) != Some(mark.original.as_str()) {
                let _ = doc.set_text(mark.text_node, mark.original.as_str());
            }
            match restore(doc, wrapper, mark.text_node) {
                Ok(()) => restored += 1,
                Err(err) => log_warn!("{}", ReaderError::skipped(wrapper, err.to_string())),
            }
        }

        self.clear_directives(doc);
        self.active = false;
        restored
    }

    /// Re-renders with new preferences if the overlay is on; otherwise just
    /// remembers them.
    pub fn refresh(&mut self, doc: &mut Document, prefs: &Preferences) -> PassReport {
        if !self.active {
            self.prefs = prefs.clone();
            return PassReport::default();
        }
        self.revert(doc);
        self.apply(doc, prefs)
    }

    /// Re-renders `wrapper` after the page edited text inside it, so the
    /// mark keeps tracking what revert must restore.
    pub fn resync(&mut self, doc: &mut Document, wrapper: NodeId) -> PassReport {
        let mut report = PassReport::default();
        let current = doc.text_content(wrapper);
        let Some(mark) = self.marks.get(&wrapper) else {
            return report;
        };
        if mark.original == current {
            return report;
        }
        let Some(mark) = self.marks.remove(&wrapper) else {
            return report;
        };

        log_debug!("Text inside {wrapper:?} changed; re-rendering");
        let text_node = mark.text_node;
        let restored = doc
            .set_text(text_node, current)
            .and_then(|()| restore(doc, wrapper, text_node));
        if let Err(err) = restored {
            let err = ReaderError::skipped(wrapper, err.to_string());
            log_warn!("{err}");
            report.skipped.push(err);
            return report;
        }

        let mut next_word = 0;
        match self.transform_text(doc, text_node, &mut next_word) {
            Ok(true) => report.transformed += 1,
            Ok(false) => {}
            Err(err) => {
                log_warn!("{err}");
                report.skipped.push(err);
            }
        }
        report
    }

    fn transform_text(
        &mut self,
        doc: &mut Document,
        id: NodeId,
        next_word: &mut usize,
    ) -> Result<bool, ReaderError> {
        let original = doc
            .text(id)
            .ok_or_else(|| ReaderError::skipped(id, "not a text node"))?
            .to_string();
        if original.trim().is_empty() {
            return Ok(false);
        }

        let words = plan_words(&original, &self.prefs, *next_word);
        if words.is_empty() {
            return Ok(false);
        }
        *next_word += words.len();

        if doc.parent(id).is_none() {
            return Err(ReaderError::skipped(id, "no parent"));
        }

        let wrapper = doc.create_element(WRAPPER_TAG);
        let built = fill_wrapper(doc, wrapper, &original, &words)
            .and_then(|()| doc.replace_node(id, wrapper));
        if let Err(err) = built {
            let _ = doc.release(wrapper);
            return Err(ReaderError::skipped(id, err.to_string()));
        }

        self.marks.insert(
            wrapper,
            FixationMark {
                original,
                words,
                text_node: id,
            },
        );
        Ok(true)
    }

    fn write_directives(&mut self, doc: &mut Document) {
        let root = doc.document_element();
        let page_style = self
            .saved_style
            .get_or_insert_with(|| doc.attribute(root, "style").map(str::to_string))
            .clone();

        let prefs = &self.prefs;
        let interval = prefs.saccades_interval.to_string();
        let strength = prefs.fixation_strength.to_string();
        let directives = [
            (MODE_ATTR, "on"),
            ("saccades-color", prefs.saccades_color.as_str()),
            ("saccades-style", prefs.saccades_style.as_str()),
            ("fixation-strength", strength.as_str()),
            ("saccades-interval", interval.as_str()),
        ];

        let mut style = format!(
            "--fixation-edge-opacity: {}%; --br-line-height: {}",
            prefs.fixation_edge_opacity, prefs.line_height
        );
        if let Some(existing) = page_style.as_deref().map(|s| s.trim().trim_end_matches(';')) {
            if !existing.is_empty() {
                style = format!("{existing}; {style}");
            }
        }

        for (name, value) in directives.iter().chain([("style", style.as_str())].iter()) {
            if let Err(err) = doc.set_attribute(root, name, value) {
                log_warn!("Could not set {name} on document root: {err}");
            }
        }
    }

    fn clear_directives(&mut self, doc: &mut Document) {
        let root = doc.document_element();
        for name in DIRECTIVE_ATTRS {
            let _ = doc.remove_attribute(root, name);
        }
        let restored = match self.saved_style.take() {
            Some(Some(style)) => doc.set_attribute(root, "style", &style),
            _ => doc.remove_attribute(root, "style"),
        };
        if let Err(err) = restored {
            log_warn!("Could not restore root style: {err}");
        }
    }
}

/// Whether `id` is an element whose subtree the overlay must not touch,
/// including its own wrappers.
pub fn is_excluded(doc: &Document, id: NodeId) -> bool {
    let Some(tag) = doc.tag(id) else {
        return false;
    };
    if tag == WRAPPER_TAG || SKIPPED_TAGS.contains(&tag) {
        return true;
    }
    doc.attribute(id, "contenteditable")
        .is_some_and(|value| !value.eq_ignore_ascii_case("false"))
}

/// True for wrappers and anything inside one.
pub fn is_overlay_node(doc: &Document, id: NodeId) -> bool {
    enclosing_wrapper(doc, id).is_some()
}

/// The wrapper that is `id` or contains it.
pub fn enclosing_wrapper(doc: &Document, id: NodeId) -> Option<NodeId> {
    std::iter::once(id)
        .chain(doc.ancestors(id))
        .find(|node| doc.tag(*node) == Some(WRAPPER_TAG))
}

/// Nearest ancestor that is not an inline element.
fn enclosing_block(doc: &Document, id: NodeId) -> NodeId {
    doc.ancestors(id)
        .find(|ancestor| !doc.tag(*ancestor).is_some_and(|tag| INLINE_TAGS.contains(&tag)))
        .unwrap_or_else(|| doc.root())
}

/// Puts `text_node` back in place of `wrapper` and frees the wrapper.
fn restore(doc: &mut Document, wrapper: NodeId, text_node: NodeId) -> crate::dom::DomResult<()> {
    doc.replace_node(wrapper, text_node)?;
    doc.release(wrapper)?;
    Ok(())
}

/// Text nodes under `root` in document order, pruning excluded subtrees.
fn collect_text_nodes(doc: &Document, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
        if doc.text(current).is_some() {
            out.push(current);
            continue;
        }
        if is_excluded(doc, current) {
            continue;
        }
        stack.extend(doc.children(current).iter().rev().copied());
    }
    out
}

fn fill_wrapper(
    doc: &mut Document,
    wrapper: NodeId,
    original: &str,
    words: &[WordSpan],
) -> crate::dom::DomResult<()> {
    let mut cursor = 0;

    for word in words.iter().filter(|word| word.emphasized) {
        if word.start > cursor {
            let plain = doc.create_text(&original[cursor..word.start]);
            doc.append_child(wrapper, plain)?;
        }

        let fixation = doc.create_element(FIXATION_TAG);
        let prefix = doc.create_text(&original[word.start..word.fixation_end()]);
        doc.append_child(fixation, prefix)?;
        doc.append_child(wrapper, fixation)?;

        if word.fixation_end() < word.end {
            let edge = doc.create_element(EDGE_TAG);
            let rest = doc.create_text(&original[word.fixation_end()..word.end]);
            doc.append_child(edge, rest)?;
            doc.append_child(wrapper, edge)?;
        }
        cursor = word.end;
    }

    if cursor < original.len() {
        let tail = doc.create_text(&original[cursor..]);
        doc.append_child(wrapper, tail)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SaccadeColor, SaccadeStyle, MAX_FIXATION_PARTS, MAX_SACCADES_INTERVAL};

    fn prefs(strength: u8, interval: u8) -> Preferences {
        Preferences {
            fixation_strength: strength,
            saccades_interval: interval,
            ..Preferences::default()
        }
    }

    #[test]
    fn quick_brown_fox_at_strength_three() {
        let mut doc = Document::parse("<p>The quick brown fox</p>").unwrap();
        let mut transformer = DocumentTransformer::new();
        let report = transformer.apply(&mut doc, &prefs(3, 0));

        assert_eq!(report.transformed, 1);
        assert!(report.skipped.is_empty());
        let markup = doc.to_markup();
        assert!(markup.contains(
            "<br-span><br-fixation>Th</br-fixation><br-edge>e</br-edge> \
             <br-fixation>qui</br-fixation><br-edge>ck</br-edge> \
             <br-fixation>bro</br-fixation><br-edge>wn</br-edge> \
             <br-fixation>fo</br-fixation><br-edge>x</br-edge></br-span>"
        ));
        assert_eq!(doc.text_content(doc.root()), "The quick brown fox");
    }

    #[test]
    fn directives_land_on_the_document_element() {
        let mut doc = Document::parse(r#"<html style="color: red;"><body>Hi there</body></html>"#)
            .unwrap();
        let mut transformer = DocumentTransformer::new();
        transformer.apply(&mut doc, &prefs(2, 1));

        let root = doc.document_element();
        assert_eq!(doc.attribute(root, "br-mode"), Some("on"));
        assert_eq!(doc.attribute(root, "fixation-strength"), Some("2"));
        assert_eq!(doc.attribute(root, "saccades-interval"), Some("1"));
        assert_eq!(doc.attribute(root, "saccades-style"), Some("bold-600"));
        assert_eq!(
            doc.attribute(root, "style"),
            Some("color: red; --fixation-edge-opacity: 80%; --br-line-height: 1")
        );

        transformer.revert(&mut doc);
        assert_eq!(
            doc.to_markup(),
            r#"<html style="color: red;"><body>Hi there</body></html>"#
        );
    }

    #[test]
    fn applying_twice_changes_nothing() {
        let mut doc = Document::parse("<div><p>One two</p><p>three four five</p></div>").unwrap();
        let mut transformer = DocumentTransformer::new();
        transformer.apply(&mut doc, &Preferences::default());
        let once = doc.to_markup();

        let again = transformer.apply(&mut doc, &Preferences::default());
        assert_eq!(again.transformed, 0);
        assert_eq!(doc.to_markup(), once);
        assert_eq!(transformer.marked_nodes(), 2);
    }

    #[test]
    fn revert_restores_exact_markup() {
        let source = "<article><h1>Title &amp; more</h1><p>Don't  stop\n believing, 2024!</p><p>   </p></article>";
        let mut doc = Document::parse(source).unwrap();
        let before = doc.to_markup();
        let text_before = doc.text_content(doc.root());

        let mut transformer = DocumentTransformer::new();
        transformer.apply(&mut doc, &prefs(1, 2));
        assert_ne!(doc.to_markup(), before);

        assert_eq!(transformer.revert(&mut doc), 2);
        assert_eq!(doc.to_markup(), before);
        assert_eq!(doc.text_content(doc.root()), text_before);
        assert!(!transformer.is_active());
    }

    #[test]
    fn editable_and_code_like_subtrees_are_left_alone() {
        let mut doc = Document::parse(
            "<body><script>var x = 1;</script><textarea>draft text</textarea>\
             <div contenteditable=\"true\">editing here</div>\
             <div contenteditable=\"false\"><p>read only</p></div>\
             <svg><text>label</text></svg></body>",
        )
        .unwrap();
        let mut transformer = DocumentTransformer::new();
        let report = transformer.apply(&mut doc, &Preferences::default());

        assert_eq!(report.transformed, 1);
        let markup = doc.to_markup();
        assert!(markup.contains("<script>var x = 1;</script>"));
        assert!(markup.contains("<textarea>draft text</textarea>"));
        assert!(markup.contains("editing here</div>"));
        assert!(markup.contains("<br-fixation>re</br-fixation>"));
    }

    #[test]
    fn interval_emphasizes_one_word_per_bucket() {
        let mut doc = Document::parse("<p>a1 b2 c3 d4 e5 f6 g7</p>").unwrap();
        let mut transformer = DocumentTransformer::new();
        transformer.apply(&mut doc, &prefs(2, 2));

        let markup = doc.to_markup();
        // 7 words in buckets of 3: words 0, 3 and 6.
        assert_eq!(markup.matches("<br-fixation>").count(), 3);
        assert!(markup.contains("<br-fixation>a</br-fixation><br-edge>1</br-edge> b2 c3 "));
    }

    #[test]
    fn buckets_run_across_inline_markup() {
        let source = "<p>alpha <b>beta</b> gamma <a href=\"#\">delta <em>epsilon</em></a> zeta</p>";
        for interval in 0..MAX_SACCADES_INTERVAL {
            let mut doc = Document::parse(source).unwrap();
            let mut transformer = DocumentTransformer::new();
            transformer.apply(&mut doc, &prefs(2, interval));

            let expected = 6usize.div_ceil(usize::from(interval) + 1);
            let markup = doc.to_markup();
            assert_eq!(
                markup.matches("<br-fixation>").count(),
                expected,
                "interval {interval}: {markup}"
            );
        }
    }

    #[test]
    fn buckets_restart_at_each_block() {
        let mut doc = Document::parse("<div><p>one two three</p><p>four five</p></div>").unwrap();
        let mut transformer = DocumentTransformer::new();
        transformer.apply(&mut doc, &prefs(2, 2));

        let markup = doc.to_markup();
        assert_eq!(markup.matches("<br-fixation>").count(), 2);
        assert!(markup.contains("<p><br-span><br-fixation>f"));
    }

    #[test]
    fn revert_puts_back_the_original_text_node() {
        let mut doc = Document::parse("<p>Same node</p>").unwrap();
        let p = doc.document_element();
        let text = doc.children(p)[0];

        let mut transformer = DocumentTransformer::new();
        transformer.apply(&mut doc, &Preferences::default());
        assert_ne!(doc.children(p)[0], text);
        transformer.revert(&mut doc);
        assert_eq!(doc.children(p), &[text]);
    }

    #[test]
    fn arena_stays_bounded_across_toggles() {
        let mut doc =
            Document::parse("<p>one two three four five six seven eight nine</p>").unwrap();
        let before = doc.to_markup();
        let mut transformer = DocumentTransformer::new();
        transformer.apply(&mut doc, &prefs(1, 0));
        let settled = doc.arena_len();

        for round in 0..1000 {
            transformer.revert(&mut doc);
            let strength = if round % 2 == 0 { MAX_FIXATION_PARTS } else { 1 };
            transformer.apply(&mut doc, &prefs(strength, 0));
        }
        for strength in (1..=MAX_FIXATION_PARTS).cycle().take(500) {
            transformer.refresh(&mut doc, &prefs(strength, 0));
        }
        assert_eq!(doc.arena_len(), settled);

        transformer.revert(&mut doc);
        assert_eq!(doc.to_markup(), before);
    }

    #[test]
    fn every_preference_combination_round_trips() {
        let sources = [
            "<article><h1>Title &amp; more</h1><p>Don't <a href=\"/x\">stop</a> believing, \
             <em>2024</em>!</p><ul><li>one <b>two</b> three</li></ul><p>   </p></article>",
            "<html style=\"margin: 0\"><body><p>alpha <b>beta</b> gamma <i>delta \
             <u>epsilon</u></i> zeta &lt;eta&gt;</p><script>skip(me)</script>\
             <pre>code <span>kept</span></pre></body></html>",
        ];

        for source in sources {
            let pristine = Document::parse(source).unwrap();
            let before = pristine.to_markup();
            let text = pristine.text_content(pristine.root());
            let mut refreshed = Document::parse(source).unwrap();
            let mut follower = DocumentTransformer::new();

            for strength in 1..=MAX_FIXATION_PARTS {
                for interval in 0..MAX_SACCADES_INTERVAL {
                    for (index, style) in SaccadeStyle::ALL.into_iter().enumerate() {
                        let prefs = Preferences {
                            fixation_strength: strength,
                            saccades_interval: interval,
                            saccades_style: style,
                            saccades_color: SaccadeColor::ALL[index % SaccadeColor::ALL.len()],
                            ..Preferences::default()
                        };

                        let mut doc = Document::parse(source).unwrap();
                        let mut transformer = DocumentTransformer::new();
                        transformer.apply(&mut doc, &prefs);
                        let once = doc.to_markup();
                        assert_eq!(doc.text_content(doc.root()), text);

                        let again = transformer.apply(&mut doc, &prefs);
                        assert_eq!(again.transformed, 0);
                        assert_eq!(doc.to_markup(), once);

                        transformer.revert(&mut doc);
                        assert_eq!(doc.to_markup(), before, "{prefs:?}");

                        if follower.is_active() {
                            follower.refresh(&mut refreshed, &prefs);
                        } else {
                            follower.apply(&mut refreshed, &prefs);
                        }
                        assert_eq!(refreshed.to_markup(), once, "{prefs:?}");
                    }
                }
            }

            follower.revert(&mut refreshed);
            assert_eq!(refreshed.to_markup(), before);
        }
    }

    #[test]
    fn inactive_transformer_ignores_subtree_passes() {
        let mut doc = Document::parse("<p>Some words</p>").unwrap();
        let mut transformer = DocumentTransformer::new();
        let text = doc.children(doc.document_element())[0];
        assert!(transformer.apply_subtree(&mut doc, text).is_empty());
    }

    #[test]
    fn detached_nodes_are_reported_and_skipped() {
        let mut doc = Document::parse("<div><p>gone soon</p><p>stays here</p></div>").unwrap();
        let div = doc.document_element();
        let first = doc.children(div)[0];
        doc.remove_child(div, first).unwrap();

        let mut transformer = DocumentTransformer::new();
        transformer.apply(&mut doc, &Preferences::default());
        let report = transformer.apply_subtree(&mut doc, first);

        assert_eq!(report.transformed, 0);
        assert!(matches!(
            report.skipped.as_slice(),
            [ReaderError::TransformNodeSkipped { .. }]
        ));
    }

    #[test]
    fn refresh_rerenders_with_new_strength() {
        let mut doc = Document::parse("<p>Reading</p>").unwrap();
        let mut transformer = DocumentTransformer::new();
        transformer.apply(&mut doc, &prefs(1, 0));
        assert!(doc.to_markup().contains("<br-fixation>Re</br-fixation>"));

        transformer.refresh(&mut doc, &prefs(4, 0));
        assert!(doc.to_markup().contains("<br-fixation>Reading</br-fixation>"));
        assert_eq!(transformer.marked_nodes(), 1);
    }
}
