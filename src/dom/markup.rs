//! Loading and serializing documents as (X)HTML markup with `quick-xml`.
//!
//! The reader is tolerant the way pages are: end-name checks are off,
//! void elements (`<br>`, `<img>`) need no closing tag, unknown named
//! entities are kept literally, and comments / doctypes are dropped.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::{Document, DomError, DomResult, NodeData, NodeId};

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

fn is_void(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

impl Document {
    pub fn parse(markup: &str) -> DomResult<Self> {
        let mut doc = Document::new();
        let mut reader = Reader::from_str(markup);
        reader.config_mut().trim_text(false);
        reader.config_mut().check_end_names = false;

        let mut stack: Vec<NodeId> = vec![doc.root()];

        loop {
            let parent = stack.last().copied().unwrap_or(doc.root());
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let element = element_from_start(&mut doc, &reader, &e)?;
                    doc.append_child(parent, element)?;
                    if !doc.tag(element).map(is_void).unwrap_or(false) {
                        stack.push(element);
                    }
                }
                Ok(Event::Empty(e)) => {
                    let element = element_from_start(&mut doc, &reader, &e)?;
                    doc.append_child(parent, element)?;
                }
                Ok(Event::End(e)) => {
                    let tag = decode(&reader, e.name().as_ref())?.to_ascii_lowercase();
                    // Close up to the nearest matching open element; stray
                    // end tags are ignored.
                    if let Some(depth) = stack
                        .iter()
                        .rposition(|id| *id != doc.root() && doc.tag(*id) == Some(tag.as_str()))
                    {
                        stack.truncate(depth);
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = e
                        .decode()
                        .map_err(|err| DomError::Markup(format!("text decode: {err:?}")))?;
                    push_text(&mut doc, parent, &text)?;
                }
                Ok(Event::CData(e)) => {
                    let text = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|err| DomError::Markup(format!("cdata decode: {err:?}")))?;
                    push_text(&mut doc, parent, &text)?;
                }
                Ok(Event::GeneralRef(e)) => {
                    let name = e
                        .decode()
                        .map_err(|err| DomError::Markup(format!("entity decode: {err:?}")))?;
                    push_text(&mut doc, parent, &resolve_entity(&name))?;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(DomError::Markup(format!(
                        "xml error at {}: {err:?}",
                        reader.buffer_position()
                    )))
                }
            }
        }

        // Loading is not a page-side mutation.
        doc.take_mutations();
        Ok(doc)
    }

    /// Serializes the tree under the synthetic root.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root()) {
            self.write_node(*child, &mut out);
        }
        out
    }

    /// Serializes a single subtree, including `id` itself.
    pub fn node_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Text(text)) => {
                out.push_str(&quick_xml::escape::partial_escape(text.as_str()));
            }
            Some(NodeData::Element { tag, attrs }) => {
                out.push('<');
                out.push_str(tag);
                for (key, value) in attrs {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&quick_xml::escape::escape(value.as_str()));
                    out.push('"');
                }
                let children = self.children(id);
                if children.is_empty() && is_void(tag) {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for child in children {
                    self.write_node(*child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            None => {}
        }
    }
}

fn decode(reader: &Reader<&[u8]>, raw: &[u8]) -> DomResult<String> {
    reader
        .decoder()
        .decode(raw)
        .map(|value| value.into_owned())
        .map_err(|err| DomError::Markup(format!("name decode: {err:?}")))
}

fn element_from_start(
    doc: &mut Document,
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> DomResult<NodeId> {
    let tag = decode(reader, start.name().as_ref())?;
    let element = doc.create_element(&tag);
    for attr in start.attributes().flatten() {
        let key = match reader.decoder().decode(attr.key.as_ref()) {
            Ok(value) => value.to_ascii_lowercase(),
            Err(_) => continue,
        };
        let raw = match reader.decoder().decode(&attr.value) {
            Ok(value) => value.into_owned(),
            Err(_) => continue,
        };
        let value = quick_xml::escape::unescape(&raw)
            .map(|value| value.into_owned())
            .unwrap_or(raw);
        doc.set_attribute(element, &key, &value)?;
    }
    Ok(element)
}

/// Appends to the previous text sibling when there is one, so entity
/// boundaries do not split a run of text into several nodes.
fn push_text(doc: &mut Document, parent: NodeId, text: &str) -> DomResult<()> {
    if text.is_empty() {
        return Ok(());
    }
    if let Some(last) = doc.children(parent).last().copied() {
        if let Some(existing) = doc.text(last) {
            let merged = format!("{existing}{text}");
            return doc.set_text(last, merged);
        }
    }
    let node = doc.create_text(text);
    doc.append_child(parent, node)
}

fn resolve_entity(name: &str) -> String {
    let escaped = format!("&{name};");
    match quick_xml::escape::unescape(&escaped) {
        Ok(resolved) => resolved.into_owned(),
        Err(_) => match name {
            "nbsp" => "\u{a0}".to_string(),
            "mdash" => "\u{2014}".to_string(),
            "ndash" => "\u{2013}".to_string(),
            "hellip" => "\u{2026}".to_string(),
            "rsquo" => "\u{2019}".to_string(),
            "lsquo" => "\u{2018}".to_string(),
            "ldquo" => "\u{201c}".to_string(),
            "rdquo" => "\u{201d}".to_string(),
            "copy" => "\u{a9}".to_string(),
            _ => escaped,
        },
    }
}
