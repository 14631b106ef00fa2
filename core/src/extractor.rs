//! Derive an account handle from a container subtree.
//!
//! The heuristics run in priority order and the first one that yields a
//! plausible handle wins:
//!
//! 1. links inside the nested name block,
//! 2. any relative link in the container when there is no name block,
//! 3. `@mention` text confirmed by a link inside a name block.

use geoflag_protocol::Identifier;
use regex_lite::Regex;
use std::sync::LazyLock;

use crate::dom::Document;
use crate::dom::NodeId;
use crate::markup::Markup;
use crate::markup::first_path_segment;
use crate::markup::is_plausible_identifier;

static MENTION: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"@(\w{1,19})").ok());

pub fn extract_identifier(
    doc: &Document,
    container: NodeId,
    markup: &Markup,
) -> Option<Identifier> {
    let name_blocks = doc.select(container, |el| markup.is_name_container(el));

    let found = match name_blocks.first() {
        Some(block) => from_name_block(doc, *block, markup),
        None => from_any_link(doc, container, markup),
    };
    found.or_else(|| from_mentions(doc, container, &name_blocks))
}

fn link_segment<'a>(doc: &'a Document, anchor: NodeId) -> Option<&'a str> {
    doc.attr(anchor, "href").and_then(first_path_segment)
}

fn from_name_block(doc: &Document, block: NodeId, markup: &Markup) -> Option<Identifier> {
    doc.select(block, |el| el.is("a"))
        .into_iter()
        .filter_map(|anchor| link_segment(doc, anchor))
        .find(|segment| !markup.is_reserved(segment) && is_plausible_identifier(segment))
        .map(str::to_string)
}

fn from_any_link(doc: &Document, container: NodeId, markup: &Markup) -> Option<Identifier> {
    let candidates: Vec<(NodeId, &str)> = doc
        .select(container, |el| el.is("a"))
        .into_iter()
        .filter_map(|anchor| link_segment(doc, anchor).map(|segment| (anchor, segment)))
        .filter(|(_, segment)| {
            !markup.is_reserved(segment)
                && !segment.chars().all(|c| c.is_ascii_digit())
                && !segment.to_ascii_lowercase().contains("status")
                && is_plausible_identifier(segment)
        })
        .collect();

    let preferred = candidates.iter().find(|(anchor, segment)| {
        let text = doc.text_content(*anchor);
        let text = text.trim();
        text == *segment || text.strip_prefix('@') == Some(*segment) || text.starts_with('@')
    });

    preferred
        .or_else(|| candidates.first())
        .map(|(_, segment)| (*segment).to_string())
}

fn from_mentions(
    doc: &Document,
    container: NodeId,
    name_blocks: &[NodeId],
) -> Option<Identifier> {
    let pattern = MENTION.as_ref()?;
    let text = doc.text_content(container);
    // The confirming link carries the account's own casing.
    pattern
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1))
        .find_map(|mention| {
            name_blocks.iter().find_map(|block| {
                doc.select(*block, |el| el.is("a"))
                    .into_iter()
                    .filter_map(|anchor| link_segment(doc, anchor))
                    .find(|segment| segment.eq_ignore_ascii_case(mention.as_str()))
            })
        })
        .map(str::to_string)
}
