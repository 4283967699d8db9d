//! The single boundary externally obtained markup crosses before display
//!
//! [`TrustedMarkup`] can only be built here. Markup inserted straight into
//! the live page is parsed and rebuilt without `<script>` elements, inline
//! event handlers or `javascript:` links; assembled documents are admitted
//! as-is since they run in their own viewing context.

use crate::logging;
use html5ever::serialize::{SerializeOpts, TraversalScope, serialize};
use html5ever::tendril::TendrilSink;
use html5ever::{ParseOpts, QualName, ns, parse_fragment};
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};

/// Attributes that navigate or submit to their value
const URL_ATTRS: &[&str] = &["href", "src", "action", "formaction"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedMarkup(String);

impl TrustedMarkup {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Admit markup that will be inserted directly into the host page
pub fn admit_inline(markup: &str) -> TrustedMarkup {
    let context = QualName::new(None, ns!(html), "body".into());
    let dom = parse_fragment(RcDom::default(), ParseOpts::default(), context, vec![], false)
        .one(markup);

    // Fragment nodes hang off a synthetic <html> root
    let root = dom
        .document
        .children
        .borrow()
        .iter()
        .find(|child| matches!(child.data, NodeData::Element { .. }))
        .cloned();
    let Some(root) = root else {
        return TrustedMarkup(String::new());
    };

    let removed = scrub(&root);
    if removed > 0 {
        logging::warn(&format!(
            "Stripped {} active item(s) from inline markup",
            removed
        ));
    }

    match serialize_children(&root) {
        Ok(html) => TrustedMarkup(html),
        Err(e) => {
            logging::error(&format!("Failed to serialize inline markup: {}", e));
            TrustedMarkup(String::new())
        }
    }
}

/// Admit a standalone document destined for an isolated viewing context
pub fn admit_document(html: &str) -> TrustedMarkup {
    TrustedMarkup(html.to_string())
}

/// Remove active content below `node`, returning how much was removed
///
/// Comments go too; an XML prolog or doctype parses as one.
fn scrub(node: &Handle) -> usize {
    let mut removed = 0;
    node.children.borrow_mut().retain(|child| match &child.data {
        NodeData::Element { name, .. } if &*name.local == "script" => {
            removed += 1;
            false
        }
        NodeData::Comment { .. } | NodeData::Doctype { .. } => false,
        _ => true,
    });

    for child in node.children.borrow().iter() {
        if let NodeData::Element { attrs, .. } = &child.data {
            let mut attrs = attrs.borrow_mut();
            let before = attrs.len();
            attrs.retain(|attr| {
                let name = attr.name.local.to_ascii_lowercase();
                !(name.starts_with("on")
                    || (URL_ATTRS.contains(&&*name) && is_script_url(&attr.value)))
            });
            removed += before - attrs.len();
        }
        removed += scrub(child);
    }
    removed
}

fn is_script_url(value: &str) -> bool {
    // Browsers ignore ASCII whitespace and control characters in the scheme
    let scheme: String = value
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .take("javascript:".len())
        .collect();
    scheme.eq_ignore_ascii_case("javascript:")
}

fn serialize_children(node: &Handle) -> Result<String, std::io::Error> {
    let mut out = Vec::new();
    let serializable: SerializableHandle = node.clone().into();
    serialize(
        &mut out,
        &serializable,
        SerializeOpts {
            traversal_scope: TraversalScope::ChildrenOnly(None),
            ..Default::default()
        },
    )?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
