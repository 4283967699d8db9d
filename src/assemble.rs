//! Resource-inlining assembler
//!
//! Turns an HTML fragment into a standalone document: every external script
//! and stylesheet is fetched and inlined where it stood. A failing script
//! becomes a stub that logs the failure when the document runs; a failing
//! stylesheet is dropped.
//!
//! The DOM is parsed twice, once to list references and once to splice in
//! the fetched content, so no `Rc` handle lives across an await point.
//! html5ever builds the same tree for the same input, and both passes walk it
//! in document order, which keeps replacement positional.

use crate::fetch::{FetchAdapter, FetchError};
use crate::logging;
use crate::util::last_path_segment;
use futures::future::join_all;
use html5ever::serialize::{SerializeOpts, TraversalScope, serialize};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{Attribute, LocalName, ParseOpts, QualName, ns, parse_document};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use std::cell::RefCell;
use std::rc::Rc;
use url::Url;

/// Attributes that only make sense on an external script
const EXTERNAL_ONLY_SCRIPT_ATTRS: &[&str] = &["src", "integrity", "crossorigin", "async", "defer"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Script,
    Stylesheet,
}

/// An external script or stylesheet found in the fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalReference {
    pub kind: ReferenceKind,
    /// Absolute URL, resolved against the page origin
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("Invalid base URL '{url}': {source}")]
    InvalidBase {
        url: String,
        source: url::ParseError,
    },
    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledDocument {
    pub html: String,
    pub inlined: usize,
    pub failed: usize,
}

/// Build a standalone document from `fragment`.
///
/// All references are fetched concurrently; this returns only after every
/// one of them has succeeded or failed. `status` receives progress lines.
pub async fn assemble(
    fetch: &FetchAdapter,
    fragment: &str,
    base_url: &str,
    status: &(dyn Fn(&str) + Send + Sync),
) -> Result<AssembledDocument, AssembleError> {
    status("Parsing HTML...");
    let base = Url::parse(base_url).map_err(|source| AssembleError::InvalidBase {
        url: base_url.to_string(),
        source,
    })?;
    let references = find_references(fragment, &base);
    status(&format!("Found {} external resource(s).", references.len()));

    let outcomes = join_all(references.iter().map(|reference| async move {
        status(&format!("Downloading: {}", last_path_segment(&reference.url)));
        fetch.get_text(&reference.url).await
    }))
    .await;

    let document = splice(fragment, &references, outcomes)?;
    status("All resources embedded.");
    Ok(document)
}

/// List external references in document order
pub fn find_references(fragment: &str, base: &Url) -> Vec<ExternalReference> {
    let dom = parse(fragment);
    external_elements(&dom)
        .into_iter()
        .map(|(_, kind, raw)| ExternalReference {
            kind,
            url: base
                .join(raw.trim())
                .map(String::from)
                .unwrap_or_else(|_| raw.clone()),
        })
        .collect()
}

fn splice(
    fragment: &str,
    references: &[ExternalReference],
    outcomes: Vec<Result<String, FetchError>>,
) -> Result<AssembledDocument, AssembleError> {
    let dom = parse(fragment);
    let elements = external_elements(&dom);
    let mut inlined = 0;
    let mut failed = 0;

    for ((element, kind, _), (reference, outcome)) in elements
        .iter()
        .zip(references.iter().zip(outcomes))
    {
        match outcome {
            Ok(content) => {
                replace_node(element, Some(inline_element(element, *kind, content)));
                inlined += 1;
            }
            Err(e) => {
                logging::warn(&format!("Failed to inline {}: {}", reference.url, e));
                let replacement = match kind {
                    ReferenceKind::Script => Some(new_element(
                        "script",
                        Vec::new(),
                        failed_script_stub(&reference.url, &e),
                    )),
                    ReferenceKind::Stylesheet => None,
                };
                replace_node(element, replacement);
                failed += 1;
            }
        }
    }

    let html_element = child_element(&dom.document, "html");
    let head = match html_element.as_ref().and_then(|h| child_element(h, "head")) {
        Some(head) => inner_html(&head)?,
        None => String::new(),
    };
    let body = match html_element.as_ref().and_then(|h| child_element(h, "body")) {
        Some(body) => inner_html(&body)?,
        None => String::new(),
    };

    Ok(AssembledDocument {
        html: format!(
            "<!DOCTYPE html><html><head>{}</head><body>{}</body></html>",
            head, body
        ),
        inlined,
        failed,
    })
}

/// Script body that reports a failed download from inside the document
pub fn failed_script_stub(url: &str, error: &FetchError) -> String {
    format!(
        "console.error(\"Failed to load script: {}. {}\");",
        escape_js_string(url),
        escape_js_string(&error.to_string())
    )
}

/// Make `text` safe inside a double-quoted string within a `<script>`
fn escape_js_string(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace("</", "<\\/")
}

fn parse(fragment: &str) -> RcDom {
    parse_document(RcDom::default(), ParseOpts::default()).one(fragment)
}

fn external_elements(dom: &RcDom) -> Vec<(Handle, ReferenceKind, String)> {
    let mut out = Vec::new();
    collect_external(&dom.document, &mut out);
    out
}

fn collect_external(node: &Handle, out: &mut Vec<(Handle, ReferenceKind, String)>) {
    if let Some((kind, raw)) = reference_of(node) {
        out.push((node.clone(), kind, raw));
    }
    for child in node.children.borrow().iter() {
        collect_external(child, out);
    }
}

fn reference_of(node: &Handle) -> Option<(ReferenceKind, String)> {
    let NodeData::Element { name, attrs, .. } = &node.data else {
        return None;
    };
    let attrs = attrs.borrow();
    let attr = |wanted: &str| {
        attrs
            .iter()
            .find(|a| &*a.name.local == wanted)
            .map(|a| a.value.to_string())
            .filter(|v| !v.trim().is_empty())
    };

    match &*name.local {
        "script" => attr("src").map(|src| (ReferenceKind::Script, src)),
        "link" => {
            let is_stylesheet = attr("rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            });
            if is_stylesheet {
                attr("href").map(|href| (ReferenceKind::Stylesheet, href))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn inline_element(original: &Handle, kind: ReferenceKind, content: String) -> Handle {
    let kept: Vec<Attribute> = match &original.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .filter(|a| match kind {
                ReferenceKind::Script => !EXTERNAL_ONLY_SCRIPT_ATTRS.contains(&&*a.name.local),
                ReferenceKind::Stylesheet => &*a.name.local == "media",
            })
            .cloned()
            .collect(),
        _ => Vec::new(),
    };
    let tag = match kind {
        ReferenceKind::Script => "script",
        ReferenceKind::Stylesheet => "style",
    };
    new_element(tag, kept, content)
}

fn new_element(tag: &str, attrs: Vec<Attribute>, text: String) -> Handle {
    let element = Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), LocalName::from(tag)),
        attrs: RefCell::new(attrs),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    });
    let text_node = Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    });
    text_node.parent.set(Some(Rc::downgrade(&element)));
    element.children.borrow_mut().push(text_node);
    element
}

fn replace_node(old: &Handle, replacement: Option<Handle>) {
    let Some(parent) = old.parent.take().and_then(|weak| weak.upgrade()) else {
        return;
    };
    let mut children = parent.children.borrow_mut();
    let Some(index) = children.iter().position(|child| Rc::ptr_eq(child, old)) else {
        return;
    };
    match replacement {
        Some(node) => {
            node.parent.set(Some(Rc::downgrade(&parent)));
            children[index] = node;
        }
        None => {
            children.remove(index);
        }
    }
}

fn child_element(node: &Handle, tag: &str) -> Option<Handle> {
    node.children
        .borrow()
        .iter()
        .find(|child| matches!(&child.data, NodeData::Element { name, .. } if &*name.local == tag))
        .cloned()
}

fn inner_html(node: &Handle) -> Result<String, std::io::Error> {
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
