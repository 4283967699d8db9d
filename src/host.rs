//! Host page model
//!
//! The live element tree belongs to the host. This module defines the read
//! interface the dispatcher needs ([`HostTree`]), the pluggable [`Locator`]
//! that knows the host's code-block markup, and [`MemoryTree`], an
//! arena-backed tree used by the CLI and tests.

use crate::classify::SourceBlock;
use crate::config::ImageConfig;
use crate::link::ImageLinkPatterns;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Identity of a node: its slot in the host tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Read access to the host's element tree
pub trait HostTree: Send + Sync {
    fn root(&self) -> NodeId;

    /// Lowercase tag name, `None` for text nodes or unknown ids
    fn tag(&self, node: NodeId) -> Option<String>;

    fn attr(&self, node: NodeId, name: &str) -> Option<String>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Concatenated text of the node and everything below it
    fn text_content(&self, node: NodeId) -> String;

    /// All nodes below `node`, in document order
    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attr(node, "class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }
}

/// Finds code blocks and image links in a particular host's markup
pub trait Locator: Send + Sync {
    fn is_code_block(&self, tree: &dyn HostTree, node: NodeId) -> bool;

    /// Text and language label of a code block, `None` if it is incomplete
    fn read_block(&self, tree: &dyn HostTree, node: NodeId) -> Option<SourceBlock>;

    fn is_image_link(&self, tree: &dyn HostTree, node: NodeId) -> bool;

    fn link_target(&self, tree: &dyn HostTree, node: NodeId) -> Option<String> {
        tree.attr(node, "href")
    }
}

/// Markup used by the Gemini chat page
///
/// Code block: `div.code-block` holding a `.code-block-decoration` header
/// (language in its first `span`) and a `pre > code` body. Image links are
/// anchors whose `href` has one of the configured image-link shapes.
pub struct GeminiLocator {
    links: ImageLinkPatterns,
}

impl GeminiLocator {
    pub fn new(links: ImageLinkPatterns) -> Self {
        Self { links }
    }

    pub fn from_config(images: &ImageConfig) -> Self {
        Self::new(ImageLinkPatterns::from(images))
    }
}

impl Default for GeminiLocator {
    fn default() -> Self {
        Self::new(ImageLinkPatterns::default())
    }
}

impl Locator for GeminiLocator {
    fn is_code_block(&self, tree: &dyn HostTree, node: NodeId) -> bool {
        tree.tag(node).as_deref() == Some("div") && tree.has_class(node, "code-block")
    }

    fn read_block(&self, tree: &dyn HostTree, node: NodeId) -> Option<SourceBlock> {
        let below = tree.descendants(node);
        let header = below
            .iter()
            .copied()
            .find(|&n| tree.has_class(n, "code-block-decoration"))?;
        let code = below.iter().copied().find(|&n| {
            tree.tag(n).as_deref() == Some("code")
                && tree
                    .parent(n)
                    .and_then(|p| tree.tag(p))
                    .is_some_and(|tag| tag == "pre")
        })?;

        let lang = tree
            .descendants(header)
            .into_iter()
            .find(|&n| tree.tag(n).as_deref() == Some("span"))
            .map(|span| tree.text_content(span).trim().to_lowercase())
            .unwrap_or_default();

        Some(SourceBlock::new(tree.text_content(code), lang))
    }

    fn is_image_link(&self, tree: &dyn HostTree, node: NodeId) -> bool {
        tree.tag(node).as_deref() == Some("a")
            && tree
                .attr(node, "href")
                .is_some_and(|href| self.links.extract(&href).is_some())
    }
}

#[derive(Debug, Clone)]
enum MemData {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct MemNode {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: MemData,
}

/// Arena-backed element tree; ids are never reused
#[derive(Debug)]
pub struct MemoryTree {
    nodes: RwLock<Vec<MemNode>>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    /// A tree holding only a `body` root
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(vec![MemNode {
                parent: None,
                children: Vec::new(),
                data: MemData::Element {
                    tag: "body".to_string(),
                    attrs: Vec::new(),
                },
            }]),
        }
    }

    fn push(&self, parent: NodeId, data: MemData) -> NodeId {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let id = NodeId(nodes.len());
        nodes.push(MemNode {
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        if let Some(p) = nodes.get_mut(parent.0) {
            p.children.push(id);
        }
        id
    }

    pub fn append_element(&self, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        self.push(
            parent,
            MemData::Element {
                tag: tag.to_ascii_lowercase(),
                attrs: attrs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        )
    }

    pub fn append_text(&self, parent: NodeId, text: &str) -> NodeId {
        self.push(parent, MemData::Text(text.to_string()))
    }

    /// Append a Gemini-style code block and return the `div.code-block`
    pub fn append_code_block(&self, parent: NodeId, lang: &str, code: &str) -> NodeId {
        let block = self.append_element(parent, "div", &[("class", "code-block")]);
        let header = self.append_element(block, "div", &[("class", "code-block-decoration")]);
        let span = self.append_element(header, "span", &[]);
        self.append_text(span, lang);
        self.append_element(header, "div", &[("class", "buttons")]);
        let pre = self.append_element(block, "pre", &[]);
        let code_el = self.append_element(pre, "code", &[]);
        self.append_text(code_el, code);
        block
    }

    /// Build a tree from a saved page; the root is the page's `body`
    pub fn from_html(html: &str) -> Self {
        use html5ever::tendril::TendrilSink;
        use html5ever::{ParseOpts, parse_document};
        use markup5ever_rcdom::RcDom;

        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(html);
        let tree = Self::new();
        if let Some(body) = find_rc_element(&dom.document, "body") {
            for child in body.children.borrow().iter() {
                tree.import_rc_node(tree.root(), child);
            }
        }
        tree
    }

    fn import_rc_node(&self, parent: NodeId, handle: &markup5ever_rcdom::Handle) {
        use markup5ever_rcdom::NodeData;

        match &handle.data {
            NodeData::Element { name, attrs, .. } => {
                let attrs: Vec<(String, String)> = attrs
                    .borrow()
                    .iter()
                    .map(|a| (a.name.local.to_string(), a.value.to_string()))
                    .collect();
                let id = self.push(
                    parent,
                    MemData::Element {
                        tag: name.local.to_string(),
                        attrs,
                    },
                );
                for child in handle.children.borrow().iter() {
                    self.import_rc_node(id, child);
                }
            }
            NodeData::Text { contents } => {
                self.append_text(parent, &contents.borrow());
            }
            _ => {}
        }
    }

    fn with_node<T>(&self, node: NodeId, f: impl FnOnce(&MemNode) -> T) -> Option<T> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(node.0).map(f)
    }

    fn collect_text(nodes: &[MemNode], node: NodeId, out: &mut String) {
        let Some(n) = nodes.get(node.0) else {
            return;
        };
        match &n.data {
            MemData::Text(text) => out.push_str(text),
            MemData::Element { .. } => {
                for child in &n.children {
                    Self::collect_text(nodes, *child, out);
                }
            }
        }
    }
}

fn find_rc_element(
    handle: &markup5ever_rcdom::Handle,
    tag: &str,
) -> Option<markup5ever_rcdom::Handle> {
    use markup5ever_rcdom::NodeData;

    if let NodeData::Element { name, .. } = &handle.data {
        if &*name.local == tag {
            return Some(handle.clone());
        }
    }
    handle
        .children
        .borrow()
        .iter()
        .find_map(|child| find_rc_element(child, tag))
}

impl HostTree for MemoryTree {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn tag(&self, node: NodeId) -> Option<String> {
        self.with_node(node, |n| match &n.data {
            MemData::Element { tag, .. } => Some(tag.clone()),
            MemData::Text(_) => None,
        })
        .flatten()
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.with_node(node, |n| match &n.data {
            MemData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone()),
            MemData::Text(_) => None,
        })
        .flatten()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.with_node(node, |n| n.parent).flatten()
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.with_node(node, |n| n.children.clone())
            .unwrap_or_default()
    }

    fn text_content(&self, node: NodeId) -> String {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        Self::collect_text(&nodes, node, &mut out);
        out
    }
}
