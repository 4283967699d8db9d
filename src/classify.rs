//! Content classification for discovered code blocks

/// Language labels that mark a self-contained HTML document
pub const DOCUMENT_LANGS: &[&str] = &["html"];

/// Language labels that mark diagram source
pub const DIAGRAM_LANGS: &[&str] = &["mermaid"];

/// Mermaid grammar keywords recognised at the start of unlabelled text
pub const DIAGRAM_KEYWORDS: &[&str] = &[
    "C4Context",
    "C4Container",
    "C4Component",
    "C4Dynamic",
    "classDiagram",
    "erDiagram",
    "flowchart",
    "gantt",
    "gitGraph",
    "graph",
    "journey",
    "mindmap",
    "pie",
    "quadrantChart",
    "requirementDiagram",
    "sequenceDiagram",
    "stateDiagram",
    "timeline",
];

const DIRECTIVE_INIT: &str = "%%{init:";

/// Render strategy chosen for a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    None,
    Document,
    Diagram,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::None => "none",
            Classification::Document => "document",
            Classification::Diagram => "diagram",
        }
    }

    pub fn is_renderable(&self) -> bool {
        !matches!(self, Classification::None)
    }
}

/// Raw content of a code block as read from the host page
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceBlock {
    pub text: String,
    /// Declared language label; may be empty or wrong
    pub lang: String,
}

impl SourceBlock {
    pub fn new(text: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: lang.into(),
        }
    }

    pub fn classify(&self) -> Classification {
        classify(&self.text, &self.lang)
    }
}

/// Decide what a block represents.
///
/// A document label wins over everything; otherwise a diagram label, a
/// leading grammar keyword or an init directive makes it a diagram.
pub fn classify(text: &str, lang: &str) -> Classification {
    let lang = lang.trim();
    if DOCUMENT_LANGS.iter().any(|l| lang.eq_ignore_ascii_case(l)) {
        return Classification::Document;
    }
    if DIAGRAM_LANGS.iter().any(|l| lang.eq_ignore_ascii_case(l)) || is_diagram_source(text) {
        return Classification::Diagram;
    }
    Classification::None
}

/// Whether unlabelled text looks like mermaid source
pub fn is_diagram_source(text: &str) -> bool {
    let trimmed = text.trim();
    DIAGRAM_KEYWORDS.iter().any(|k| trimmed.starts_with(k)) || trimmed.starts_with(DIRECTIVE_INIT)
}

/// Idle label of the trigger control, `None` when no control is attached
pub fn trigger_label(classification: Classification, text: &str) -> Option<&'static str> {
    match classification {
        Classification::None => None,
        Classification::Diagram => Some("📊 Render Diagram"),
        Classification::Document if text.to_lowercase().contains("echarts") => {
            Some("📈 Render ECharts")
        }
        Classification::Document => Some("▶️ Render HTML"),
    }
}
