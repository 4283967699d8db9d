//! Remote diagram rendering
//!
//! Corrected mermaid source is POSTed to a rendering endpoint (Kroki by
//! default) which answers with SVG. When the endpoint rejects the source its
//! error body is often an SVG diagram of the syntax error, which is worth
//! showing instead of the raw text.

use crate::fetch::{FetchAdapter, FetchError, FetchRequest};
use crate::trust::{self, TrustedMarkup};

/// Markers mermaid puts into the SVG it draws for a syntax error
const ERROR_DIAGRAM_MARKERS: &[&str] = &[
    "aria-roledescription=\"error\"",
    "class=\"error-icon\"",
    "Syntax error in text",
];

/// What to show when rendering failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagramFailure {
    /// The renderer's own error diagram, pulled out of the error body
    Embedded(TrustedMarkup),
    /// Plain error text
    Text(String),
}

pub struct DiagramRenderer {
    fetch: FetchAdapter,
    endpoint: String,
}

impl DiagramRenderer {
    pub fn new(fetch: FetchAdapter, endpoint: impl Into<String>) -> Self {
        Self {
            fetch,
            endpoint: endpoint.into(),
        }
    }

    /// Submit source and get SVG markup back
    pub async fn render(&self, source: &str) -> Result<String, FetchError> {
        let request = FetchRequest::post(&self.endpoint, source)
            .with_header("Content-Type", "text/plain")
            .with_header("Accept", "image/svg+xml");
        self.fetch.post_text(request).await
    }
}

/// Pick the content to display for a failed render
pub fn failure_content(error: &FetchError) -> DiagramFailure {
    let message = error.to_string();
    if message.contains("</svg>") {
        let start = message
            .find("<?xml")
            .or_else(|| message.find("<svg"))
            .unwrap_or(0);
        DiagramFailure::Embedded(trust::admit_inline(&message[start..]))
    } else {
        DiagramFailure::Text(format!("Mermaid Render Failed:\n{}", message))
    }
}

/// Whether a successful response is really mermaid's error drawing
pub fn is_error_diagram(svg: &str) -> bool {
    ERROR_DIAGRAM_MARKERS.iter().any(|marker| svg.contains(marker))
}

/// Whether a successful response deserves the success badge
pub fn is_clean_render(svg: &str) -> bool {
    svg.contains("<svg") && !is_error_diagram(svg)
}
