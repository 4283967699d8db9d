//! Targeted repairs for common mermaid authoring mistakes
//!
//! These are textual patches, not a grammar. Every corrector works line by
//! line, keeps line order, and leaves lines that are already valid alone, so
//! feeding [`correct`] its own output yields no further fixes.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

const FULL_WIDTH_COLON: char = '\u{FF1A}';
const DEFAULT_DATE_FORMAT: &str = "    dateFormat YYYY-MM-DD";

static AFTER_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bafter\s+\w+").expect("static regex"));
static QUADRANT_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^( *)(title|x-axis|y-axis|quadrant-\d+) (.*)$").expect("static regex")
});
static REQUIREMENT_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^( *)text: (.*)$").expect("static regex"));

/// A single applied repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fix {
    /// 1-based line number in the text the corrector was given.
    pub line: usize,
    pub description: String,
}

impl Fix {
    fn at(index: usize, description: impl Into<String>) -> Self {
        Self {
            line: index + 1,
            description: description.into(),
        }
    }
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.description)
    }
}

/// Corrected diagram source plus the ordered list of repairs applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Corrected {
    pub code: String,
    pub fixes: Vec<Fix>,
}

impl Corrected {
    pub fn is_clean(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Fix descriptions, one per line, for display in a tooltip or log.
    pub fn summary(&self) -> String {
        self.fixes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Diagram families that have a dedicated corrector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagramFamily {
    Gantt,
    QuadrantChart,
    RequirementDiagram,
    Other,
}

impl DiagramFamily {
    /// Decide the family from the header line, skipping `%%` directives and comments.
    pub fn detect(code: &str) -> Self {
        let Some((_, header)) = header_line(code.lines()) else {
            return DiagramFamily::Other;
        };
        let keyword = header.split_whitespace().next().unwrap_or_default();
        match keyword {
            "gantt" => DiagramFamily::Gantt,
            "quadrantChart" => DiagramFamily::QuadrantChart,
            "requirementDiagram" => DiagramFamily::RequirementDiagram,
            _ => DiagramFamily::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramFamily::Gantt => "gantt",
            DiagramFamily::QuadrantChart => "quadrantChart",
            DiagramFamily::RequirementDiagram => "requirementDiagram",
            DiagramFamily::Other => "other",
        }
    }
}

fn header_line<'a, I>(lines: I) -> Option<(usize, &'a str)>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .map(str::trim)
        .enumerate()
        .find(|(_, line)| !line.is_empty() && !line.starts_with("%%"))
}

/// Repair `raw` according to its diagram family.
///
/// The text is trimmed first. Families without a corrector come back
/// unchanged with no fixes.
pub fn correct(raw: &str) -> Corrected {
    let code = raw.trim();
    match DiagramFamily::detect(code) {
        DiagramFamily::Gantt => fix_gantt(code),
        DiagramFamily::QuadrantChart => fix_quadrant_chart(code),
        DiagramFamily::RequirementDiagram => fix_requirement_diagram(code),
        DiagramFamily::Other => Corrected {
            code: code.to_string(),
            fixes: Vec::new(),
        },
    }
}

/// Gantt: one `after` dependency per task line, ASCII colons, and a `dateFormat`.
pub fn fix_gantt(code: &str) -> Corrected {
    let mut fixes = Vec::new();
    let mut lines = Vec::new();

    for (index, line) in code.split('\n').enumerate() {
        let mut processed = line.to_string();
        if let Some(stripped) = strip_extra_after_clauses(&processed) {
            processed = stripped;
            fixes.push(Fix::at(index, "Removed extraneous 'after' clauses."));
        }
        if processed.contains(FULL_WIDTH_COLON) {
            processed = processed.replace(FULL_WIDTH_COLON, ":");
            fixes.push(Fix::at(index, "Replaced full-width colon."));
        }
        lines.push(processed);
    }

    if !lines.iter().any(|line| line.contains("dateFormat")) {
        let at = header_line(lines.iter().map(String::as_str))
            .map_or(lines.len(), |(index, _)| index + 1);
        lines.insert(at, DEFAULT_DATE_FORMAT.to_string());
        fixes.push(Fix::at(at, "Added default `dateFormat`."));
    }

    Corrected {
        code: lines.join("\n"),
        fixes,
    }
}

/// Keep the first `after <task>` clause and drop the rest, separators included.
///
/// Only the task metadata (after the first colon) is looked at, so the word
/// "after" in a task title is left alone.
fn strip_extra_after_clauses(line: &str) -> Option<String> {
    let metadata = line.find([':', FULL_WIDTH_COLON])?;
    let clauses: Vec<_> = AFTER_CLAUSE.find_iter(&line[metadata..]).collect();
    if clauses.len() < 2 {
        return None;
    }

    let mut out = String::with_capacity(line.len());
    let mut cursor = metadata + clauses[0].end();
    out.push_str(&line[..cursor]);

    for clause in &clauses[1..] {
        let between = &line[cursor..metadata + clause.start()];
        let kept = between.trim_end();
        let kept = kept.strip_suffix(',').map_or(kept, str::trim_end);
        out.push_str(kept);
        cursor = metadata + clause.end();
    }
    out.push_str(&line[cursor..]);
    Some(out)
}

/// Quadrant chart: quote titles, quadrant names and axis labels.
pub fn fix_quadrant_chart(code: &str) -> Corrected {
    let mut fixes = Vec::new();
    let mut lines = Vec::new();

    for (index, line) in code.split('\n').enumerate() {
        let Some(caps) = QUADRANT_LABEL.captures(line) else {
            lines.push(line.to_string());
            continue;
        };
        let indent = &caps[1];
        let keyword = &caps[2];
        let text = &caps[3];
        if text.starts_with('"') {
            lines.push(line.to_string());
            continue;
        }

        let is_axis = keyword == "x-axis" || keyword == "y-axis";
        let parts: Vec<&str> = text.split("-->").map(str::trim).collect();
        if is_axis && parts.len() == 2 {
            lines.push(format!(
                "{indent}{keyword} \"{}\" --> \"{}\"",
                unquote(parts[0]),
                unquote(parts[1])
            ));
            fixes.push(Fix::at(index, "Added quotes to axis labels."));
        } else {
            lines.push(format!("{indent}{keyword} \"{text}\""));
            fixes.push(Fix::at(index, "Added quotes to label."));
        }
    }

    Corrected {
        code: lines.join("\n"),
        fixes,
    }
}

fn unquote(label: &str) -> &str {
    label.trim_matches('"')
}

/// Requirement diagram: `text:` property values must be quoted.
pub fn fix_requirement_diagram(code: &str) -> Corrected {
    let mut fixes = Vec::new();
    let mut lines = Vec::new();

    for (index, line) in code.split('\n').enumerate() {
        match REQUIREMENT_TEXT.captures(line) {
            Some(caps) if !caps[2].starts_with('"') => {
                lines.push(format!("{}text: \"{}\"", &caps[1], &caps[2]));
                fixes.push(Fix::at(index, "Added quotes to 'text' property."));
            }
            _ => lines.push(line.to_string()),
        }
    }

    Corrected {
        code: lines.join("\n"),
        fixes,
    }
}
