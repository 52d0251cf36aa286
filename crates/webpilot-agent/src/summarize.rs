//! Interactive-element summaries of a page.
//!
//! A [`PageSummary`] is a bounded list of clickable/fillable elements, each
//! with ranked candidate selectors. It is rebuilt on every call.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::driver::{PageHandle, RawNode};
use crate::Result;

/// Selectors queried in order. A node matching several is reported once, at
/// its first match.
pub const INTERACTIVE_SELECTORS: &[&str] = &[
    "button",
    "input",
    "select",
    "textarea",
    "a[href]",
    "[onclick]",
    "[role=\"button\"]",
    "[role=\"link\"]",
    "[role=\"tab\"]",
    ".btn",
    ".button",
    "form",
    "label",
    "[contenteditable=\"true\"]",
    "[tabindex]",
    "[data-testid]",
    "[aria-label]",
];

/// Element cap for follow-up summaries after click/fill.
pub const COMPACT_LIMIT: usize = 50;
/// Element cap for the general page overview.
pub const EXTENDED_LIMIT: usize = 100;
/// Replacement for password input values.
pub const PASSWORD_MASK: &str = "[hidden]";

const MAX_TEXT_CHARS: usize = 100;
const MAX_SELECTORS: usize = 5;
const TEXT_SELECTOR_MAX_CHARS: usize = 50;
const GROUP_DISPLAY_LIMIT: usize = 30;
/// Raw nodes read from the page before hidden ones are dropped.
const SNAPSHOT_NODE_LIMIT: usize = 500;

/// Extra attributes worth showing next to an element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ElementAttributes {
    pub placeholder: Option<String>,
    /// Current value. Password values are always [`PASSWORD_MASK`].
    pub value: Option<String>,
    pub aria_label: Option<String>,
    pub src: Option<String>,
    pub alt: Option<String>,
}

impl ElementAttributes {
    fn is_empty(&self) -> bool {
        self.placeholder.is_none()
            && self.value.is_none()
            && self.aria_label.is_none()
            && self.src.is_none()
            && self.alt.is_none()
    }
}

/// One visible interactive element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractiveElement {
    pub tag: String,
    pub input_type: Option<String>,
    /// Visible text, whitespace-collapsed and truncated.
    pub text: String,
    /// Candidate selectors, most stable first. Never empty.
    pub selectors: Vec<String>,
    pub attributes: ElementAttributes,
}

impl InteractiveElement {
    pub fn from_raw(raw: &RawNode) -> Self {
        let tag = raw.tag.to_lowercase();
        let input_type = non_empty(&raw.input_type).map(|t| t.to_lowercase());
        let is_password = input_type.as_deref() == Some("password");

        let value = match non_empty(&raw.value) {
            Some(_) if is_password => Some(PASSWORD_MASK.to_string()),
            Some(v) => Some(truncate(v, MAX_TEXT_CHARS)),
            None => None,
        };

        Self {
            selectors: candidate_selectors(raw),
            text: truncate(&collapse(&raw.text), MAX_TEXT_CHARS),
            attributes: ElementAttributes {
                placeholder: non_empty(&raw.placeholder).map(str::to_string),
                value,
                aria_label: non_empty(&raw.aria_label).map(str::to_string),
                src: non_empty(&raw.src).map(|s| truncate(s, MAX_TEXT_CHARS)),
                alt: non_empty(&raw.alt).map(str::to_string),
            },
            tag,
            input_type,
        }
    }

    /// Grouping key: `tag` or `tag[type]`.
    pub fn group_key(&self) -> String {
        match &self.input_type {
            Some(t) => format!("{}[{}]", self.tag, t),
            None => self.tag.clone(),
        }
    }

    /// The most stable selector.
    pub fn primary_selector(&self) -> &str {
        self.selectors.first().map(String::as_str).unwrap_or(&self.tag)
    }

    /// Multi-line listing entry, numbered `index`.
    pub fn render(&self, index: usize) -> String {
        let mut out = format!("[{}] <{}>", index, self.tag);
        if !self.text.is_empty() {
            out.push_str(&format!(" \"{}\"", self.text));
        }
        out.push_str(&format!("\n    selectors: {}", self.selectors.join(" | ")));
        if !self.attributes.is_empty() {
            let a = &self.attributes;
            let parts: Vec<String> = [
                ("placeholder", &a.placeholder),
                ("value", &a.value),
                ("aria-label", &a.aria_label),
                ("src", &a.src),
                ("alt", &a.alt),
            ]
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| format!("{}=\"{}\"", k, v)))
            .collect();
            out.push_str(&format!("\n    {}", parts.join(" ")));
        }
        out
    }
}

/// Ranked candidate selectors for a node, at most five, without duplicates.
///
/// Order: id, data-testid, best class, combined classes, name, type, role,
/// aria-label, text, bare tag.
pub fn candidate_selectors(raw: &RawNode) -> Vec<String> {
    let tag = raw.tag.to_lowercase();
    let mut out: Vec<String> = Vec::new();

    if let Some(id) = non_empty(&raw.id) {
        if is_css_ident(id) {
            out.push(format!("#{}", id));
        } else {
            out.push(format!("[id=\"{}\"]", quote(id)));
        }
    }
    if let Some(test_id) = non_empty(&raw.test_id) {
        out.push(format!("[data-testid=\"{}\"]", quote(test_id)));
    }

    let classes: Vec<&str> = raw
        .classes
        .iter()
        .map(String::as_str)
        .filter(|c| is_css_ident(c))
        .collect();
    if let Some(best) = best_class(&classes) {
        out.push(format!(".{}", best));
    }
    if (2..=3).contains(&classes.len()) {
        out.push(format!(".{}", classes.join(".")));
    }

    if let Some(name) = non_empty(&raw.name) {
        out.push(format!("{}[name=\"{}\"]", tag, quote(name)));
    }
    if let Some(ty) = non_empty(&raw.input_type) {
        out.push(format!("{}[type=\"{}\"]", tag, quote(&ty.to_lowercase())));
    }
    if let Some(role) = non_empty(&raw.role) {
        out.push(format!("[role=\"{}\"]", quote(role)));
    }
    if let Some(label) = non_empty(&raw.aria_label) {
        out.push(format!("[aria-label=\"{}\"]", quote(label)));
    }

    let text = collapse(&raw.text);
    if !text.is_empty() && text.chars().count() < TEXT_SELECTOR_MAX_CHARS && !text.contains('"') {
        out.push(format!("text=\"{}\"", text));
    }
    out.push(tag);

    let mut seen = std::collections::HashSet::new();
    out.retain(|s| seen.insert(s.clone()));
    out.truncate(MAX_SELECTORS);
    out
}

/// First class that does not look machine-generated, else the first class.
fn best_class<'a>(classes: &[&'a str]) -> Option<&'a str> {
    classes
        .iter()
        .copied()
        .find(|c| c.len() > 1 && !c.chars().any(|ch| ch.is_ascii_digit()))
        .or_else(|| classes.first().copied())
}

fn is_css_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some('-') => match chars.clone().next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        },
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// A bounded description of a page's interactive elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub elements: Vec<InteractiveElement>,
    /// Visible interactive elements before the cap.
    pub total_found: usize,
}

/// Build a summary from raw nodes: drop hidden ones, keep at most `limit`.
pub fn summarize(url: &str, title: &str, nodes: &[RawNode], limit: usize) -> PageSummary {
    let visible: Vec<&RawNode> = nodes.iter().filter(|n| !n.is_hidden()).collect();
    PageSummary {
        url: url.to_string(),
        title: title.to_string(),
        total_found: visible.len(),
        elements: visible
            .into_iter()
            .take(limit)
            .map(InteractiveElement::from_raw)
            .collect(),
    }
}

/// Read the page and summarize it.
pub async fn capture<P: PageHandle>(page: &P, limit: usize) -> Result<PageSummary> {
    let nodes = page
        .snapshot(INTERACTIVE_SELECTORS, SNAPSHOT_NODE_LIMIT)
        .await?;
    let url = page.url().await?;
    let title = match page.title().await {
        Ok(title) => title,
        Err(e) if e.is_connectivity() => return Err(e),
        Err(e) => {
            debug!(error = %e, "page title unavailable");
            String::new()
        }
    };
    Ok(summarize(&url, &title, &nodes, limit))
}

impl fmt::Display for PageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Page: {}", self.title)?;
        writeln!(f, "URL: {}", self.url)?;
        if self.elements.len() < self.total_found {
            writeln!(
                f,
                "Interactive elements: {} (showing first {} of {})",
                self.total_found,
                self.elements.len(),
                self.total_found
            )?;
        } else {
            writeln!(f, "Interactive elements: {}", self.total_found)?;
        }
        if self.elements.is_empty() {
            return write!(f, "\nNo interactive elements found.");
        }

        // groups in order of first appearance
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (i, el) in self.elements.iter().enumerate() {
            let key = el.group_key();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(i),
                None => groups.push((key, vec![i])),
            }
        }

        for (key, members) in &groups {
            write!(f, "\n== {} ({}) ==", key, members.len())?;
            for &i in members.iter().take(GROUP_DISPLAY_LIMIT) {
                write!(f, "\n{}", self.elements[i].render(i + 1))?;
            }
            if members.len() > GROUP_DISPLAY_LIMIT {
                write!(f, "\n...and {} more", members.len() - GROUP_DISPLAY_LIMIT)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
