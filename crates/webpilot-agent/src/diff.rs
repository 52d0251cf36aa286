//! New-element detection between two summaries of the same page.

use std::collections::HashMap;
use std::fmt;

use crate::summarize::{InteractiveElement, PageSummary};

/// Fewest characters of text and selectors, summed over the added elements,
/// that counts as a change.
pub const MIN_MEANINGFUL_CHARS: usize = 20;

/// Elements present after an action that were not there before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDiff {
    pub added: Vec<InteractiveElement>,
    /// Elements from before that are gone.
    pub removed: usize,
}

type Key<'a> = (&'a str, Option<&'a str>, &'a str, &'a str);

fn key(el: &InteractiveElement) -> Key<'_> {
    (
        el.tag.as_str(),
        el.input_type.as_deref(),
        el.text.as_str(),
        el.primary_selector(),
    )
}

/// Compare two summaries as multisets of elements.
///
/// Returns `None` when nothing meaningful appeared, including when the two
/// summaries are identical.
pub fn diff(before: &PageSummary, after: &PageSummary) -> Option<ElementDiff> {
    let mut remaining: HashMap<Key<'_>, usize> = HashMap::new();
    for el in &before.elements {
        *remaining.entry(key(el)).or_default() += 1;
    }

    let mut added = Vec::new();
    for el in &after.elements {
        match remaining.get_mut(&key(el)) {
            Some(n) if *n > 0 => *n -= 1,
            _ => added.push(el.clone()),
        }
    }
    if added.is_empty() {
        return None;
    }

    let diff = ElementDiff {
        added,
        removed: remaining.values().sum(),
    };
    let content: usize = diff.added.iter().map(meaningful_chars).sum();
    if content < MIN_MEANINGFUL_CHARS {
        return None;
    }
    Some(diff)
}

fn meaningful_chars(el: &InteractiveElement) -> usize {
    el.text.chars().count() + el.selectors.iter().map(|s| s.chars().count()).sum::<usize>()
}

impl fmt::Display for ElementDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "New interactive elements (+{} added", self.added.len())?;
        if self.removed > 0 {
            write!(f, ", -{} removed", self.removed)?;
        }
        f.write_str("):")?;
        for (i, el) in self.added.iter().enumerate() {
            write!(f, "\n{}", el.render(i + 1))?;
        }
        Ok(())
    }
}
