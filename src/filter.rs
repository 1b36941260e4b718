//! Tag-based block selection.
//!
//! A filter is three optional tag sets. A block is selected when it shares
//! a tag with `any_of` (or `any_of` is empty), carries every tag in
//! `all_of`, and shares no tag with `none_of`. Declaration blocks get a
//! wider rule: they also stay visible when they share a tag with any
//! selected executable block, so `env`/`secret` scoping follows the code
//! that actually runs.

use crate::block::CodeBlock;
use std::collections::BTreeSet;

/// Tag predicate for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagFilter {
    pub any_of: Vec<String>,
    pub all_of: Vec<String>,
    pub none_of: Vec<String>,
}

impl TagFilter {
    pub fn new(any_of: Vec<String>, all_of: Vec<String>, none_of: Vec<String>) -> Self {
        Self {
            any_of,
            all_of,
            none_of,
        }
    }

    /// Build a filter from raw command-line tag specs. Each spec is a
    /// list separated by `#` or `,`; empty pieces are dropped, so
    /// `"deploy#slow"`, `"deploy,slow"` and `"#deploy#slow#"` all mean
    /// the same two tags.
    pub fn from_specs(any_of: Option<&str>, all_of: Option<&str>, none_of: Option<&str>) -> Self {
        Self {
            any_of: parse_tag_spec(any_of),
            all_of: parse_tag_spec(all_of),
            none_of: parse_tag_spec(none_of),
        }
    }

    /// True when no constraint was given at all.
    pub fn is_empty(&self) -> bool {
        self.any_of.is_empty() && self.all_of.is_empty() && self.none_of.is_empty()
    }

    /// The plain selection rule for one tag set.
    pub fn matches(&self, tags: &[String]) -> bool {
        let any_ok = self.any_of.is_empty() || tags.iter().any(|t| self.any_of.contains(t));
        let all_ok = self.all_of.iter().all(|t| tags.contains(t));
        let none_ok = !tags.iter().any(|t| self.none_of.contains(t));
        any_ok && all_ok && none_ok
    }

    fn excluded(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.none_of.contains(t))
    }
}

fn parse_tag_spec(spec: Option<&str>) -> Vec<String> {
    spec.map(|s| {
        s.split(['#', ','])
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Blocks split into what a run consumes: executable steps and the
/// declaration blocks visible to them.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Executable blocks that passed the filter, document order.
    pub steps: Vec<CodeBlock>,
    /// Declaration blocks visible for this run, document order.
    pub declarations: Vec<CodeBlock>,
    /// First tags that matched but resolved to no known interpreter.
    pub skipped_interpreters: Vec<String>,
}

/// Apply `filter` to `blocks`, deciding executability via
/// `interpreter_known` (a PATH lookup in production, a stub in tests).
pub fn select(
    blocks: &[CodeBlock],
    filter: &TagFilter,
    interpreter_known: impl Fn(&str) -> bool,
) -> Selection {
    let mut selection = Selection::default();
    let mut skipped: BTreeSet<String> = BTreeSet::new();

    // Pass 1: executable blocks on their own tags.
    for block in blocks {
        if block.decl_kind().is_some() || !filter.matches(&block.tags) {
            continue;
        }
        let Some(interpreter) = block.interpreter() else {
            continue; // untagged
        };
        if interpreter_known(interpreter) {
            selection.steps.push(block.clone());
        } else {
            skipped.insert(interpreter.to_string());
        }
    }

    // Pass 2: declaration visibility follows the selected code.
    let step_tags: BTreeSet<&str> = selection
        .steps
        .iter()
        .flat_map(|b| b.tags.iter().map(String::as_str))
        .collect();
    for block in blocks {
        if block.decl_kind().is_none() {
            continue;
        }
        let visible = filter.is_empty()
            || (!filter.excluded(&block.tags)
                && (filter.matches(&block.tags)
                    || block.tags.iter().any(|t| step_tags.contains(t.as_str()))));
        if visible {
            selection.declarations.push(block.clone());
        }
    }

    selection.skipped_interpreters = skipped.into_iter().collect();
    selection
}
