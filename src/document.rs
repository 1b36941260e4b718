//! Markdown ingest: fenced code blocks in document order.
//!
//! Recognizes backtick and tilde fences with a `#`-separated tag list in
//! the info string (`bash#setup#db`). Only the first word of the info
//! string carries tags; the rest is ignored. An unterminated fence runs
//! to the end of input.

use crate::block::CodeBlock;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
struct FenceHead {
    marker: char,
    len: usize,
    indent: usize,
}

/// Parse `marker{3,}` with optional leading indent into a fence head.
fn fence_head(line: &str) -> Option<(FenceHead, &str)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    let rest = &line[indent..];
    let marker = rest.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let len = rest.chars().take_while(|&c| c == marker).count();
    if len < 3 {
        return None;
    }
    let info = rest[len..].trim();
    // Backtick info strings may not contain backticks (that is inline code)
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((FenceHead { marker, len, indent }, info))
}

/// True when `line` closes the fence opened by `head`.
fn closes(head: FenceHead, line: &str) -> bool {
    let trimmed = line.trim_start_matches(' ');
    let len = trimmed.chars().take_while(|&c| c == head.marker).count();
    len >= head.len && trimmed[len..].trim().is_empty()
}

fn parse_tags(info: &str) -> Vec<String> {
    let Some(word) = info.split_whitespace().next() else {
        return Vec::new();
    };
    word.split('#')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_indent(line: &str, indent: usize) -> &str {
    let leading = line.len() - line.trim_start_matches(' ').len();
    &line[leading.min(indent)..]
}

/// Extract every fenced code block from markdown text, in order.
pub fn parse_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(FenceHead, Vec<String>)> = None;
    let mut body: Vec<String> = Vec::new();

    for raw in text.lines() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        match open.as_ref().map(|(head, _)| *head) {
            None => {
                if let Some((head, info)) = fence_head(line) {
                    open = Some((head, parse_tags(info)));
                    body.clear();
                }
            }
            Some(head) => {
                if closes(head, line) {
                    if let Some((_, tags)) = open.take() {
                        blocks.push(finish_block(tags, std::mem::take(&mut body), blocks.len()));
                    }
                } else {
                    body.push(strip_indent(line, head.indent).to_string());
                }
            }
        }
    }
    // Unterminated fence runs to end of input
    if let Some((_, tags)) = open {
        blocks.push(finish_block(tags, body, blocks.len()));
    }
    blocks
}

fn finish_block(tags: Vec<String>, body: Vec<String>, index: usize) -> CodeBlock {
    let code = if body.is_empty() {
        String::new()
    } else {
        let mut code = body.join("\n");
        code.push('\n');
        code
    };
    CodeBlock::new(tags, code, index)
}

/// Tag inventory over all blocks: (tag, occurrences), most frequent
/// first, ties broken alphabetically.
pub fn tag_counts(blocks: &[CodeBlock]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for block in blocks {
        for tag in &block.tags {
            *counts.entry(tag).or_default() += 1;
        }
    }
    let mut counts: Vec<(String, usize)> =
        counts.into_iter().map(|(t, n)| (t.to_string(), n)).collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}
