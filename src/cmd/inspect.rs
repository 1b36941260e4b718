//! Document inspection — `runbook tags` and `runbook blocks`.

use anyhow::{Context, Result};
use std::path::Path;

use super::super::FilterArgs;

/// List every tag in the document with its occurrence count.
pub fn cmd_tags(file: &Path) -> Result<()> {
    use runbook::document::{parse_blocks, tag_counts};

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    for (tag, count) in tag_counts(&parse_blocks(&text)) {
        println!("{count:>4}  {tag}");
    }
    Ok(())
}

/// Show the executable blocks a filter would select, numbered the way
/// a run would number them.
pub fn cmd_blocks(file: &Path, filter: &FilterArgs, json: bool) -> Result<()> {
    use runbook::document::parse_blocks;
    use runbook::filter::{TagFilter, select};

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let blocks = parse_blocks(&text);
    let tag_filter = TagFilter::from_specs(
        filter.tags.as_deref(),
        filter.must_have_tags.as_deref(),
        filter.must_not_have_tags.as_deref(),
    );
    // Listing is PATH-independent: blocks whose interpreter is not
    // installed here still show up.
    let selection = select(&blocks, &tag_filter, |_| true);

    if json {
        println!("{}", serde_json::to_string_pretty(&selection.steps)?);
        return Ok(());
    }
    for (pos, block) in selection.steps.iter().enumerate() {
        println!(
            "{}. [{}] {}",
            pos + 1,
            block.interpreter().unwrap_or("?"),
            block.tags.join("#")
        );
        println!("{}", console::style("─".repeat(32)).dim());
        for line in block.code.lines() {
            println!("    {line}");
        }
        println!();
    }
    Ok(())
}
