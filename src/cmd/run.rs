//! Document execution — `runbook run` and `runbook replay`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use runbook::block::CodeBlock;
use runbook::prompt::ConsolePrompter;
use runbook::runner::{RunOptions, Runner};
use runbook::ui::RunUi;
use runbook::vars::RunEnvironment;

use super::super::{ControlArgs, FilterArgs};

/// Execute the blocks of a markdown document that pass the tag filter.
pub async fn cmd_run(file: &Path, filter: &FilterArgs, control: &ControlArgs) -> Result<()> {
    use runbook::document::parse_blocks;
    use runbook::filter::{TagFilter, select};
    use runbook::session::find_interpreter;

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let blocks = parse_blocks(&text);
    let tag_filter = TagFilter::from_specs(
        filter.tags.as_deref(),
        filter.must_have_tags.as_deref(),
        filter.must_not_have_tags.as_deref(),
    );
    let selection = select(&blocks, &tag_filter, |name| find_interpreter(name).is_some());
    for interpreter in &selection.skipped_interpreters {
        eprintln!(
            "{} no '{}' executable on PATH, its blocks were skipped",
            console::style("warning:").yellow().bold(),
            interpreter
        );
    }

    let options = load_options(file, control)?;
    let ui = Arc::new(RunUi::new(selection.steps.len() as u64));
    let prompter = ConsolePrompter::new(Some(ui.clone()));

    let system: std::collections::HashMap<String, String> = std::env::vars().collect();
    let env = runbook::vars::resolve(
        &selection.declarations,
        &system,
        options.inherit_env,
        Some(&prompter),
    )?;

    drive(
        selection.steps,
        env,
        options,
        ui,
        &prompter,
        control.output.as_deref(),
    )
    .await
}

/// Re-run the code a saved trace recorded, last submission per block.
pub async fn cmd_replay(trace_path: &Path, control: &ControlArgs) -> Result<()> {
    use runbook::trace::Trace;

    let saved = Trace::load(trace_path)?;
    let steps = saved.replay_blocks()?;
    let options = load_options(trace_path, control)?;
    let ui = Arc::new(RunUi::new(steps.len() as u64));
    let prompter = ConsolePrompter::new(Some(ui.clone()));

    let system: std::collections::HashMap<String, String> = std::env::vars().collect();
    let env = runbook::vars::resolve_saved(&saved.env, &system, options.inherit_env, Some(&prompter))?;

    drive(
        steps,
        env,
        options,
        ui,
        &prompter,
        control.output.as_deref(),
    )
    .await
}

/// Layer CLI flags over `runbook.toml` defaults found next to `document`.
fn load_options(document: &Path, control: &ControlArgs) -> Result<RunOptions> {
    use runbook::config::RunbookToml;

    let defaults = RunbookToml::load_or_default(document)?.defaults;
    let mut options = defaults
        .run_options(
            control.ask,
            control.retry,
            control.retry_pause,
            control.pause,
            control.inherit_env,
        )
        .with_start_step(control.step)
        .with_breakpoints(control.breakpoints.clone());
    if let Some(interpreter) = &control.session {
        options = options.with_single_session(interpreter);
    }
    Ok(options)
}

/// Run the controller to completion, writing the trace on every exit
/// path before the run's own outcome is reported.
async fn drive(
    steps: Vec<CodeBlock>,
    env: RunEnvironment,
    options: RunOptions,
    ui: Arc<RunUi>,
    prompter: &ConsolePrompter,
    output: Option<&Path>,
) -> Result<()> {
    use tokio_util::sync::CancellationToken;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let runner = Runner::new(steps, env, options, Some(prompter), Some(ui.clone()), cancel)?;
    let report = runner.execute().await;

    if let Some(path) = output {
        report.trace.save(path)?;
        ui.print_line(&format!("Trace written to {}", path.display()));
    }
    report.outcome?;
    Ok(())
}
