use crate::ui::icons::{CHECK, CLOCK, CROSS, REPEAT, RUNNING, SKIP, SPARKLE};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Terminal UI for a run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Step bar — tracks how many steps have completed
/// - Status spinner — the step currently executing, with live status
///
/// Child process output is echoed above the bars as it arrives. All methods
/// coordinate output via `indicatif`'s `MultiProgress` internally.
#[derive(Debug)]
pub struct RunUi {
    multi: MultiProgress,
    step_bar: ProgressBar,
    status_bar: ProgressBar,
    current_step: AtomicU32,
    total_steps: AtomicU32,
}

/// Format a duration as `Xs`, or `Xm Ys` when >= 60 seconds.
fn fmt_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

impl RunUi {
    /// Create the UI and add both progress bars to the multiplex renderer.
    ///
    /// # Arguments
    /// * `total_steps` — number of steps selected for the run, sizes the step bar
    ///
    /// Call this once before the first step starts.
    pub fn new(total_steps: u64) -> Self {
        let multi = MultiProgress::new();

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let step_bar = multi.add(ProgressBar::new(total_steps));
        step_bar.set_style(step_style);
        step_bar.set_prefix("Steps");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("  Now");

        Self {
            multi,
            step_bar,
            status_bar,
            current_step: AtomicU32::new(0),
            total_steps: AtomicU32::new(total_steps as u32),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` when the
    /// rich UI is hidden or fails.
    ///
    /// A hidden draw target (output piped, CI) swallows `println` without an
    /// error, so child output and status banners must take the fallback path
    /// to stay visible.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() || self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Run a closure with the bars cleared from the terminal.
    ///
    /// Interactive prompts draw directly on the terminal and would otherwise
    /// collide with the live bars.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }

    /// Echo one line of child process output, as it arrives.
    ///
    /// # Arguments
    /// * `line` — raw line including its trailing newline, if any
    pub fn child_line(&self, line: &str) {
        self.print_line(line.trim_end_matches(['\n', '\r']));
    }

    /// Print the step header and start the status spinner.
    ///
    /// Enables a 100 ms tick on the spinner. Call [`Self::step_done`] or
    /// [`Self::step_failed`] to stop it.
    ///
    /// # Arguments
    /// * `step` — 1-based step number within the selection
    /// * `interpreter` — interpreter name shown in the header
    /// * `tags` — the block's full label (e.g. `"bash#deploy"`), empty if untagged
    pub fn start_step(&self, step: u32, interpreter: &str, tags: &str) {
        let total = self.total_steps.load(Ordering::SeqCst);
        self.current_step.store(step, Ordering::SeqCst);
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        let mut header = format!(
            "{} Step {}/{} [{}]",
            RUNNING,
            style(step).yellow().bold(),
            total,
            style(interpreter).cyan()
        );
        if !tags.is_empty() {
            header.push_str(&format!(" {}", style(tags).dim()));
        }
        self.print_line(header);
        // The spinner is reused across steps; a finished bar ignores ticks
        // until it is reset.
        self.status_bar.reset();
        self.status_bar.set_message(format!(
            "Running step {}/{} {}",
            style(step).cyan(),
            total,
            style("(attempt 1)").dim()
        ));
        self.status_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Note a step skipped by the starting-step option, without running it.
    pub fn step_skipped(&self, step: u32) {
        let total = self.total_steps.load(Ordering::SeqCst);
        self.print_line(format!(
            "{} Step {}/{} {}",
            SKIP,
            style(step).dim(),
            total,
            style("skipped").dim()
        ));
        self.step_bar.inc(1);
    }

    /// Update the spinner for a retry attempt of the current step.
    ///
    /// # Arguments
    /// * `attempt` — 1-based attempt number about to start
    pub fn retrying(&self, attempt: u32) {
        let step = self.current_step.load(Ordering::SeqCst);
        let total = self.total_steps.load(Ordering::SeqCst);
        self.print_line(format!(
            "    {} {}",
            REPEAT,
            style(format!("retrying (attempt {})", attempt)).yellow()
        ));
        self.status_bar.set_message(format!(
            "Running step {}/{} {}",
            style(step).cyan(),
            total,
            style(format!("(attempt {})", attempt)).dim()
        ));
    }

    /// Show a countdown-free pause notice on the spinner.
    ///
    /// # Arguments
    /// * `seconds` — pause length
    /// * `before_retry` — true for a retry pause, false for an inter-step pause
    pub fn pausing(&self, seconds: f64, before_retry: bool) {
        let what = if before_retry { "before retry" } else { "before next step" };
        self.status_bar.set_message(format!(
            "{} {}",
            CLOCK,
            style(format!("pausing {}s {}", seconds, what)).dim()
        ));
    }

    /// Finish the spinner with a success banner and advance the step bar.
    ///
    /// # Arguments
    /// * `step` — the step that completed
    /// * `elapsed` — wall-clock time of the final attempt
    pub fn step_done(&self, step: u32, elapsed: Duration) {
        self.status_bar
            .finish_with_message(format!("{} Step {} done in {}", CHECK, step, fmt_elapsed(elapsed)));
        self.step_bar.inc(1);
    }

    /// Finish the spinner with a failure banner, without advancing the step bar.
    ///
    /// # Arguments
    /// * `step` — the step that failed
    /// * `retcode` — exit status of the last attempt
    pub fn step_failed(&self, step: u32, retcode: i32) {
        self.status_bar.finish_with_message(format!(
            "{} Step {} failed with exit code {}",
            CROSS,
            step,
            style(retcode).red().bold()
        ));
    }

    /// Print the closing banner for a run where every step succeeded.
    pub fn run_complete(&self, steps: u32, elapsed: Duration) {
        self.status_bar.finish_and_clear();
        self.print_line("");
        self.print_line(format!(
            "{} {} steps complete in {}",
            SPARKLE,
            style(steps).green().bold(),
            fmt_elapsed(elapsed)
        ));
    }

    /// Print the closing banner for a run that stopped early.
    ///
    /// # Arguments
    /// * `reason` — short human-readable cause, e.g. `"aborted at step 3"`
    pub fn run_stopped(&self, reason: &str) {
        self.status_bar.finish_and_clear();
        self.print_line("");
        self.print_line(format!("{} {}", CROSS, style(reason).red().bold()));
    }
}
