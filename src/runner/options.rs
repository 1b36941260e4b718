//! Run controls: prompting level, pacing, retries, and the decision seam.

use crate::errors::RunError;
use serde::{Deserialize, Serialize};

/// When the controller stops to ask before or after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AskMode {
    /// No prompts; retries are automatic
    #[default]
    Never,
    /// Prompt only after a failed step
    OnFailure,
    /// Prompt before every step and after every failure
    Always,
}

/// Configuration for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 1-based step to start from; earlier steps are skipped, not run
    pub start_step: u32,
    /// 1-based steps that force a review prompt even at [`AskMode::Never`]
    pub breakpoints: Vec<u32>,
    /// Prompting level
    pub ask: AskMode,
    /// Seconds to wait between steps (ignored at [`AskMode::Always`])
    pub pause: f64,
    /// Automatic retries per step after the first attempt
    pub retry: u32,
    /// Seconds to wait before each automatic retry
    pub retry_pause: f64,
    /// Let the system environment override declared variable values
    pub inherit_env: bool,
    /// Run every step inside one persistent process of this interpreter
    pub single_session: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_step: 1,
            breakpoints: Vec::new(),
            ask: AskMode::Never,
            pause: 0.0,
            retry: 0,
            retry_pause: 1.0,
            inherit_env: false,
            single_session: None,
        }
    }
}

impl RunOptions {
    /// Set the 1-based starting step.
    pub fn with_start_step(mut self, step: u32) -> Self {
        self.start_step = step;
        self
    }

    /// Set the breakpoint steps.
    pub fn with_breakpoints(mut self, steps: Vec<u32>) -> Self {
        self.breakpoints = steps;
        self
    }

    /// Set the prompting level.
    pub fn with_ask(mut self, ask: AskMode) -> Self {
        self.ask = ask;
        self
    }

    /// Set the inter-step pause in seconds.
    pub fn with_pause(mut self, seconds: f64) -> Self {
        self.pause = seconds;
        self
    }

    /// Set the automatic retry budget per step.
    pub fn with_retry(mut self, retries: u32) -> Self {
        self.retry = retries;
        self
    }

    /// Set the pause before each automatic retry, in seconds.
    pub fn with_retry_pause(mut self, seconds: f64) -> Self {
        self.retry_pause = seconds;
        self
    }

    /// Enable or disable system-environment inheritance.
    pub fn with_inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Run all steps in one persistent process of the given interpreter.
    pub fn with_single_session(mut self, interpreter: &str) -> Self {
        self.single_session = Some(interpreter.to_string());
        self
    }
}

/// What the user chose at a review point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecision {
    /// Run the code as shown
    Run,
    /// Run this code instead, for this attempt onward
    RunEdited(String),
    /// Stop the run
    Abort,
}

/// Decision seam for the controller's interactive points.
///
/// The controller never touches a terminal itself; breakpoints, the
/// `always` ask level, and post-failure reviews all go through this trait.
pub trait DecisionPoint {
    /// Review a step about to run.
    fn review_step(&self, step: u32, label: &str, code: &str) -> Result<StepDecision, RunError>;

    /// Decide what to do after a failed attempt.
    fn review_failure(
        &self,
        step: u32,
        label: &str,
        code: &str,
        retcode: i32,
    ) -> Result<StepDecision, RunError>;
}
