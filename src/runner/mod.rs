//! The run controller: drives selected blocks through their attempts.
//!
//! One block is in flight at a time, in document order. Every attempt is
//! recorded in the trace, so whatever the controller returns, the trace
//! mirrors exactly what executed. Interactive decisions go through the
//! [`DecisionPoint`] seam; process work goes through the session layer.

mod options;

pub use options::{AskMode, DecisionPoint, RunOptions, StepDecision};

use crate::block::CodeBlock;
use crate::errors::RunError;
use crate::session::{CodeSession, PerBlockSession, SharedSession};
use crate::trace::{StepRun, Trace, epoch_now};
use crate::ui::RunUi;
use crate::vars::RunEnvironment;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Controller state for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Next block selected but not yet started
    #[default]
    Pending,
    /// A step's process is executing
    RunningStep,
    /// Waiting on a run/edit/abort decision
    AwaitUser,
    /// The current block finished its final attempt
    StepDone,
    /// Terminal: a step failed, the user stopped the run, or an interrupt
    /// arrived
    Aborted,
    /// Terminal: every selected block completed
    Finished,
}

impl RunState {
    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Finished)
    }
}

/// Everything a finished or stopped run leaves behind.
///
/// The trace is present on every path that executed at least part of a
/// step, failures and interrupts included.
#[derive(Debug)]
pub struct RunReport {
    pub trace: Trace,
    pub state: RunState,
    pub outcome: Result<(), RunError>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Drives one run of pre-selected executable blocks.
pub struct Runner<'a> {
    steps: Vec<CodeBlock>,
    env: RunEnvironment,
    options: RunOptions,
    decisions: Option<&'a dyn DecisionPoint>,
    ui: Option<Arc<RunUi>>,
    cancel: CancellationToken,
    trace: Trace,
    state: RunState,
    executed: usize,
}

impl std::fmt::Debug for Runner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("steps", &self.steps)
            .field("env", &self.env)
            .field("options", &self.options)
            .field("ui", &self.ui)
            .field("cancel", &self.cancel)
            .field("trace", &self.trace)
            .field("state", &self.state)
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

impl<'a> Runner<'a> {
    /// Validate the selection against the options and set up the run.
    ///
    /// Single-session runs must select at least one block, all of the
    /// session's interpreter. These checks happen before anything spawns,
    /// so a configuration error never leaves a partial trace behind.
    pub fn new(
        steps: Vec<CodeBlock>,
        env: RunEnvironment,
        options: RunOptions,
        decisions: Option<&'a dyn DecisionPoint>,
        ui: Option<Arc<RunUi>>,
        cancel: CancellationToken,
    ) -> Result<Self, RunError> {
        if let Some(interpreter) = &options.single_session {
            if steps.is_empty() {
                return Err(RunError::EmptySelection {
                    interpreter: interpreter.clone(),
                });
            }
            for block in &steps {
                if let Some(found) = block.interpreter()
                    && found != interpreter
                {
                    return Err(RunError::MixedSelection {
                        expected: interpreter.clone(),
                        found: found.to_string(),
                    });
                }
            }
        }
        let trace = Trace::new(env.public_vars());
        Ok(Self {
            steps,
            env,
            options,
            decisions,
            ui,
            cancel,
            trace,
            state: RunState::default(),
            executed: 0,
        })
    }

    /// Run every selected step. Always yields the trace, whatever happened.
    pub async fn execute(mut self) -> RunReport {
        let started = Instant::now();
        let outcome = self.drive().await;
        if !self.state.is_terminal() {
            self.transition(RunState::Aborted);
        }
        if let Some(ui) = &self.ui {
            match &outcome {
                Ok(()) => ui.run_complete(self.executed as u32, started.elapsed()),
                Err(err) => ui.run_stopped(&err.to_string()),
            }
        }
        RunReport {
            trace: self.trace,
            state: self.state,
            outcome,
        }
    }

    async fn drive(&mut self) -> Result<(), RunError> {
        let mut session: Box<dyn CodeSession> = match &self.options.single_session {
            Some(interpreter) => Box::new(SharedSession::spawn(
                interpreter,
                self.env.process_env(),
                self.cancel.clone(),
                self.ui.clone(),
            )?),
            None => Box::new(PerBlockSession::new(
                self.env.process_env(),
                self.cancel.clone(),
                self.ui.clone(),
            )),
        };
        let result = self.run_steps(session.as_mut()).await;
        let close_result = session.close().await;
        result?;
        close_result?;
        self.transition(RunState::Finished);
        Ok(())
    }

    async fn run_steps(&mut self, session: &mut dyn CodeSession) -> Result<(), RunError> {
        let steps = std::mem::take(&mut self.steps);
        let total = steps.len();
        for (pos, block) in steps.iter().enumerate() {
            let step = pos + 1;
            if (step as u32) < self.options.start_step {
                debug!(step, "skipped by starting step");
                if let Some(ui) = &self.ui {
                    ui.step_skipped(step as u32);
                }
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(RunError::Interrupted);
            }
            self.transition(RunState::Pending);
            self.run_one(session, step, block).await?;
            self.executed += 1;
            self.transition(RunState::StepDone);
            if step < total && self.options.ask != AskMode::Always {
                self.pause_for(self.options.pause, false).await?;
            }
        }
        Ok(())
    }

    /// Run one block to a zero exit, an exhausted retry budget, or an
    /// abort decision. Every attempt lands in the trace.
    async fn run_one(
        &mut self,
        session: &mut dyn CodeSession,
        step: usize,
        block: &CodeBlock,
    ) -> Result<(), RunError> {
        let interpreter = block.interpreter().unwrap_or_default().to_string();
        let label = block.label();
        if let Some(ui) = &self.ui {
            let tags = block.tags.get(1..).map(|t| t.join("#")).unwrap_or_default();
            ui.start_step(step as u32, &interpreter, &tags);
        }

        let mut code = block.code.clone();
        if self.options.ask == AskMode::Always || self.options.breakpoints.contains(&(step as u32))
        {
            self.transition(RunState::AwaitUser);
            match self.decide(step)?.review_step(step as u32, &label, &code)? {
                StepDecision::Run => {}
                StepDecision::RunEdited(edited) => code = edited,
                StepDecision::Abort => {
                    debug!(step, "aborted before execution");
                    return Err(RunError::Aborted { step });
                }
            }
        }

        let mut attempts = 0usize;
        let mut opened = false;
        loop {
            self.transition(RunState::RunningStep);
            attempts += 1;
            let attempt_started = Instant::now();
            let time_start = epoch_now();
            let out = session.run_block(&interpreter, &code).await?;
            let time_stop = epoch_now();
            let retcode = out.retcode;
            if !opened {
                self.trace.open_block(block);
                opened = true;
            }
            self.trace.record_run(StepRun {
                user_code: code.clone(),
                output: out.output,
                retcode,
                time_start,
                time_stop,
            });

            if self.cancel.is_cancelled() {
                if let Some(ui) = &self.ui {
                    ui.step_failed(step as u32, retcode);
                }
                return Err(RunError::Interrupted);
            }
            if retcode == 0 {
                debug!(step, attempts, "step complete");
                if let Some(ui) = &self.ui {
                    ui.step_done(step as u32, attempt_started.elapsed());
                }
                return Ok(());
            }

            debug!(step, attempts, retcode, "attempt failed");
            if self.options.ask != AskMode::Never {
                self.transition(RunState::AwaitUser);
                match self
                    .decide(step)?
                    .review_failure(step as u32, &label, &code, retcode)?
                {
                    StepDecision::Run => {}
                    StepDecision::RunEdited(edited) => code = edited,
                    StepDecision::Abort => {
                        if let Some(ui) = &self.ui {
                            ui.step_failed(step as u32, retcode);
                        }
                        return Err(RunError::Aborted { step });
                    }
                }
            } else if attempts <= self.options.retry as usize {
                self.pause_for(self.options.retry_pause, true).await?;
            } else {
                if let Some(ui) = &self.ui {
                    ui.step_failed(step as u32, retcode);
                }
                return Err(RunError::StepFailed {
                    step,
                    retcode,
                    attempts,
                });
            }
            if let Some(ui) = &self.ui {
                ui.retrying(attempts as u32 + 1);
            }
        }
    }

    fn decide(&self, step: usize) -> Result<&dyn DecisionPoint, RunError> {
        self.decisions
            .ok_or(RunError::NoInteractiveChannel { step })
    }

    async fn pause_for(&self, seconds: f64, before_retry: bool) -> Result<(), RunError> {
        let Ok(wait) = Duration::try_from_secs_f64(seconds) else {
            return Ok(());
        };
        if wait.is_zero() {
            return Ok(());
        }
        if let Some(ui) = &self.ui {
            ui.pausing(seconds, before_retry);
        }
        tokio::select! {
            () = tokio::time::sleep(wait) => Ok(()),
            () = self.cancel.cancelled() => Err(RunError::Interrupted),
        }
    }

    fn transition(&mut self, next: RunState) {
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "state change");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    fn sh(code: &str, index: usize) -> CodeBlock {
        CodeBlock::new(vec!["sh".to_string()], code, index)
    }

    fn runner(steps: Vec<CodeBlock>, options: RunOptions) -> Runner<'static> {
        Runner::new(
            steps,
            RunEnvironment::default(),
            options,
            None,
            None,
            CancellationToken::new(),
        )
        .unwrap()
    }

    struct ScriptedDecisions {
        script: RefCell<VecDeque<StepDecision>>,
        reviews: Cell<usize>,
        failures: Cell<usize>,
    }

    impl ScriptedDecisions {
        fn new(script: Vec<StepDecision>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                reviews: Cell::new(0),
                failures: Cell::new(0),
            }
        }

        fn next(&self) -> StepDecision {
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or(StepDecision::Abort)
        }
    }

    impl DecisionPoint for ScriptedDecisions {
        fn review_step(&self, _step: u32, _label: &str, _code: &str) -> Result<StepDecision, RunError> {
            self.reviews.set(self.reviews.get() + 1);
            Ok(self.next())
        }

        fn review_failure(
            &self,
            _step: u32,
            _label: &str,
            _code: &str,
            _retcode: i32,
        ) -> Result<StepDecision, RunError> {
            self.failures.set(self.failures.get() + 1);
            Ok(self.next())
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_document_order() {
        let r = runner(
            vec![sh("echo first\n", 0), sh("echo second\n", 1)],
            RunOptions::default(),
        );
        let report = r.execute().await;
        assert!(report.success());
        assert_eq!(report.state, RunState::Finished);
        assert_eq!(report.trace.code_blocks.len(), 2);
        assert_eq!(report.trace.code_blocks[0].runs[0].output, "first\n");
        assert_eq!(report.trace.code_blocks[1].runs[0].output, "second\n");
    }

    #[tokio::test]
    async fn test_failing_step_stops_the_run() {
        let r = runner(
            vec![sh("exit 3\n", 0), sh("echo never\n", 1)],
            RunOptions::default(),
        );
        let report = r.execute().await;
        assert_eq!(report.state, RunState::Aborted);
        match report.outcome {
            Err(RunError::StepFailed {
                step,
                retcode,
                attempts,
            }) => {
                assert_eq!(step, 1);
                assert_eq!(retcode, 3);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected StepFailed, got {other:?}"),
        }
        // The failed attempt is recorded; the next block never started
        assert_eq!(report.trace.code_blocks.len(), 1);
        assert_eq!(report.trace.code_blocks[0].runs[0].retcode, 3);
    }

    #[tokio::test]
    async fn test_retries_consume_budget_then_fail() {
        let r = runner(
            vec![sh("exit 5\n", 0)],
            RunOptions::default().with_retry(2).with_retry_pause(0.0),
        );
        let report = r.execute().await;
        assert!(matches!(
            report.outcome,
            Err(RunError::StepFailed { attempts: 3, .. })
        ));
        assert_eq!(report.trace.code_blocks[0].runs.len(), 3);
    }

    #[tokio::test]
    async fn test_retry_until_the_step_succeeds() {
        let dir = tempfile::TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let code = format!(
            "c=$(cat {p} 2>/dev/null || echo 0)\nc=$((c+1))\necho $c > {p}\n[ $c -ge 2 ]\n",
            p = counter.display()
        );
        let r = runner(
            vec![sh(&code, 0)],
            RunOptions::default().with_retry(3).with_retry_pause(0.0),
        );
        let report = r.execute().await;
        assert!(report.success());
        assert_eq!(report.trace.code_blocks[0].runs.len(), 2);
        assert_ne!(report.trace.code_blocks[0].runs[0].retcode, 0);
        assert_eq!(report.trace.code_blocks[0].runs[1].retcode, 0);
    }

    #[tokio::test]
    async fn test_start_step_skips_earlier_blocks() {
        let r = runner(
            vec![sh("echo one\n", 0), sh("echo two\n", 1)],
            RunOptions::default().with_start_step(2),
        );
        let report = r.execute().await;
        assert!(report.success());
        // Skipped steps leave no record
        assert_eq!(report.trace.code_blocks.len(), 1);
        assert_eq!(report.trace.code_blocks[0].runs[0].output, "two\n");
    }

    #[tokio::test]
    async fn test_breakpoint_prompts_even_when_ask_is_never() {
        let decisions = ScriptedDecisions::new(vec![StepDecision::Run]);
        let r = Runner::new(
            vec![sh("echo ok\n", 0)],
            RunEnvironment::default(),
            RunOptions::default().with_breakpoints(vec![1]),
            Some(&decisions),
            None,
            CancellationToken::new(),
        )
        .unwrap();
        let report = r.execute().await;
        assert!(report.success());
        assert_eq!(decisions.reviews.get(), 1);
        assert_eq!(decisions.failures.get(), 0);
    }

    #[tokio::test]
    async fn test_abort_before_execution_leaves_no_record() {
        let decisions = ScriptedDecisions::new(vec![StepDecision::Abort]);
        let r = Runner::new(
            vec![sh("echo never\n", 0)],
            RunEnvironment::default(),
            RunOptions::default().with_ask(AskMode::Always),
            Some(&decisions),
            None,
            CancellationToken::new(),
        )
        .unwrap();
        let report = r.execute().await;
        assert!(matches!(report.outcome, Err(RunError::Aborted { step: 1 })));
        assert!(report.trace.code_blocks.is_empty());
        assert_eq!(report.state, RunState::Aborted);
    }

    #[tokio::test]
    async fn test_edited_code_runs_and_is_recorded() {
        let decisions =
            ScriptedDecisions::new(vec![StepDecision::RunEdited("echo edited\n".to_string())]);
        let r = Runner::new(
            vec![sh("echo original\n", 0)],
            RunEnvironment::default(),
            RunOptions::default().with_ask(AskMode::Always),
            Some(&decisions),
            None,
            CancellationToken::new(),
        )
        .unwrap();
        let report = r.execute().await;
        assert!(report.success());
        let block = &report.trace.code_blocks[0];
        // The document's code is kept; the attempt records what really ran
        assert_eq!(block.code, "echo original\n");
        assert_eq!(block.runs[0].user_code, "echo edited\n");
        assert_eq!(block.runs[0].output, "edited\n");
    }

    #[tokio::test]
    async fn test_failure_prompt_allows_unlimited_retries() {
        let decisions =
            ScriptedDecisions::new(vec![StepDecision::Run, StepDecision::Run, StepDecision::Abort]);
        let r = Runner::new(
            vec![sh("exit 4\n", 0)],
            RunEnvironment::default(),
            RunOptions::default().with_ask(AskMode::OnFailure),
            Some(&decisions),
            None,
            CancellationToken::new(),
        )
        .unwrap();
        let report = r.execute().await;
        assert!(matches!(report.outcome, Err(RunError::Aborted { step: 1 })));
        assert_eq!(decisions.failures.get(), 3);
        assert_eq!(report.trace.code_blocks[0].runs.len(), 3);
    }

    #[tokio::test]
    async fn test_single_session_keeps_state_between_steps() {
        let r = runner(
            vec![sh("KEPT=7\n", 0), sh("echo $KEPT\n", 1)],
            RunOptions::default().with_single_session("sh"),
        );
        let report = r.execute().await;
        assert!(report.success());
        assert_eq!(report.trace.code_blocks[1].runs[0].output, "7\n");
    }

    #[tokio::test]
    async fn test_single_session_rejects_mixed_interpreters() {
        let err = Runner::new(
            vec![sh("true\n", 0), CodeBlock::new(vec!["bash".into()], "true\n", 1)],
            RunEnvironment::default(),
            RunOptions::default().with_single_session("sh"),
            None,
            None,
            CancellationToken::new(),
        )
        .unwrap_err();
        match err {
            RunError::MixedSelection { expected, found } => {
                assert_eq!(expected, "sh");
                assert_eq!(found, "bash");
            }
            other => panic!("expected MixedSelection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_session_rejects_empty_selection() {
        let err = Runner::new(
            Vec::new(),
            RunEnvironment::default(),
            RunOptions::default().with_single_session("sh"),
            None,
            None,
            CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RunError::EmptySelection { .. }));
    }

    #[tokio::test]
    async fn test_prompt_required_without_channel_fails() {
        let r = runner(
            vec![sh("echo ok\n", 0)],
            RunOptions::default().with_ask(AskMode::Always),
        );
        let report = r.execute().await;
        assert!(matches!(
            report.outcome,
            Err(RunError::NoInteractiveChannel { step: 1 })
        ));
        assert!(report.trace.code_blocks.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_records_the_running_step() {
        let cancel = CancellationToken::new();
        let r = Runner::new(
            vec![sh("echo started\nsleep 30\n", 0), sh("echo never\n", 1)],
            RunEnvironment::default(),
            RunOptions::default(),
            None,
            None,
            cancel.clone(),
        )
        .unwrap();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });
        let report = r.execute().await;
        stopper.await.unwrap();
        assert!(matches!(report.outcome, Err(RunError::Interrupted)));
        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.trace.code_blocks.len(), 1);
        assert_eq!(
            report.trace.code_blocks[0].runs[0].retcode,
            crate::session::INTERRUPT_RETCODE
        );
    }

    #[tokio::test]
    async fn test_empty_block_still_executes_and_records() {
        let r = runner(vec![sh("", 0)], RunOptions::default());
        let report = r.execute().await;
        assert!(report.success());
        let block = &report.trace.code_blocks[0];
        assert_eq!(block.runs.len(), 1);
        assert_eq!(block.runs[0].retcode, 0);
        assert_eq!(block.runs[0].output, "");
    }

    #[tokio::test]
    async fn test_timestamps_bracket_the_attempt() {
        let before = epoch_now();
        let r = runner(vec![sh("echo t\n", 0)], RunOptions::default());
        let report = r.execute().await;
        let after = epoch_now();
        let run = &report.trace.code_blocks[0].runs[0];
        assert!(run.time_start >= before);
        assert!(run.time_stop >= run.time_start);
        assert!(run.time_stop <= after);
    }
}
