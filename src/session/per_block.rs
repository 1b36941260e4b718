//! Fresh interpreter process per block.

use super::{CodeSession, INTERRUPT_RETCODE, Line, StepOutput, Stream, find_interpreter, pump_lines};
use crate::errors::SessionError;
use crate::ui::RunUi;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Spawns one process per submitted block: write the code to stdin, close
/// it, drain both output streams, wait for exit. No state crosses blocks.
pub struct PerBlockSession {
    env: Vec<(String, String)>,
    cancel: CancellationToken,
    ui: Option<Arc<RunUi>>,
}

impl PerBlockSession {
    pub fn new(
        env: Vec<(String, String)>,
        cancel: CancellationToken,
        ui: Option<Arc<RunUi>>,
    ) -> Self {
        Self { env, cancel, ui }
    }

    fn echo(&self, line: &str) {
        if let Some(ui) = &self.ui {
            ui.child_line(line);
        }
    }
}

#[async_trait]
impl CodeSession for PerBlockSession {
    async fn run_block(
        &mut self,
        interpreter: &str,
        code: &str,
    ) -> Result<StepOutput, SessionError> {
        let program =
            find_interpreter(interpreter).ok_or_else(|| SessionError::InterpreterNotFound {
                name: interpreter.to_string(),
            })?;
        debug!(interpreter = %interpreter, "spawning step process");

        let mut child = Command::new(&program)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SessionError::SpawnFailed {
                interpreter: interpreter.to_string(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(code.as_bytes())
                .await
                .map_err(|source| SessionError::StdinWriteFailed {
                    interpreter: interpreter.to_string(),
                    source,
                })?;
            stdin
                .shutdown()
                .await
                .map_err(|source| SessionError::StdinWriteFailed {
                    interpreter: interpreter.to_string(),
                    source,
                })?;
            // stdin drops here, closing the pipe
        }

        let (tx, mut rx) = mpsc::channel::<Line>(64);
        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, Stream::Out, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(stderr, Stream::Err, tx.clone());
        }
        drop(tx);

        let mut output = String::new();
        let mut interrupted = false;
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(line) => {
                        self.echo(&line.text);
                        output.push_str(&line.text);
                    }
                    None => break,
                },
                () = self.cancel.cancelled() => {
                    let _ = child.kill().await;
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            // Grab whatever was buffered before the kill. Orphaned
            // grandchildren may hold the pipes open, so do not wait for EOF.
            while let Ok(Some(line)) =
                tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
            {
                self.echo(&line.text);
                output.push_str(&line.text);
            }
            debug!(interpreter = %interpreter, "step interrupted");
            return Ok(StepOutput {
                output,
                retcode: INTERRUPT_RETCODE,
            });
        }

        let status = child
            .wait()
            .await
            .map_err(|source| SessionError::WaitFailed {
                interpreter: interpreter.to_string(),
                source,
            })?;
        let retcode = status.code().unwrap_or(-1);
        debug!(interpreter = %interpreter, retcode, "step process exited");
        Ok(StepOutput { output, retcode })
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        // Nothing outlives a block in this mode
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> PerBlockSession {
        PerBlockSession::new(Vec::new(), CancellationToken::new(), None)
    }

    #[tokio::test]
    async fn test_captures_merged_streams_and_exit_zero() {
        let mut s = session();
        let out = s
            .run_block("sh", "echo visible\necho hidden 1>&2\n")
            .await
            .unwrap();
        assert_eq!(out.retcode, 0);
        assert!(out.output.contains("visible\n"));
        assert!(out.output.contains("hidden\n"));
    }

    #[tokio::test]
    async fn test_reports_nonzero_exit() {
        let mut s = session();
        let out = s.run_block("sh", "exit 3\n").await.unwrap();
        assert_eq!(out.retcode, 3);
    }

    #[tokio::test]
    async fn test_empty_code_runs_clean() {
        let mut s = session();
        let out = s.run_block("sh", "").await.unwrap();
        assert_eq!(out.retcode, 0);
        assert_eq!(out.output, "");
    }

    #[tokio::test]
    async fn test_injects_run_environment() {
        let mut s = PerBlockSession::new(
            vec![("RUNBOOK_TEST_GREETING".into(), "salve".into())],
            CancellationToken::new(),
            None,
        );
        let out = s
            .run_block("sh", "echo \"$RUNBOOK_TEST_GREETING\"\n")
            .await
            .unwrap();
        assert_eq!(out.output, "salve\n");
    }

    #[tokio::test]
    async fn test_no_state_survives_between_blocks() {
        let mut s = session();
        s.run_block("sh", "CARRIED=42\n").await.unwrap();
        let out = s.run_block("sh", "echo \"${CARRIED:-unset}\"\n").await.unwrap();
        assert_eq!(out.output, "unset\n");
    }

    #[tokio::test]
    async fn test_unknown_interpreter_is_an_error() {
        let mut s = session();
        let err = s.run_block("no-such-interpreter-9b1c", "").await.unwrap_err();
        assert!(matches!(err, SessionError::InterpreterNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_kills_running_step() {
        let cancel = CancellationToken::new();
        let mut s = PerBlockSession::new(Vec::new(), cancel.clone(), None);
        let killer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });
        let started = std::time::Instant::now();
        let out = s
            .run_block("sh", "echo begin\nsleep 30\necho end\n")
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(out.retcode, INTERRUPT_RETCODE);
        assert!(out.output.contains("begin"));
        assert!(!out.output.contains("end"));
        killer.await.unwrap();
    }
}
