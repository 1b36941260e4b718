//! One live interpreter process shared by every step of a run.
//!
//! Steps are framed with a sentinel: after each block's code we write two
//! marker lines, one per output stream. The stdout marker carries the
//! shell's last exit status, the stderr marker tells us that stream has
//! drained past the block. Everything read before both markers belongs to
//! the step; the markers themselves never reach the captured output.

use super::{CodeSession, INTERRUPT_RETCODE, Line, StepOutput, Stream, find_interpreter, pump_lines};
use crate::errors::SessionError;
use crate::ui::RunUi;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Builds the two marker lines appended after each block. Fish spells the
/// last exit status `$status`; the POSIX family uses `$?`.
fn sync_directive(interpreter: &str, token: &str) -> String {
    let base = Path::new(interpreter)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(interpreter);
    let status_var = if base == "fish" { "$status" } else { "$?" };
    format!("echo \"{token} {status_var}\"\necho \"{token}\" 1>&2\n")
}

#[derive(Debug)]
pub struct SharedSession {
    interpreter: String,
    child: Child,
    stdin: Option<ChildStdin>,
    rx: mpsc::Receiver<Line>,
    cancel: CancellationToken,
    ui: Option<Arc<RunUi>>,
    closed: bool,
}

impl SharedSession {
    pub fn spawn(
        interpreter: &str,
        env: Vec<(String, String)>,
        cancel: CancellationToken,
        ui: Option<Arc<RunUi>>,
    ) -> Result<Self, SessionError> {
        let program =
            find_interpreter(interpreter).ok_or_else(|| SessionError::InterpreterNotFound {
                name: interpreter.to_string(),
            })?;
        debug!(interpreter = %interpreter, "spawning shared session process");

        let mut child = Command::new(&program)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SessionError::SpawnFailed {
                interpreter: interpreter.to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let (tx, rx) = mpsc::channel::<Line>(64);
        if let Some(stdout) = child.stdout.take() {
            pump_lines(stdout, Stream::Out, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_lines(stderr, Stream::Err, tx.clone());
        }
        drop(tx);

        Ok(Self {
            interpreter: interpreter.to_string(),
            child,
            stdin,
            rx,
            cancel,
            ui,
            closed: false,
        })
    }

    fn echo(&self, line: &str) {
        if let Some(ui) = &self.ui {
            ui.child_line(line);
        }
    }

    fn closed_error(&self) -> SessionError {
        SessionError::SessionClosed {
            interpreter: self.interpreter.clone(),
        }
    }
}

#[async_trait]
impl CodeSession for SharedSession {
    async fn run_block(
        &mut self,
        _interpreter: &str,
        code: &str,
    ) -> Result<StepOutput, SessionError> {
        if self.closed {
            return Err(self.closed_error());
        }

        let token = format!("__runbook_sync_{}__", Uuid::new_v4().simple());
        let mut payload = code.to_string();
        if !payload.is_empty() && !payload.ends_with('\n') {
            payload.push('\n');
        }
        payload.push_str(&sync_directive(&self.interpreter, &token));

        let stdin = self.stdin.as_mut().ok_or_else(|| SessionError::SessionClosed {
            interpreter: self.interpreter.clone(),
        })?;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|source| SessionError::StdinWriteFailed {
                interpreter: self.interpreter.clone(),
                source,
            })?;
        stdin
            .flush()
            .await
            .map_err(|source| SessionError::StdinWriteFailed {
                interpreter: self.interpreter.clone(),
                source,
            })?;

        let mut output = String::new();
        let mut retcode: Option<i32> = None;
        let mut err_drained = false;
        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(line) => {
                        let trimmed = line.text.trim_end();
                        if let Some(rest) = trimmed.strip_prefix(token.as_str()) {
                            match line.stream {
                                Stream::Out => {
                                    retcode = Some(rest.trim().parse().unwrap_or(-1));
                                }
                                Stream::Err => err_drained = true,
                            }
                            if retcode.is_some() && err_drained {
                                break;
                            }
                        } else {
                            self.echo(&line.text);
                            output.push_str(&line.text);
                        }
                    }
                    None => {
                        // The block's code ended the interpreter itself, so
                        // the markers never ran. The process exit status
                        // stands in for the step's.
                        self.closed = true;
                        let status = self.child.wait().await.map_err(|source| {
                            SessionError::WaitFailed {
                                interpreter: self.interpreter.clone(),
                                source,
                            }
                        })?;
                        let retcode = status.code().unwrap_or(-1);
                        debug!(interpreter = %self.interpreter, retcode, "session process exited mid-step");
                        return Ok(StepOutput { output, retcode });
                    }
                },
                () = self.cancel.cancelled() => {
                    let _ = self.child.kill().await;
                    self.closed = true;
                    while let Ok(Some(line)) =
                        tokio::time::timeout(Duration::from_millis(100), self.rx.recv()).await
                    {
                        if !line.text.trim_end().starts_with(token.as_str()) {
                            self.echo(&line.text);
                            output.push_str(&line.text);
                        }
                    }
                    return Ok(StepOutput {
                        output,
                        retcode: INTERRUPT_RETCODE,
                    });
                }
            }
        }

        Ok(StepOutput {
            output,
            retcode: retcode.unwrap_or(-1),
        })
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        // Closing stdin lets the interpreter see EOF and exit on its own
        drop(self.stdin.take());
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(result) => {
                let status = result.map_err(|source| SessionError::WaitFailed {
                    interpreter: self.interpreter.clone(),
                    source,
                })?;
                debug!(interpreter = %self.interpreter, retcode = status.code().unwrap_or(-1), "session closed");
            }
            Err(_) => {
                debug!(interpreter = %self.interpreter, "session ignored EOF, killing");
                let _ = self.child.kill().await;
            }
        }
        Ok(())
    }
}
