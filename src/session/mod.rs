//! Interpreter process sessions.
//!
//! Two implementations of [`CodeSession`]:
//! - [`PerBlockSession`] spawns a fresh interpreter process per block, so
//!   nothing survives between steps.
//! - [`SharedSession`] keeps one interpreter process alive for the whole
//!   run and frames each submission with a sentinel to attribute output
//!   and exit status.

mod per_block;
mod shared;

pub use per_block::PerBlockSession;
pub use shared::SharedSession;

use crate::errors::SessionError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Output and exit status of one submitted block.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Merged stdout and stderr, arrival order.
    pub output: String,
    pub retcode: i32,
}

/// Exit code reported when a step is killed by an interrupt.
pub const INTERRUPT_RETCODE: i32 = 130;

/// One run's execution backend.
#[async_trait]
pub trait CodeSession: Send {
    /// Submit one block's code and block until its output and exit status
    /// are known. `interpreter` is the block's own first tag; a shared
    /// session has already validated it matches its process.
    async fn run_block(&mut self, interpreter: &str, code: &str)
    -> Result<StepOutput, SessionError>;

    /// Release any live process. Must be called before the session is
    /// dropped at the end of a run.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Locate an interpreter the way a shell would: names with a path
/// separator are checked directly, bare names are searched on PATH.
pub fn find_interpreter(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let direct = Path::new(name);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Which stream a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    Out,
    Err,
}

#[derive(Debug)]
pub(crate) struct Line {
    pub stream: Stream,
    pub text: String,
}

/// Forward one child stream to the merge channel, line by line. Lossy
/// UTF-8 so binary garbage cannot wedge a step.
pub(crate) fn pump_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<Line>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(Line { stream, text }).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}
