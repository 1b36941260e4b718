//! Execution trace: what ran, what it printed, how it exited.
//!
//! The persisted shape is one JSON object with `env` (non-secret
//! variables) and `code_blocks`, each block carrying its `runs` in attempt
//! order. A trace written by a partial or failed run contains only the
//! blocks that actually started, so any loadable trace is replayable.

use crate::block::CodeBlock;
use crate::errors::TraceError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One attempt at a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRun {
    /// Code actually submitted, after any interactive edit.
    pub user_code: String,
    /// Merged stdout and stderr.
    pub output: String,
    pub retcode: i32,
    /// Wall clock, seconds since the epoch.
    pub time_start: f64,
    pub time_stop: f64,
}

/// One executed block with all its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceBlock {
    pub interpreter: String,
    /// Code as written in the document.
    pub code: String,
    pub tags: Vec<String>,
    pub runs: Vec<StepRun>,
}

/// Full record of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub env: BTreeMap<String, String>,
    pub code_blocks: Vec<TraceBlock>,
}

impl Trace {
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self {
            env,
            code_blocks: Vec::new(),
        }
    }

    /// Open a record for a block that is about to execute.
    pub fn open_block(&mut self, block: &CodeBlock) {
        self.code_blocks.push(TraceBlock {
            interpreter: block.interpreter().unwrap_or_default().to_string(),
            code: block.code.clone(),
            tags: block.tags.clone(),
            runs: Vec::new(),
        });
    }

    /// Record one finished attempt of the most recently opened block.
    pub fn record_run(&mut self, run: StepRun) {
        if let Some(block) = self.code_blocks.last_mut() {
            block.runs.push(run);
        }
    }

    /// Attempts recorded for the most recently opened block.
    pub fn attempts(&self) -> usize {
        self.code_blocks.last().map_or(0, |b| b.runs.len())
    }

    pub fn save(&self, path: &Path) -> Result<(), TraceError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| TraceError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let content = fs::read_to_string(path).map_err(|source| TraceError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let trace: Trace = serde_json::from_str(&content)?;
        for (index, block) in trace.code_blocks.iter().enumerate() {
            if block.runs.is_empty() {
                return Err(TraceError::NoRuns { index });
            }
        }
        Ok(trace)
    }

    /// Rebuild a block sequence for a new run. Each block gets the code of
    /// its latest attempt, edits included, exit code ignored.
    pub fn replay_blocks(&self) -> Result<Vec<CodeBlock>, TraceError> {
        self.code_blocks
            .iter()
            .enumerate()
            .map(|(index, block)| {
                let last = block.runs.last().ok_or(TraceError::NoRuns { index })?;
                Ok(CodeBlock::new(
                    block.tags.clone(),
                    last.user_code.clone(),
                    index,
                ))
            })
            .collect()
    }
}

/// Current wall clock as fractional epoch seconds, the trace timestamp
/// format.
pub fn epoch_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}
