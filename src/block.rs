//! Code block records extracted from a document.
//!
//! A block's first tag decides what it is:
//! - `env` / `environ` / `environment` — regular variable declarations
//! - `secret` / `secrets` — secret variable declarations
//! - anything else — the interpreter to run the block with

use crate::errors::EnvError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

// Compile once using LazyLock
static VAR_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

const ENV_KINDS: &[&str] = &["env", "environ", "environment"];
const SECRET_KINDS: &[&str] = &["secret", "secrets"];

/// Which family of variables a declaration block defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Env,
    Secret,
}

/// One fenced block in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Tags in declaration order; the first one names the interpreter
    /// or declaration kind.
    pub tags: Vec<String>,
    /// Raw body text, trailing newline preserved as written.
    pub code: String,
    /// Zero-based position among all blocks in the document.
    pub index: usize,
}

impl CodeBlock {
    pub fn new(tags: Vec<String>, code: impl Into<String>, index: usize) -> Self {
        Self {
            tags,
            code: code.into(),
            index,
        }
    }

    /// Declaration kind, if the first tag is one of the reserved names.
    pub fn decl_kind(&self) -> Option<DeclKind> {
        let first = self.tags.first()?;
        if ENV_KINDS.contains(&first.as_str()) {
            Some(DeclKind::Env)
        } else if SECRET_KINDS.contains(&first.as_str()) {
            Some(DeclKind::Secret)
        } else {
            None
        }
    }

    /// Interpreter name for an executable block. `None` for declaration
    /// blocks and untagged blocks.
    pub fn interpreter(&self) -> Option<&str> {
        if self.decl_kind().is_some() {
            return None;
        }
        self.tags.first().map(String::as_str)
    }

    /// Tags joined the way they appear in a fence info string.
    pub fn label(&self) -> String {
        self.tags.join("#")
    }

    /// Parse the body of a declaration block into (name, value) pairs.
    ///
    /// One `NAME=VALUE` or `NAME=` per line; blank lines are skipped.
    /// Anything else is a malformed declaration.
    pub fn parse_declarations(&self) -> Result<Vec<(String, String)>, EnvError> {
        let mut vars = Vec::new();
        for line in self.code.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                return Err(EnvError::BadDeclaration { line: line.into() });
            };
            let name = name.trim();
            if !VAR_NAME_REGEX.is_match(name) {
                return Err(EnvError::BadDeclaration { line: line.into() });
            }
            vars.push((name.to_string(), value.to_string()));
        }
        Ok(vars)
    }
}
