//! Run environment: variables declared in `env`/`secret` blocks, resolved
//! once before any code executes.
//!
//! Resolution order per name, first declaration wins:
//! 1. inherited system value (only with `--inherit-env`)
//! 2. non-empty declared value (never legal for secrets)
//! 3. system environment value
//! 4. interactive prompt

use crate::block::{CodeBlock, DeclKind};
use crate::errors::EnvError;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Input seam for interactive variable values.
pub trait VarPrompter {
    /// Ask for a regular variable, offering `default` as the editable
    /// starting value. Empty input is a valid empty string.
    fn prompt_value(&self, name: &str, default: &str) -> Result<String, EnvError>;

    /// Ask for a secret without echoing. The resolver re-asks while the
    /// answer is empty.
    fn prompt_secret(&self, name: &str) -> Result<String, EnvError>;
}

/// One resolved variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    /// Value as written in the declaration block, possibly empty.
    pub declared: String,
    /// Value the run will actually use.
    pub value: String,
    pub is_secret: bool,
}

/// All variables for one run, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RunEnvironment {
    vars: Vec<Variable>,
}

impl RunEnvironment {
    pub fn contains(&self, name: &str) -> bool {
        self.vars.iter().any(|v| v.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    /// Everything the child process environment gets, secrets included.
    pub fn process_env(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect()
    }

    /// The non-secret subset, sorted by name. This is what a trace may
    /// persist.
    pub fn public_vars(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .filter(|v| !v.is_secret)
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect()
    }
}

/// Build the run environment from the visible declaration blocks.
///
/// `system` is a read-only snapshot of the process environment taken by
/// the caller. `prompter` is `None` when no interactive channel exists;
/// a variable that would need one then fails resolution.
pub fn resolve(
    declarations: &[CodeBlock],
    system: &HashMap<String, String>,
    inherit_env: bool,
    prompter: Option<&dyn VarPrompter>,
) -> Result<RunEnvironment, EnvError> {
    let mut env = RunEnvironment::default();

    for block in declarations {
        let Some(kind) = block.decl_kind() else {
            continue;
        };
        let is_secret = kind == DeclKind::Secret;

        for (name, declared) in block.parse_declarations()? {
            if env.contains(&name) {
                debug!(name = %name, "duplicate declaration ignored, first wins");
                continue;
            }
            if is_secret && !declared.is_empty() {
                return Err(EnvError::SecretWithDefault { name });
            }

            let value = resolve_one(&name, &declared, is_secret, system, inherit_env, prompter)?;

            env.vars.push(Variable {
                name,
                declared,
                value,
                is_secret,
            });
        }
    }

    debug!(count = env.len(), "run environment resolved");
    Ok(env)
}

/// Rebuild a run environment from the pairs a trace persisted.
///
/// Saved values act like declared values: `--inherit-env` still lets the
/// system environment win, and a name that was saved empty falls back to
/// the system value or a prompt.
pub fn resolve_saved(
    saved: &BTreeMap<String, String>,
    system: &HashMap<String, String>,
    inherit_env: bool,
    prompter: Option<&dyn VarPrompter>,
) -> Result<RunEnvironment, EnvError> {
    let mut env = RunEnvironment::default();
    for (name, declared) in saved {
        let value = resolve_one(name, declared, false, system, inherit_env, prompter)?;
        env.vars.push(Variable {
            name: name.clone(),
            declared: declared.clone(),
            value,
            is_secret: false,
        });
    }
    debug!(count = env.len(), "saved environment restored");
    Ok(env)
}

/// Resolve one variable's value by the documented precedence.
fn resolve_one(
    name: &str,
    declared: &str,
    is_secret: bool,
    system: &HashMap<String, String>,
    inherit_env: bool,
    prompter: Option<&dyn VarPrompter>,
) -> Result<String, EnvError> {
    if inherit_env && let Some(v) = system.get(name) {
        debug!(name = %name, "inherited from system environment");
        return Ok(v.clone());
    }
    if !declared.is_empty() {
        return Ok(declared.to_string());
    }
    if let Some(v) = system.get(name) {
        debug!(name = %name, "using system environment value");
        return Ok(v.clone());
    }
    let Some(prompter) = prompter else {
        return Err(EnvError::NoInteractiveChannel {
            name: name.to_string(),
        });
    };
    if is_secret {
        // Secrets must end up non-empty
        loop {
            let answer = prompter.prompt_secret(name)?;
            if !answer.is_empty() {
                return Ok(answer);
            }
        }
    }
    prompter.prompt_value(name, declared)
}
