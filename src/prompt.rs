//! Terminal implementation of the interactive seams, backed by `dialoguer`.

use crate::errors::{EnvError, RunError};
use crate::runner::{DecisionPoint, StepDecision};
use crate::ui::RunUi;
use crate::vars::VarPrompter;
use console::style;
use dialoguer::{Editor, Input, Password, Select, theme::ColorfulTheme};
use std::sync::Arc;

/// Prompts on the controlling terminal for variable values and step
/// decisions. When a run UI is attached, its progress bars are suspended
/// around each prompt so the two never fight over the terminal.
pub struct ConsolePrompter {
    ui: Option<Arc<RunUi>>,
}

impl ConsolePrompter {
    pub fn new(ui: Option<Arc<RunUi>>) -> Self {
        Self { ui }
    }

    fn with_term<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.ui {
            Some(ui) => ui.suspend(f),
            None => f(),
        }
    }
}

fn prompt_failed(err: dialoguer::Error) -> RunError {
    RunError::PromptFailed {
        source: std::io::Error::other(err),
    }
}

fn print_code(code: &str) {
    for line in code.lines() {
        println!("    {}", style(line).dim());
    }
}

/// Open `$EDITOR` on the step's code. Closing without saving keeps the
/// code as shown.
fn edit_code(code: &str) -> Result<StepDecision, RunError> {
    let edited = Editor::new().edit(code).map_err(prompt_failed)?;
    Ok(match edited {
        Some(new_code) => StepDecision::RunEdited(new_code),
        None => StepDecision::Run,
    })
}

impl VarPrompter for ConsolePrompter {
    fn prompt_value(&self, name: &str, default: &str) -> Result<String, EnvError> {
        self.with_term(|| {
            Input::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Value for {name}"))
                .with_initial_text(default)
                .allow_empty(true)
                .interact_text()
                .map_err(|err| EnvError::PromptFailed {
                    name: name.to_string(),
                    source: std::io::Error::other(err),
                })
        })
    }

    fn prompt_secret(&self, name: &str) -> Result<String, EnvError> {
        self.with_term(|| {
            Password::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Secret {name}"))
                .allow_empty_password(true)
                .interact()
                .map_err(|err| EnvError::PromptFailed {
                    name: name.to_string(),
                    source: std::io::Error::other(err),
                })
        })
    }
}

impl DecisionPoint for ConsolePrompter {
    fn review_step(&self, step: u32, label: &str, code: &str) -> Result<StepDecision, RunError> {
        self.with_term(|| {
            println!();
            println!(
                "{} step {} [{}]",
                style("Review").cyan().bold(),
                step,
                label
            );
            print_code(code);

            let choice = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Run this step?")
                .items(&["Run as shown", "Edit, then run", "Abort the run"])
                .default(0)
                .interact()
                .map_err(prompt_failed)?;

            match choice {
                0 => Ok(StepDecision::Run),
                1 => edit_code(code),
                2 => Ok(StepDecision::Abort),
                _ => unreachable!(),
            }
        })
    }

    fn review_failure(
        &self,
        step: u32,
        label: &str,
        code: &str,
        retcode: i32,
    ) -> Result<StepDecision, RunError> {
        self.with_term(|| {
            println!();
            println!(
                "{} step {} [{}] exited with code {}",
                style("Failed").red().bold(),
                step,
                label,
                style(retcode).red()
            );
            print_code(code);

            let choice = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Run this step again?")
                .items(&["Retry as shown", "Edit, then retry", "Abort the run"])
                .default(0)
                .interact()
                .map_err(prompt_failed)?;

            match choice {
                0 => Ok(StepDecision::Run),
                1 => edit_code(code),
                2 => Ok(StepDecision::Abort),
                _ => unreachable!(),
            }
        })
    }
}
