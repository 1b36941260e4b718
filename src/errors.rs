//! Typed error hierarchy for the runbook engine.
//!
//! Four top-level enums cover the four subsystems:
//! - `EnvError` — variable declaration and resolution failures
//! - `SessionError` — interpreter process lifecycle failures
//! - `TraceError` — trace persistence and replay-load failures
//! - `RunError` — run controller failures, wrapping the others

use thiserror::Error;

/// Errors from variable declaration blocks and resolution.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Secret variable {name} must not declare a default value")]
    SecretWithDefault { name: String },

    #[error("Malformed variable declaration: {line:?}")]
    BadDeclaration { line: String },

    #[error("Variable {name} needs a value but no interactive input is available")]
    NoInteractiveChannel { name: String },

    #[error("Prompt for {name} failed: {source}")]
    PromptFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from spawning and driving an interpreter process.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Interpreter {name} not found on PATH")]
    InterpreterNotFound { name: String },

    #[error("Failed to spawn {interpreter}: {source}")]
    SpawnFailed {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write code to {interpreter} stdin: {source}")]
    StdinWriteFailed {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Interpreter {interpreter} closed its streams mid-step")]
    SessionClosed { interpreter: String },

    #[error("Failed to wait on {interpreter}: {source}")]
    WaitFailed {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from saving or loading a trace file.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Failed to read trace at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write trace at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed trace: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Trace block {index} has no recorded runs")]
    NoRuns { index: usize },
}

/// Errors from the run controller.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("No blocks matched for a {interpreter} session")]
    EmptySelection { interpreter: String },

    #[error("Single session requires one interpreter, found {found} besides {expected}")]
    MixedSelection { expected: String, found: String },

    #[error("Step {step} exited with code {retcode} after {attempts} attempt(s)")]
    StepFailed {
        step: usize,
        retcode: i32,
        attempts: usize,
    },

    #[error("Run aborted at step {step}")]
    Aborted { step: usize },

    #[error("Step {step} needs a decision but no interactive channel is available")]
    NoInteractiveChannel { step: usize },

    #[error("Interactive prompt failed: {source}")]
    PromptFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Run interrupted")]
    Interrupted,

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Trace(#[from] TraceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_error_secret_with_default_carries_name() {
        let err = EnvError::SecretWithDefault {
            name: "API_KEY".to_string(),
        };
        match &err {
            EnvError::SecretWithDefault { name } => assert_eq!(name, "API_KEY"),
            _ => panic!("Expected SecretWithDefault"),
        }
        assert!(err.to_string().contains("API_KEY"));
    }

    #[test]
    fn env_error_bad_declaration_quotes_line() {
        let err = EnvError::BadDeclaration {
            line: "not a decl".to_string(),
        };
        assert!(err.to_string().contains("not a decl"));
    }

    #[test]
    fn session_error_spawn_failed_is_matchable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "bash not found");
        let err = SessionError::SpawnFailed {
            interpreter: "bash".to_string(),
            source: io_err,
        };
        match &err {
            SessionError::SpawnFailed {
                interpreter,
                source,
            } => {
                assert_eq!(interpreter, "bash");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected SpawnFailed"),
        }
    }

    #[test]
    fn trace_error_no_runs_carries_index() {
        let err = TraceError::NoRuns { index: 3 };
        match &err {
            TraceError::NoRuns { index } => assert_eq!(*index, 3),
            _ => panic!("Expected NoRuns"),
        }
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn run_error_converts_from_env_error() {
        let inner = EnvError::NoInteractiveChannel {
            name: "TOKEN".to_string(),
        };
        let run_err: RunError = inner.into();
        match &run_err {
            RunError::Env(EnvError::NoInteractiveChannel { name }) => assert_eq!(name, "TOKEN"),
            _ => panic!("Expected RunError::Env(NoInteractiveChannel(...))"),
        }
    }

    #[test]
    fn run_error_converts_from_session_error() {
        let inner = SessionError::InterpreterNotFound {
            name: "fish".to_string(),
        };
        let run_err: RunError = inner.into();
        assert!(matches!(
            run_err,
            RunError::Session(SessionError::InterpreterNotFound { .. })
        ));
    }

    #[test]
    fn run_error_step_failed_reports_code_and_attempts() {
        let err = RunError::StepFailed {
            step: 2,
            retcode: 127,
            attempts: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("127"));
        assert!(msg.contains('2'));
        assert!(msg.contains('3'));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let env_err = EnvError::BadDeclaration { line: "x".into() };
        assert_std_error(&env_err);
        let trace_err = TraceError::NoRuns { index: 0 };
        assert_std_error(&trace_err);
        let run_err = RunError::Interrupted;
        assert_std_error(&run_err);
    }
}
