//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `run`     | `Run`, `Replay`  |
//! | `inspect` | `Tags`, `Blocks` |

pub mod inspect;
pub mod run;

pub use inspect::{cmd_blocks, cmd_tags};
pub use run::{cmd_replay, cmd_run};
