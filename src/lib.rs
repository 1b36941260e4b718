pub mod block;
pub mod config;
pub mod document;
pub mod errors;
pub mod filter;
pub mod prompt;
pub mod runner;
pub mod session;
pub mod trace;
pub mod ui;
pub mod vars;
