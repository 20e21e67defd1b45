//! Side-effecting adapters: processes, files, git, backends and the run log.

pub mod backend;
pub mod cancel;
pub mod config;
pub mod context;
pub mod documents;
pub mod git;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod verify;
pub mod workspace;
