//! Dialectical multi-agent loop.
//!
//! A Planner turns requirements into a checklist specification, then an
//! Implementer and a Reviewer alternate in bounded turns until the Reviewer
//! approves, the turn budget runs out, or the run is interrupted.
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, state machine, health
//!   metrics, snapshot budgeting, cache fingerprints). No I/O.
//! - **[`io`]**: Side-effecting operations (processes, filesystem, git, role
//!   backends, the run log). Behind traits where tests need fakes.
//!
//! [`controller`] coordinates the two to implement `dialectic run`.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
