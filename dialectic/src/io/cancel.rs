//! Cooperative cancellation shared between the Ctrl-C handler, running child
//! processes and the turn loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Install a SIGINT handler that trips `flag`. A second Ctrl-C exits immediately.
pub fn install_ctrlc_handler(flag: &CancelFlag) -> Result<()> {
    let flag = flag.clone();
    ctrlc::set_handler(move || {
        if flag.is_cancelled() {
            std::process::exit(crate::exit_codes::INTERRUPTED);
        }
        warn!("interrupt received, stopping after the current step");
        flag.cancel();
    })
    .context("install Ctrl-C handler")
}
