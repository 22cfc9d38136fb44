//! Interrupt handling: first signal cancels, second signal exits.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ScratchDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Cooperative cancel: flip the token, let in-flight calls drain.
    Cancel,
    /// Hard abort: clean up and exit now.
    Exit,
}

/// Tracks how many interrupts have been received.
#[derive(Debug, Default)]
pub struct SignalState {
    stopping: bool,
}

impl SignalState {
    pub fn on_signal(&mut self) -> SignalAction {
        if self.stopping {
            SignalAction::Exit
        } else {
            self.stopping = true;
            SignalAction::Cancel
        }
    }
}

/// Listen for Ctrl-C for the lifetime of the process.
pub fn install_signal_handler(token: CancellationToken, scratch: Arc<ScratchDir>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = SignalState::default();
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for interrupt signal: {}", e);
                return;
            }
            let action = state.on_signal();
            apply(action, &token, &scratch);
            if action == SignalAction::Exit {
                std::process::exit(1);
            }
        }
    })
}

/// The scratch directory stays in place on the first signal; the session
/// removes it once in-flight work has drained.
fn apply(action: SignalAction, token: &CancellationToken, scratch: &ScratchDir) {
    match action {
        SignalAction::Cancel => {
            tracing::warn!("Received interrupt, cleaning up");
            token.cancel();
        }
        SignalAction::Exit => {
            tracing::error!("Received second interrupt - exiting now");
            scratch.cleanup();
        }
    }
}
