//! Cooperative cancellation.
//!
//! A single [`CancellationToken`] is created per session and handed to every
//! long-running component. Cancellation never preempts an in-flight remote
//! call; it is observed at the next I/O operation through [`CancelReader`] /
//! [`CancelWriter`], at the next poller tick, or by killing a running
//! management-plane subprocess.
//!
//! ```text
//! SIGINT #1 ──→ token.cancel() + scratch cleanup ──→ next I/O returns "interrupt"
//! SIGINT #2 ──→ scratch cleanup ──→ process::exit(1)
//! ```

mod io;
mod scratch;
mod signal;

pub use io::{CancelReader, CancelWriter, interrupt_error};
pub use scratch::ScratchDir;
pub use signal::{SignalAction, SignalState, install_signal_handler};
pub use tokio_util::sync::CancellationToken;
