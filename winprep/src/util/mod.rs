//! Small helpers shared across components.

mod powershell;
mod retry;

pub use powershell::{encode_powershell_command, escape_powershell_literal};
pub use retry::retry_bounded;
