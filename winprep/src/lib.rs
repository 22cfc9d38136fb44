//! winprep: prepares a freshly created Windows VM for conversion into a
//! BOSH stemcell.
//!
//! The entry point is [`construct::VmConstruct::prepare_vm`], which drives the
//! guest through validation, artifact upload, WinRM bootstrap, the setup
//! script and the reboot it triggers.

pub mod archive;
pub mod assets;
pub mod cancel;
pub mod config;
pub mod construct;
pub mod enabler;
pub mod errors;
pub mod guest;
pub mod logging;
pub mod pipeline;
pub mod poller;
pub mod remote;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{WinprepError, WinprepResult};
