//! Guest operations through the virtualization management plane.
//!
//! Used where the guest's own remote-execution daemon is not available yet:
//! enabling it, and querying the guest OS version before provisioning. The
//! power state query is answered by the management plane itself and needs no
//! guest login.

mod govc;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::errors::WinprepResult;

pub use govc::{GovcGuestManager, GovcOptions};

/// A file copied out of the guest.
pub struct GuestDownload {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    /// Length in bytes of the downloaded file.
    pub size: i64,
}

impl GuestDownload {
    #[cfg(test)]
    pub(crate) fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len() as i64;
        Self {
            reader: Box::pin(std::io::Cursor::new(data)),
            size,
        }
    }
}

#[async_trait]
pub trait GuestManager: Send + Sync {
    /// Start `command args` in the guest and return its process id.
    async fn start_program_in_guest(&self, command: &str, args: &str) -> WinprepResult<i64>;

    /// Wait for a started process to exit and return its exit code.
    async fn exit_code_for_program_in_guest(&self, pid: i64) -> WinprepResult<i32>;

    async fn download_file_in_guest(&self, path: &str) -> WinprepResult<GuestDownload>;

    /// Has the VM reached the `poweredOff` state?
    async fn is_powered_off(&self) -> WinprepResult<bool>;
}
