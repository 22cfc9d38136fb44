//! Pre-flight reachability and credential check.

use std::sync::Arc;

use crate::errors::WinprepResult;
use crate::remote::RemoteManager;

pub struct VmConnectionValidator {
    remote: Arc<dyn RemoteManager>,
}

impl VmConnectionValidator {
    pub fn new(remote: Arc<dyn RemoteManager>) -> Self {
        Self { remote }
    }

    /// Reachability errors are returned as-is; login errors are wrapped so
    /// the two cases read differently.
    pub async fn validate(&self) -> WinprepResult<()> {
        self.remote.can_reach_vm().await?;
        self.remote.can_login_vm().await.map_err(|e| {
            e.context("Cannot complete login due to an incorrect VM user name or password")
        })
    }
}
