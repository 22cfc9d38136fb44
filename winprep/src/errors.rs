//! Error types shared by every winprep component.
//!
//! Variants follow the failure classes a provisioning session can hit:
//!
//! - transport faults: `Unreachable`, `Authentication`, `Transport`
//! - remote command faults: `RemoteCommand`
//! - protocol/encoding faults: `InvalidArchive`, `EntryNotFound`,
//!   `InvalidOutput`, `AssetNotFound`
//! - orchestration faults: `Timeout`, `Phase`
//!
//! Causes are wrapped with a prefix via [`WinprepError::context`], so the
//! rendered chain reads `prefix: cause`.

use thiserror::Error;

pub type WinprepResult<T> = Result<T, WinprepError>;

#[derive(Debug, Error)]
pub enum WinprepError {
    /// Guest network endpoint cannot be reached.
    #[error("{0}")]
    Unreachable(String),

    /// Guest rejected the credentials.
    #[error("{0}")]
    Authentication(String),

    /// Request to the guest or management plane failed before a command ran.
    #[error("{0}")]
    Transport(String),

    /// A command ran on the guest and reported failure.
    #[error("command `{command}` exited with non-zero exit code {exit_code}")]
    RemoteCommand { command: String, exit_code: i32 },

    #[error("invalid zip archive: {0}")]
    InvalidArchive(String),

    #[error("could not find {0} in zip archive")]
    EntryNotFound(String),

    /// Guest or management plane answered with something we cannot parse.
    #[error("{0}")]
    InvalidOutput(String),

    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Cooperative cancellation observed.
    #[error("interrupt")]
    Interrupted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A provisioning phase failed; later phases were skipped.
    #[error("{phase} failed: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<WinprepError>,
    },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<WinprepError>,
    },
}

impl WinprepError {
    /// Wrap this error with a prefix describing what was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        WinprepError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Name of the phase that terminated the session, if any.
    pub fn failed_phase(&self) -> Option<&str> {
        match self {
            WinprepError::Phase { phase, .. } => Some(phase),
            WinprepError::Context { source, .. } => source.failed_phase(),
            _ => None,
        }
    }

    /// Innermost cause, skipping phase and context wrappers.
    pub fn root_cause(&self) -> &WinprepError {
        match self {
            WinprepError::Phase { source, .. } | WinprepError::Context { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.root_cause(), WinprepError::Interrupted)
    }
}

impl From<std::io::Error> for WinprepError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::Interrupted {
            return WinprepError::Interrupted;
        }
        WinprepError::Storage(err.to_string())
    }
}
