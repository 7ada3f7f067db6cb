use thiserror::Error;

use crate::ids::{DependencyId, FragmentId, SiteId};

/// Canonical error taxonomy shared by every sysproc crate.
///
/// Classification guidance:
/// - [`SysprocError::Validation`]: bad request detected before any fragment is scattered
/// - [`SysprocError::Planning`]: malformed fragment graph (cycles, missing producers)
/// - [`SysprocError::SiteAbort`]: a site raised while executing a fragment
/// - [`SysprocError::SiteDisconnected`]: a site never produced its partial result
/// - [`SysprocError::Reconciliation`]: replicas disagree on a value that must match
/// - [`SysprocError::Coordination`]: version conflicts and held locks in the coordination store
/// - [`SysprocError::Execution`]: other runtime failures after planning succeeded
#[derive(Debug, Error)]
pub enum SysprocError {
    /// Request rejected before touching partition state.
    ///
    /// Examples:
    /// - unknown table or column
    /// - non-positive chunk size
    /// - filter column without an ordered index
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid or inconsistent configuration/catalog state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Fragment graph shape errors discovered before scattering.
    #[error("planning error: {0}")]
    Planning(String),

    /// A site raised while executing a fragment. First abort wins.
    #[error("site {site} aborted fragment {fragment}: {message}")]
    SiteAbort {
        /// Site that raised.
        site: SiteId,
        /// Fragment being executed.
        fragment: FragmentId,
        /// Abort message reported by the site.
        message: String,
    },

    /// A site did not deliver its partial result for a dependency.
    #[error("site {site} disconnected before producing dependency {dependency}: {reason}")]
    SiteDisconnected {
        /// Site that went silent.
        site: SiteId,
        /// Dependency id that stayed incomplete.
        dependency: DependencyId,
        /// Transport-level reason (timeout, channel closed, panic).
        reason: String,
    },

    /// Replicated results diverged; signals corruption and is never resolved silently.
    #[error("replica reconciliation failed: {0}")]
    Reconciliation(String),

    /// Version-checked write lost a race or a named lock is held elsewhere.
    #[error("coordination error: {0}")]
    Coordination(String),

    /// Runtime failures not covered by the more specific variants.
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for behavior that is intentionally not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl SysprocError {
    /// Whether the error was raised before any fragment was scattered.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidConfig(_))
    }

    /// Whether the error came out of a running plan (site abort/disconnect).
    pub fn is_mid_flight(&self) -> bool {
        matches!(self, Self::SiteAbort { .. } | Self::SiteDisconnected { .. })
    }
}

/// Standard sysproc result alias.
pub type Result<T> = std::result::Result<T, SysprocError>;
