//! Outcomes of calls whose answer may never arrive.

use std::future::Future;
use std::time::Duration;

use sysproc_common::{Result, SysprocError};
use tracing::warn;

/// Result of a call made with a response deadline.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Completed(T),
    /// No answer: the call may or may not have taken effect.
    Unknown { reason: String },
}

/// What a caller does with [`CallOutcome::Unknown`]. Deliberately has no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownResponsePolicy {
    /// Fail the operation.
    Fail,
    /// Log, count and carry on.
    Ignore,
}

impl UnknownResponsePolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "ignore" => Ok(Self::Ignore),
            other => Err(SysprocError::Validation(format!(
                "unknown response policy '{other}', expected fail or ignore"
            ))),
        }
    }
}

impl<T> CallOutcome<T> {
    /// Apply `policy`; `Ok(None)` means an ignored unknown outcome.
    pub fn resolve(self, policy: UnknownResponsePolicy, what: &str) -> Result<Option<T>> {
        match self {
            CallOutcome::Completed(v) => Ok(Some(v)),
            CallOutcome::Unknown { reason } => match policy {
                UnknownResponsePolicy::Ignore => {
                    warn!(call = what, reason = %reason, "response unknown; continuing");
                    Ok(None)
                }
                UnknownResponsePolicy::Fail => Err(SysprocError::Execution(format!(
                    "response to {what} unknown: {reason}"
                ))),
            },
        }
    }
}

/// Await `call`, turning a missed deadline or a site disconnect into
/// [`CallOutcome::Unknown`]. Other errors propagate unchanged.
///
/// The call is not cancelled remotely on timeout; work already scattered
/// keeps running.
pub async fn call_with_timeout<T, F>(timeout: Option<Duration>, call: F) -> Result<CallOutcome<T>>
where
    F: Future<Output = Result<T>>,
{
    let result = match timeout {
        Some(t) => match tokio::time::timeout(t, call).await {
            Ok(r) => r,
            Err(_) => {
                return Ok(CallOutcome::Unknown {
                    reason: format!("no response within {} ms", t.as_millis()),
                });
            }
        },
        None => call.await,
    };
    match result {
        Ok(v) => Ok(CallOutcome::Completed(v)),
        Err(SysprocError::SiteDisconnected { site, reason, .. }) => Ok(CallOutcome::Unknown {
            reason: format!("site {site} disconnected: {reason}"),
        }),
        Err(e) => Err(e),
    }
}
