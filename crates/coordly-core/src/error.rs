// ── Core error types ──
//
// Fetch functions classify their failures into `FetchError`; the
// coordinator matches on the variant instead of guessing from messages.
// `SetupError` is the only error a coordinator ever hands back to its
// caller, and only from the setup-time first refresh.

use std::time::Duration;

use thiserror::Error;

/// Classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials are invalid or expired. Retrying will not help.
    AuthRequired,
    /// Network, timeout, rate limit, or device offline. Expected to clear.
    Unavailable,
    /// Anything the fetch function did not classify.
    Unknown,
}

/// Error returned by a fetch function.
///
/// `Clone` so that one single-flight result can be handed to every caller
/// that joined the same refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("authentication required: {reason}")]
    AuthRequired { reason: String },

    #[error("temporarily unavailable: {reason}")]
    Unavailable {
        reason: String,
        /// Delay the source asked for (e.g. an HTTP `Retry-After`). Replaces
        /// the update interval for the next scheduled refresh only.
        retry_after: Option<Duration>,
    },

    #[error("unexpected error: {message}")]
    Unknown { message: String },
}

impl FetchError {
    pub fn auth_required(reason: impl Into<String>) -> Self {
        Self::AuthRequired {
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Attach a retry delay. No-op for anything but `Unavailable`.
    pub fn with_retry_after(self, delay: Duration) -> Self {
        match self {
            Self::Unavailable { reason, .. } => Self::Unavailable {
                reason,
                retry_after: Some(delay),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRequired { .. } => ErrorKind::AuthRequired,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn is_auth_required(&self) -> bool {
        matches!(self, Self::AuthRequired { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Unavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Error surfaced by [`Coordinator::first_refresh`](crate::Coordinator::first_refresh).
///
/// Hosts map `NotReady` to "retry setup later" and `AuthFailed` to a
/// re-authentication prompt.
#[derive(Debug, Clone, Error)]
pub enum SetupError {
    #[error("{name} is not ready: {source}")]
    NotReady {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error("authentication failed for {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("{name} was shut down before setup completed")]
    ShutDown { name: String },
}

impl SetupError {
    pub(crate) fn from_fetch(name: &str, err: FetchError) -> Self {
        match err {
            FetchError::AuthRequired { reason } => Self::AuthFailed {
                name: name.to_owned(),
                reason,
            },
            other => Self::NotReady {
                name: name.to_owned(),
                source: other,
            },
        }
    }

    /// The underlying fetch error, if setup got as far as fetching.
    pub fn fetch_error(&self) -> Option<FetchError> {
        match self {
            Self::NotReady { source, .. } => Some(source.clone()),
            Self::AuthFailed { reason, .. } => Some(FetchError::auth_required(reason.clone())),
            Self::ShutDown { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_only_sticks_to_unavailable() {
        let err = FetchError::unavailable("rate limited").with_retry_after(Duration::from_secs(30));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

        let err = FetchError::unknown("boom").with_retry_after(Duration::from_secs(30));
        assert_eq!(err.retry_after(), None);
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn setup_error_splits_auth_from_not_ready() {
        let err = SetupError::from_fetch("hub", FetchError::auth_required("token expired"));
        assert!(matches!(err, SetupError::AuthFailed { ref reason, .. } if reason == "token expired"));

        let err = SetupError::from_fetch("hub", FetchError::unavailable("device offline"));
        assert_eq!(
            err.fetch_error(),
            Some(FetchError::unavailable("device offline"))
        );
        assert_eq!(err.to_string(), "hub is not ready: temporarily unavailable: device offline");
    }
}
