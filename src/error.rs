use thiserror::Error;

/// Failures surfaced by the remote API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure before a status line was read.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// 401 that survived the single refresh-and-retry. The auth collaborator
    /// treats this as a sign-out trigger.
    #[error("unauthorized")]
    Unauthorized,

    /// Non-2xx response with whatever body the server attached.
    #[error("server error {status}: {message}")]
    Status { status: u16, message: String },

    /// 2xx response whose body did not decode into the expected shape,
    /// or a request body that could not be encoded.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Request could not be constructed from the given path.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl ApiError {
    /// Whether retrying the same request later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::Unauthorized | ApiError::Decode(_) | ApiError::Endpoint(_) => false,
        }
    }
}

/// Failures surfaced to UI hooks by the mutation services. Everything here is
/// user-actionable; storage-layer problems are absorbed and logged instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Input rejected before any optimistic state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The addressed entity is not in the local mirror.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote call failed and the optimistic change was rolled back.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The local mirror itself failed mid-mutation. Rare; surfaced rather
    /// than absorbed because the optimistic write may be half-applied.
    #[error("local storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ApiError::Status {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(ApiError::Status {
            status: 429,
            message: "slow down".into()
        }
        .is_transient());
        assert!(!ApiError::Status {
            status: 404,
            message: "missing".into()
        }
        .is_transient());
        assert!(!ApiError::Unauthorized.is_transient());
        assert!(!ApiError::Decode("bad json".into()).is_transient());
    }
}
