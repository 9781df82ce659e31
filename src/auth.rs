//! Session token access for the API client.
//!
//! The surrounding app owns login and token storage; the sync core only
//! needs to read the current access token and ask for a refresh when the
//! server rejects it.
use async_trait::async_trait;

use crate::error::ApiError;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, if a session exists.
    async fn access_token(&self) -> Option<String>;

    /// Exchange the stored refresh token for a new access token and
    /// return it. Failure means the session is no longer usable.
    async fn refresh(&self) -> Result<String, ApiError>;
}

/// Fixed-token provider for tools and tests. Has no refresh token, so
/// `refresh` always reports the session as unusable.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Provider with no session at all; requests go out unauthenticated.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Option<String> {
        self.token.clone()
    }

    async fn refresh(&self) -> Result<String, ApiError> {
        Err(ApiError::Unauthorized)
    }
}
