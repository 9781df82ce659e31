//! HTTP client for the VerseMate backend.
//!
//! Every mutating request goes through one send path that attaches the
//! bearer token and, on a 401 outside the auth endpoints, refreshes the
//! session and retries exactly once.
use async_trait::async_trait;
use reqwest::{header, Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::error::ApiError;
use crate::api::model::{
    HighlightChange, ManifestLanguage, ManifestVersion, NewFavorite, NewHighlight, NewNote,
    NoteChange, OfflineManifest, PositionUpdate, RemoteExplanation, RemoteFavorite,
    RemoteHighlight, RemoteNote, RemoteVerse, TopicsBundle,
};

pub mod model;

const DEFAULT_API_BASE: &str = "https://api.versemate.org/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parsed payload plus the raw body size, kept for download metadata.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub data: T,
    pub size_bytes: i64,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// User-facing mutations and hydration reads, mocked in tests.
#[async_trait]
pub trait SyncApi: Send + Sync {
    async fn create_note(&self, note: &NewNote) -> Result<RemoteNote, ApiError>;
    async fn update_note(&self, note_id: &str, change: &NoteChange)
        -> Result<RemoteNote, ApiError>;
    async fn delete_note(&self, note_id: &str) -> Result<(), ApiError>;
    async fn list_notes(&self) -> Result<Vec<RemoteNote>, ApiError>;

    async fn create_highlight(&self, highlight: &NewHighlight)
        -> Result<RemoteHighlight, ApiError>;
    async fn update_highlight(
        &self,
        highlight_id: i64,
        change: &HighlightChange,
    ) -> Result<RemoteHighlight, ApiError>;
    async fn delete_highlight(&self, highlight_id: i64) -> Result<(), ApiError>;
    async fn list_highlights(&self) -> Result<Vec<RemoteHighlight>, ApiError>;

    async fn create_favorite(&self, favorite: &NewFavorite) -> Result<RemoteFavorite, ApiError>;
    async fn delete_favorite(&self, favorite_id: i64) -> Result<(), ApiError>;
    async fn list_favorites(&self) -> Result<Vec<RemoteFavorite>, ApiError>;

    async fn report_position(&self, position: &PositionUpdate) -> Result<(), ApiError>;
}

/// Bulk offline-content downloads.
#[async_trait]
pub trait ContentApi: Send + Sync {
    async fn fetch_manifest(&self) -> Result<OfflineManifest, ApiError>;
    async fn fetch_bible(&self, version_key: &str) -> Result<Fetched<Vec<RemoteVerse>>, ApiError>;
    async fn fetch_commentaries(
        &self,
        language_code: &str,
    ) -> Result<Fetched<Vec<RemoteExplanation>>, ApiError>;
    async fn fetch_topics(&self, language_code: &str) -> Result<Fetched<TopicsBundle>, ApiError>;
}

/// Paths under `auth/` carry credentials in the body; a 401 from them is
/// final and must not trigger a token refresh.
fn is_auth_path(path: &str) -> bool {
    path.starts_with("auth/")
}

/// One place decides whether a response re-enters the send loop.
fn should_refresh(status: StatusCode, retry_count: u32, path: &str) -> bool {
    status == StatusCode::UNAUTHORIZED && retry_count == 0 && !is_auth_path(path)
}

fn encode<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Decode(format!("request body: {e}")))
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, ApiError> {
    let body = res.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

impl ApiClient {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        let base_url = Url::parse(DEFAULT_API_BASE).expect("valid default API URL");
        Self::with_base_url(tokens, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(tokens: Arc<dyn TokenProvider>, base_url: Url, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("versemate-core/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            tokens,
        }
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<reqwest::Request, ApiError> {
        let endpoint = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::Endpoint(format!("{path}: {e}")))?;
        let mut req = self.http.request(method, endpoint);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.build()?)
    }

    /// Send a request, refreshing the session and retrying exactly once if
    /// the access token is rejected. `retry_count` tracks how many refresh
    /// retries this call has already used.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, ApiError> {
        let mut retry_count: u32 = 0;
        loop {
            // Rebuilt every pass so a refreshed token is picked up.
            let token = self.tokens.access_token().await;
            let request = self.build_request(method.clone(), path, token.as_deref(), body.as_ref())?;
            debug!(%method, path, retry_count, "api request");
            let res = self.http.execute(request).await?;

            if should_refresh(res.status(), retry_count, path) {
                debug!(path, "access token rejected, refreshing session");
                // A failed refresh surfaces the original 401, not the
                // refresh transport error.
                if self.tokens.refresh().await.is_err() {
                    warn!(path, "session refresh failed");
                    return Err(ApiError::Unauthorized);
                }
                retry_count += 1;
                continue;
            }

            let status = res.status();
            if status.is_success() {
                return Ok(res);
            }
            if status == StatusCode::UNAUTHORIZED {
                warn!(path, "still unauthorized after refresh");
                return Err(ApiError::Unauthorized);
            }
            let message = res.text().await.unwrap_or_default();
            warn!(path, status = status.as_u16(), "api error: {message}");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let res = self.send(Method::GET, path, None).await?;
        decode(res).await
    }

    /// GET that keeps the raw body length for download metadata.
    async fn get_json_sized<T: DeserializeOwned>(&self, path: &str) -> Result<Fetched<T>, ApiError> {
        let res = self.send(Method::GET, path, None).await?;
        let body = res.text().await?;
        let size_bytes = body.len() as i64;
        let data =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(Fetched { data, size_bytes })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let res = self.send(Method::POST, path, Some(encode(body)?)).await?;
        decode(res).await
    }

    async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let res = self.send(Method::PUT, path, Some(encode(body)?)).await?;
        decode(res).await
    }

    async fn put_no_content<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        self.send(Method::PUT, path, Some(encode(body)?)).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }
}

#[async_trait]
impl SyncApi for ApiClient {
    async fn create_note(&self, note: &NewNote) -> Result<RemoteNote, ApiError> {
        self.post_json("notes", note).await
    }

    async fn update_note(
        &self,
        note_id: &str,
        change: &NoteChange,
    ) -> Result<RemoteNote, ApiError> {
        self.put_json(&format!("notes/{note_id}"), change).await
    }

    async fn delete_note(&self, note_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("notes/{note_id}")).await
    }

    async fn list_notes(&self) -> Result<Vec<RemoteNote>, ApiError> {
        self.get_json("notes").await
    }

    async fn create_highlight(
        &self,
        highlight: &NewHighlight,
    ) -> Result<RemoteHighlight, ApiError> {
        self.post_json("highlights", highlight).await
    }

    async fn update_highlight(
        &self,
        highlight_id: i64,
        change: &HighlightChange,
    ) -> Result<RemoteHighlight, ApiError> {
        self.put_json(&format!("highlights/{highlight_id}"), change)
            .await
    }

    async fn delete_highlight(&self, highlight_id: i64) -> Result<(), ApiError> {
        self.delete(&format!("highlights/{highlight_id}")).await
    }

    async fn list_highlights(&self) -> Result<Vec<RemoteHighlight>, ApiError> {
        self.get_json("highlights").await
    }

    async fn create_favorite(&self, favorite: &NewFavorite) -> Result<RemoteFavorite, ApiError> {
        self.post_json("favorites", favorite).await
    }

    async fn delete_favorite(&self, favorite_id: i64) -> Result<(), ApiError> {
        self.delete(&format!("favorites/{favorite_id}")).await
    }

    async fn list_favorites(&self) -> Result<Vec<RemoteFavorite>, ApiError> {
        self.get_json("favorites").await
    }

    async fn report_position(&self, position: &PositionUpdate) -> Result<(), ApiError> {
        self.put_no_content("reading-position", position).await
    }
}

#[async_trait]
impl ContentApi for ApiClient {
    async fn fetch_manifest(&self) -> Result<OfflineManifest, ApiError> {
        self.get_json("offline/manifest").await
    }

    async fn fetch_bible(&self, version_key: &str) -> Result<Fetched<Vec<RemoteVerse>>, ApiError> {
        self.get_json_sized(&format!("offline/bible/{version_key}"))
            .await
    }

    async fn fetch_commentaries(
        &self,
        language_code: &str,
    ) -> Result<Fetched<Vec<RemoteExplanation>>, ApiError> {
        self.get_json_sized(&format!("offline/commentaries/{language_code}"))
            .await
    }

    async fn fetch_topics(&self, language_code: &str) -> Result<Fetched<TopicsBundle>, ApiError> {
        self.get_json_sized(&format!("offline/topics/{language_code}"))
            .await
    }
}

impl OfflineManifest {
    pub fn bible_version(&self, key: &str) -> Option<&ManifestVersion> {
        self.bible_versions.iter().find(|v| v.key == key)
    }

    pub fn commentary_language(&self, code: &str) -> Option<&ManifestLanguage> {
        self.commentary_languages.iter().find(|l| l.code == code)
    }

    pub fn topic_language(&self, code: &str) -> Option<&ManifestLanguage> {
        self.topic_languages.iter().find(|l| l.code == code)
    }
}
