//! Persistence service contract and its HTTP client.
//!
//! The service itself (schema, retries) lives elsewhere; this module only
//! speaks its call shapes.

pub mod cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use shared_types::{Document, SaveDocumentRequest, Thread, ThreadGroup, VoteRequest};

use crate::transport::{CredentialError, TokenSource};

pub use cache::ThreadCache;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("persistence responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn fetch_thread(&self, thread_id: &str) -> Result<Thread, PersistenceError>;

    async fn fetch_thread_groups(&self) -> Result<Vec<ThreadGroup>, PersistenceError>;

    async fn fetch_latest_document(&self, document_id: &str) -> Result<Document, PersistenceError>;

    async fn fetch_document_version(
        &self,
        document_id: &str,
        version_number: u32,
    ) -> Result<Document, PersistenceError>;

    /// Store a new latest version.
    async fn save_document(
        &self,
        document_id: &str,
        request: SaveDocumentRequest,
    ) -> Result<Document, PersistenceError>;

    async fn submit_vote(&self, message_id: &str, request: VoteRequest)
        -> Result<(), PersistenceError>;
}

pub struct HttpPersistence {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpPersistence {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        connect_timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, PersistenceError> {
        Ok(match self.tokens.bearer_token().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PersistenceError> {
        let builder = self.authorized(self.client.get(self.url(path))).await?;
        let response = check_status(path, builder.send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PersistenceError::Decode(e.to_string()))
    }
}

async fn check_status(
    path: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, PersistenceError> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(PersistenceError::NotFound(path.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PersistenceError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl Persistence for HttpPersistence {
    async fn fetch_thread(&self, thread_id: &str) -> Result<Thread, PersistenceError> {
        self.get_json(&format!("/api/threads/{thread_id}")).await
    }

    async fn fetch_thread_groups(&self) -> Result<Vec<ThreadGroup>, PersistenceError> {
        self.get_json("/api/threads").await
    }

    async fn fetch_latest_document(&self, document_id: &str) -> Result<Document, PersistenceError> {
        self.get_json(&format!("/api/documents/{document_id}")).await
    }

    async fn fetch_document_version(
        &self,
        document_id: &str,
        version_number: u32,
    ) -> Result<Document, PersistenceError> {
        self.get_json(&format!(
            "/api/documents/{document_id}/versions/{version_number}"
        ))
        .await
    }

    async fn save_document(
        &self,
        document_id: &str,
        request: SaveDocumentRequest,
    ) -> Result<Document, PersistenceError> {
        let path = format!("/api/documents/{document_id}");
        let builder = self
            .authorized(self.client.post(self.url(&path)).json(&request))
            .await?;
        let response = check_status(&path, builder.send().await?).await?;
        response
            .json::<Document>()
            .await
            .map_err(|e| PersistenceError::Decode(e.to_string()))
    }

    async fn submit_vote(
        &self,
        message_id: &str,
        request: VoteRequest,
    ) -> Result<(), PersistenceError> {
        let path = format!("/api/messages/{message_id}/vote");
        let builder = self
            .authorized(self.client.post(self.url(&path)).json(&request))
            .await?;
        check_status(&path, builder.send().await?).await?;
        Ok(())
    }
}
