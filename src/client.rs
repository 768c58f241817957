//! Typed HTTP client for the meme REST API.

use crate::models::{
    AdminStats, CommentRequest, CreateMemeRequest, HealthResponse, MemePage, MemeRecord, MessageResponse, VoteKind,
    VoteRequest,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid API base URL '{0}'")]
    InvalidBaseUrl(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server responded {status}: {message}")]
    Api { status: StatusCode, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status(),
            ClientError::InvalidBaseUrl(_) => None,
        }
    }
}

/// The REST surface, as the feed store and the CLI consume it.
#[async_trait]
pub trait MemeApi: Send + Sync {
    async fn list_memes(&self, page: u32, limit: u32) -> Result<MemePage, ClientError>;
    async fn get_meme(&self, id: Uuid) -> Result<MemeRecord, ClientError>;
    async fn list_user_memes(&self, uid: &str) -> Result<Vec<MemeRecord>, ClientError>;
    async fn create_meme(&self, req: &CreateMemeRequest) -> Result<MemeRecord, ClientError>;
    /// `None` clears the caller's vote.
    async fn vote(&self, id: Uuid, kind: Option<VoteKind>) -> Result<MemeRecord, ClientError>;
    async fn comment(&self, id: Uuid, text: &str) -> Result<MemeRecord, ClientError>;
    async fn delete_meme(&self, id: Uuid) -> Result<MessageResponse, ClientError>;
    async fn admin_stats(&self) -> Result<AdminStats, ClientError>;
    async fn admin_delete_meme(&self, id: Uuid) -> Result<MessageResponse, ClientError>;
    async fn health(&self) -> Result<HealthResponse, ClientError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// `base_url` includes the `/api` prefix, e.g. `http://localhost:5000/api`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ClientError::InvalidBaseUrl(base_url.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: RwLock::new(None),
        })
    }

    /// Bearer token sent with every following request. `None` makes requests anonymous.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match self.token.read().await.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or_else(|_| {
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("unknown error").to_string()
                } else {
                    text
                }
            });
        tracing::debug!(%status, %message, "API request failed");
        Err(ClientError::Api { status, message })
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let builder = self.request(Method::GET, url).await;
        self.send(builder).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, url: Url, body: &B) -> Result<T, ClientError> {
        let builder = self.request(Method::POST, url).await.json(body);
        self.send(builder).await
    }

    async fn delete<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let builder = self.request(Method::DELETE, url).await;
        self.send(builder).await
    }
}

#[async_trait]
impl MemeApi for ApiClient {
    async fn list_memes(&self, page: u32, limit: u32) -> Result<MemePage, ClientError> {
        let mut url = self.endpoint(&["memes"]);
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        self.get(url).await
    }

    async fn get_meme(&self, id: Uuid) -> Result<MemeRecord, ClientError> {
        self.get(self.endpoint(&["memes", id.to_string().as_str()])).await
    }

    async fn list_user_memes(&self, uid: &str) -> Result<Vec<MemeRecord>, ClientError> {
        self.get(self.endpoint(&["memes", "user", uid])).await
    }

    async fn create_meme(&self, req: &CreateMemeRequest) -> Result<MemeRecord, ClientError> {
        self.post(self.endpoint(&["memes"]), req).await
    }

    async fn vote(&self, id: Uuid, kind: Option<VoteKind>) -> Result<MemeRecord, ClientError> {
        let url = self.endpoint(&["memes", id.to_string().as_str(), "vote"]);
        self.post(url, &VoteRequest { kind }).await
    }

    async fn comment(&self, id: Uuid, text: &str) -> Result<MemeRecord, ClientError> {
        let url = self.endpoint(&["memes", id.to_string().as_str(), "comments"]);
        self.post(url, &CommentRequest { text: text.to_string() }).await
    }

    async fn delete_meme(&self, id: Uuid) -> Result<MessageResponse, ClientError> {
        self.delete(self.endpoint(&["memes", id.to_string().as_str()])).await
    }

    async fn admin_stats(&self) -> Result<AdminStats, ClientError> {
        self.get(self.endpoint(&["admin", "stats"])).await
    }

    async fn admin_delete_meme(&self, id: Uuid) -> Result<MessageResponse, ClientError> {
        self.delete(self.endpoint(&["admin", "memes", id.to_string().as_str()])).await
    }

    async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get(self.endpoint(&["health"])).await
    }
}
