//! REST client for the support backend.
//!
//! [`SupportApi`] is the seam between the sync engine and the network;
//! the engine (and the retry queue in particular) only ever talks to this
//! trait, so tests substitute a scripted implementation.

use std::time::Duration;

use serde::Serialize;
use swiftdrop_proto::conversation::ConversationId;
use swiftdrop_proto::history::{HistoryRequest, HistoryResponse, SendResponse};
use swiftdrop_proto::message::{MessageId, MessageKind, SendRequest, TempId};
use url::Url;

use crate::config::SyncConfig;

/// Errors from talking to the support backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status}")]
    Http {
        /// The HTTP status code.
        status: u16,
    },

    /// The conversation does not exist (or is not visible to this user).
    #[error("conversation not found")]
    NotFound,

    /// Transport-level failure (DNS, TCP, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether a send that hit this error is worth retrying.
    ///
    /// Timeouts, transport failures, and server-side errors are transient;
    /// 4xx responses mean the request itself is bad and a replay will fail
    /// the same way.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Http { status } => *status >= 500,
            Self::NotFound | Self::Decode(_) => false,
        }
    }
}

/// The support backend's REST surface, as the engine sees it.
pub trait SupportApi: Send + Sync {
    /// Fetch a page of conversation history, newest page when
    /// `request.older_than` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on timeout, transport failure, non-success
    /// status, or an undecodable body.
    fn fetch_history(
        &self,
        conversation: &ConversationId,
        request: &HistoryRequest,
    ) -> impl std::future::Future<Output = Result<HistoryResponse, ApiError>> + Send;

    /// Send a message. The `temp_id` accompanies the payload so the
    /// backend can echo it back for optimistic reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on timeout, transport failure, non-success
    /// status, or an undecodable body.
    fn send_message(
        &self,
        conversation: &ConversationId,
        temp_id: TempId,
        payload: &SendRequest,
    ) -> impl std::future::Future<Output = Result<SendResponse, ApiError>> + Send;

    /// Report that the local user has read the conversation up to
    /// `message_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on timeout, transport failure, or a
    /// non-success status.
    fn mark_read(
        &self,
        conversation: &ConversationId,
        message_id: &MessageId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Serialize)]
struct SendBody<'a> {
    temp_id: TempId,
    content: &'a str,
    message_type: MessageKind,
}

#[derive(Serialize)]
struct MarkReadBody<'a> {
    message_id: &'a MessageId,
}

/// [`SupportApi`] over HTTP using `reqwest`.
pub struct HttpSupportApi {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpSupportApi {
    /// Creates a client rooted at `base` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(base: Url, token: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base,
            token: token.into(),
        })
    }

    /// Creates a client with the per-request timeout taken from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn from_config(
        base: Url,
        token: impl Into<String>,
        config: &SyncConfig,
    ) -> Result<Self, ApiError> {
        Self::new(base, token, config.request_timeout)
    }

    fn endpoint(&self, conversation: &ConversationId, tail: &str) -> Result<Url, ApiError> {
        self.base
            .join(&format!("conversations/{}/{tail}", conversation.as_str()))
            .map_err(|e| ApiError::Network(e.to_string()))
    }

    fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn map_transport(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Network(err.to_string())
    }
}

impl SupportApi for HttpSupportApi {
    async fn fetch_history(
        &self,
        conversation: &ConversationId,
        request: &HistoryRequest,
    ) -> Result<HistoryResponse, ApiError> {
        let url = self.endpoint(conversation, "messages")?;
        let mut builder = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("limit", request.limit)]);
        if let Some(cursor) = &request.older_than {
            builder = builder.query(&[("older_than", cursor.as_str())]);
        }
        let response = builder.send().await.map_err(|e| map_transport(&e))?;
        Self::check(response)?
            .json::<HistoryResponse>()
            .await
            .map_err(|e| map_transport(&e))
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        temp_id: TempId,
        payload: &SendRequest,
    ) -> Result<SendResponse, ApiError> {
        let url = self.endpoint(conversation, "messages")?;
        let body = SendBody {
            temp_id,
            content: &payload.content,
            message_type: payload.message_type,
        };
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport(&e))?;
        Self::check(response)?
            .json::<SendResponse>()
            .await
            .map_err(|e| map_transport(&e))
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(conversation, "read")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&MarkReadBody { message_id })
            .send()
            .await
            .map_err(|e| map_transport(&e))?;
        Self::check(response).map(|_| ())
    }
}
