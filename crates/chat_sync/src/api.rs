//! Server HTTP contract
//!
//! [`ChatApi`] is the seam the engine talks through; [`HttpChatApi`] is the
//! production implementation. Tests substitute a recording mock.

use crate::protocol::{Envelope, PullResponse, SendResponse};
use crate::{Result, SyncError};
use chat_common::{sanitizer::redact, ConversationId, StreamToken};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;

/// Operations the sync engine needs from the server
pub trait ChatApi: Send + Sync + 'static {
    /// `GET /messages` from `from` (exclusive)
    fn fetch_messages(
        &self,
        from: StreamToken,
        limit: u32,
    ) -> impl Future<Output = Result<PullResponse>> + Send;

    /// Fire-and-forget cursor acknowledgement
    fn report_cursor(
        &self,
        token: StreamToken,
        conversation: Option<ConversationId>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn send_private(
        &self,
        peer_id: String,
        content: String,
    ) -> impl Future<Output = Result<SendResponse>> + Send;

    fn send_group(
        &self,
        group_id: String,
        content: String,
    ) -> impl Future<Output = Result<SendResponse>> + Send;

    fn create_conversation(&self, id: ConversationId) -> impl Future<Output = Result<()>> + Send;

    fn set_pinned(
        &self,
        id: ConversationId,
        pinned: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_conversation(&self, id: ConversationId) -> impl Future<Output = Result<()>> + Send;

    fn mark_private_read(&self, message_id: String) -> impl Future<Output = Result<()>> + Send;

    fn mark_group_read(
        &self,
        group_id: String,
        last_message_id: String,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Serialize)]
struct CursorReport {
    last_seen_stream_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    peer_id: Option<String>,
}

impl CursorReport {
    fn new(token: StreamToken, conversation: Option<&ConversationId>) -> Self {
        Self {
            last_seen_stream_id: token.to_string(),
            conversation_type: conversation.map(|c| c.kind().as_str()),
            peer_id: conversation.map(|c| c.peer_id().to_string()),
        }
    }
}

/// `reqwest`-backed [`ChatApi`]
#[derive(Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base: String,
}

impl HttpChatApi {
    /// Build a client for `api_base` (e.g. `http://host:8080/api/v1`) that
    /// sends `credential` as a bearer token on every request
    pub fn new(api_base: &str, credential: &str, timeout: Duration) -> Result<Self> {
        reqwest::Url::parse(api_base)
            .map_err(|e| SyncError::ConfigError(anyhow::anyhow!("invalid api_base: {}", e)))?;

        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", credential))
            .map_err(|_| SyncError::Auth("credential is not a valid header value".to_string()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(path);
        tracing::debug!("{} {}", method, redact(&url));

        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Auth(format!("HTTP {}", status)));
        }

        let text = response.text().await?;
        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(SyncError::Server {
                    code: i64::from(status.as_u16()),
                    message: text.chars().take(200).collect(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = serde_json::from_value(value.clone())?;
        envelope.check()?;
        if !status.is_success() {
            return Err(SyncError::Server {
                code: i64::from(status.as_u16()),
                message: envelope.message.unwrap_or_default(),
            });
        }

        Ok(serde_json::from_value(value)?)
    }

    async fn call_unit(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        self.call::<Envelope>(method, path, body, &[]).await.map(|_| ())
    }
}

impl ChatApi for HttpChatApi {
    async fn fetch_messages(&self, from: StreamToken, limit: u32) -> Result<PullResponse> {
        let query = [
            ("from_stream_id", from.to_string()),
            ("limit", limit.to_string()),
            ("include_read", "true".to_string()),
            ("auto_mark", "false".to_string()),
        ];
        self.call(Method::GET, "messages", None, &query).await
    }

    async fn report_cursor(
        &self,
        token: StreamToken,
        conversation: Option<ConversationId>,
    ) -> Result<()> {
        let report = CursorReport::new(token, conversation.as_ref());
        self.call_unit(Method::POST, "messages/cursor", Some(serde_json::to_value(report)?))
            .await
    }

    async fn send_private(&self, peer_id: String, content: String) -> Result<SendResponse> {
        let body = json!({ "to_user_id": peer_id, "content": content });
        self.call(Method::POST, "messages/send", Some(body), &[]).await
    }

    async fn send_group(&self, group_id: String, content: String) -> Result<SendResponse> {
        let body = json!({ "group_id": group_id, "content": content });
        self.call(Method::POST, "groups/messages", Some(body), &[]).await
    }

    async fn create_conversation(&self, id: ConversationId) -> Result<()> {
        let body = json!({ "conversation_id": id.to_string() });
        self.call_unit(Method::POST, "conversations", Some(body)).await
    }

    async fn set_pinned(&self, id: ConversationId, pinned: bool) -> Result<()> {
        let method = if pinned { Method::POST } else { Method::DELETE };
        self.call_unit(method, &format!("conversations/{}/pin", id), None)
            .await
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        self.call_unit(Method::DELETE, &format!("conversations/{}", id), None)
            .await
    }

    async fn mark_private_read(&self, message_id: String) -> Result<()> {
        let body = json!({ "message_id": message_id });
        self.call_unit(Method::POST, "messages/read", Some(body)).await
    }

    async fn mark_group_read(&self, group_id: String, last_message_id: String) -> Result<()> {
        let body = json!({ "last_read_message_id": last_message_id });
        self.call_unit(Method::POST, &format!("groups/{}/read", group_id), Some(body))
            .await
    }
}
