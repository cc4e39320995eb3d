//! Recording [`ChatApi`] double
//!
//! Every call is appended to a shared log. Pull responses are served from a
//! queue (empty response when the queue runs dry) and sends echo the message
//! back with a fresh server id, like the real server does.

use chat_common::{ConversationId, ConversationKind, StreamToken};
use chat_sync::protocol::SendResponse;
use chat_sync::{ChatApi, PullResponse, Result, SyncError};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    FetchMessages {
        from: StreamToken,
        limit: u32,
    },
    ReportCursor {
        token: StreamToken,
        conversation: Option<ConversationId>,
    },
    SendPrivate {
        peer_id: String,
        content: String,
    },
    SendGroup {
        group_id: String,
        content: String,
    },
    CreateConversation(ConversationId),
    SetPinned {
        id: ConversationId,
        pinned: bool,
    },
    DeleteConversation(ConversationId),
    MarkPrivateRead(String),
    MarkGroupRead {
        group_id: String,
        last_message_id: String,
    },
}

/// Injected failure for every subsequent call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Transport,
    Auth,
}

impl MockFailure {
    fn error(self) -> SyncError {
        match self {
            MockFailure::Transport => SyncError::Transport("connection refused".to_string()),
            MockFailure::Auth => SyncError::Auth("HTTP 401 Unauthorized".to_string()),
        }
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<ApiCall>,
    pulls: VecDeque<PullResponse>,
    failure: Option<MockFailure>,
    echo_sends: bool,
    next_id: u64,
}

/// Cloneable handle; clones share the same log
#[derive(Clone)]
pub struct MockApi {
    user_id: String,
    state: Arc<Mutex<MockState>>,
}

impl MockApi {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: Arc::new(Mutex::new(MockState {
                echo_sends: true,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queue the body of the next `fetch_messages`
    pub fn queue_pull(&self, response: PullResponse) {
        self.state().pulls.push_back(response);
    }

    /// Make every following call fail (`None` to recover)
    pub fn fail_with(&self, failure: Option<MockFailure>) {
        self.state().failure = failure;
    }

    /// Whether sends return a `msg` echo (default true)
    pub fn echo_sends(&self, echo: bool) {
        self.state().echo_sends = echo;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Tokens passed to `report_cursor`, in call order
    pub fn reported_cursors(&self) -> Vec<StreamToken> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                ApiCall::ReportCursor { token, .. } => Some(*token),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ApiCall) -> Result<()> {
        let mut state = self.state();
        state.calls.push(call);
        match state.failure {
            Some(failure) => Err(failure.error()),
            None => Ok(()),
        }
    }

    fn echo(&self, kind: ConversationKind, peer: &str, content: &str) -> SendResponse {
        let mut state = self.state();
        if !state.echo_sends {
            return SendResponse::default();
        }
        state.next_id += 1;

        let mut msg = json!({
            "id": format!("srv-{}", state.next_id),
            "type": kind.as_str(),
            "from_user_id": self.user_id,
            "content": content,
            "created_at": chat_common::time::now_millis(),
        });
        match kind {
            ConversationKind::Private => msg["to_user_id"] = json!(peer),
            ConversationKind::Group => msg["group_id"] = json!(peer),
        }
        serde_json::from_value(json!({ "code": 0, "msg": msg })).unwrap()
    }
}

impl ChatApi for MockApi {
    async fn fetch_messages(&self, from: StreamToken, limit: u32) -> Result<PullResponse> {
        self.record(ApiCall::FetchMessages { from, limit })?;
        Ok(self.state().pulls.pop_front().unwrap_or_default())
    }

    async fn report_cursor(
        &self,
        token: StreamToken,
        conversation: Option<ConversationId>,
    ) -> Result<()> {
        self.record(ApiCall::ReportCursor {
            token,
            conversation,
        })
    }

    async fn send_private(&self, peer_id: String, content: String) -> Result<SendResponse> {
        self.record(ApiCall::SendPrivate {
            peer_id: peer_id.clone(),
            content: content.clone(),
        })?;
        Ok(self.echo(ConversationKind::Private, &peer_id, &content))
    }

    async fn send_group(&self, group_id: String, content: String) -> Result<SendResponse> {
        self.record(ApiCall::SendGroup {
            group_id: group_id.clone(),
            content: content.clone(),
        })?;
        Ok(self.echo(ConversationKind::Group, &group_id, &content))
    }

    async fn create_conversation(&self, id: ConversationId) -> Result<()> {
        self.record(ApiCall::CreateConversation(id))
    }

    async fn set_pinned(&self, id: ConversationId, pinned: bool) -> Result<()> {
        self.record(ApiCall::SetPinned { id, pinned })
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        self.record(ApiCall::DeleteConversation(id))
    }

    async fn mark_private_read(&self, message_id: String) -> Result<()> {
        self.record(ApiCall::MarkPrivateRead(message_id))
    }

    async fn mark_group_read(&self, group_id: String, last_message_id: String) -> Result<()> {
        self.record(ApiCall::MarkGroupRead {
            group_id,
            last_message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_fails_on_demand() {
        let api = MockApi::new("U1");
        api.report_cursor(StreamToken::new(5, 0), None).await.unwrap();

        api.fail_with(Some(MockFailure::Auth));
        let err = api
            .delete_conversation(ConversationId::private("U2").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_auth());

        assert_eq!(api.calls().len(), 2);
        assert_eq!(api.reported_cursors(), vec![StreamToken::new(5, 0)]);
    }

    #[tokio::test]
    async fn test_send_echo_normalizes() {
        let api = MockApi::new("U1");
        let response = api
            .send_group("G1".to_string(), "hello".to_string())
            .await
            .unwrap();
        let message = response.msg.unwrap().normalize("U1", None).unwrap();
        assert_eq!(message.conversation_id.to_string(), "group:G1");
        assert!(message.is_self);
        assert_eq!(message.id.as_deref(), Some("srv-1"));
    }
}
