//! REST collaborator.
//!
//! [`MessageApi`] is the slice of the REST API a conversation needs; it is a
//! trait so conversation logic can be driven without a server. [`RestClient`]
//! is the reqwest implementation and also carries the read-only endpoints the
//! CLI uses for listings.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{HttpFileConfig, ServerEndpoint};
use crate::error::ApiError;
use crate::message::{
    ConversationSummary, Message, NewMessage, SentMessage, UnreadCounts, UserSummary,
};
use crate::session_store::SessionStore;

#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Full history between `user_id` and `other_id`.
    async fn fetch_messages(&self, user_id: &str, other_id: &str)
    -> Result<Vec<Message>, ApiError>;

    /// Persist a new message. The server assigns its id.
    async fn post_message(&self, message: &NewMessage) -> Result<SentMessage, ApiError>;

    /// Mark everything `other_id` sent to `user_id` as read.
    async fn mark_conversation_read(&self, user_id: &str, other_id: &str)
    -> Result<(), ApiError>;
}

pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    session: Arc<dyn SessionStore>,
}

impl RestClient {
    pub fn new(
        endpoint: &ServerEndpoint,
        config: &HttpFileConfig,
        session: Arc<dyn SessionStore>,
    ) -> Result<Self, ApiError> {
        let base = Url::parse(&format!("{}/", endpoint.api_base_url))
            .map_err(|e| ApiError::Url(format!("{}: {e}", endpoint.api_base_url)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::Url(endpoint.api_base_url.clone()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            base,
            session,
        })
    }

    /// Profile summary for a conversation header.
    pub async fn fetch_user(&self, user_id: &str) -> Result<UserSummary, ApiError> {
        let url = self.url(&["users", user_id])?;
        Ok(self.execute(self.http.get(url)).await?.json().await?)
    }

    pub async fn fetch_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        let url = self.url(&["messages", user_id, "conversations"])?;
        Ok(self.execute(self.http.get(url)).await?.json().await?)
    }

    pub async fn fetch_unread_counts(&self, user_id: &str) -> Result<UnreadCounts, ApiError> {
        let url = self.url(&["messages", "unread", user_id])?;
        Ok(self.execute(self.http.get(url)).await?.json().await?)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Attach the bearer token, send, and map non-success statuses.
    async fn execute(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let creds = self.session.credentials().ok_or(ApiError::NoSession)?;
        let resp = request.bearer_auth(&creds.token).send().await?;
        let status = resp.status();
        debug!(status = status.as_u16(), url = %resp.url(), "api response");

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl MessageApi for RestClient {
    async fn fetch_messages(
        &self,
        user_id: &str,
        other_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        let url = self.url(&["messages", user_id, other_id])?;
        Ok(self.execute(self.http.get(url)).await?.json().await?)
    }

    async fn post_message(&self, message: &NewMessage) -> Result<SentMessage, ApiError> {
        // Trailing slash is part of the route
        let url = self.url(&["messages", ""])?;
        Ok(self
            .execute(self.http.post(url).json(message))
            .await?
            .json()
            .await?)
    }

    async fn mark_conversation_read(
        &self,
        user_id: &str,
        other_id: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&["messages", user_id, "mark-conversation-read", other_id])?;
        self.execute(self.http.post(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::MemorySessionStore;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, session: Arc<dyn SessionStore>) -> RestClient {
        let endpoint = ServerEndpoint {
            host: "unused".into(),
            secure: false,
            api_base_url: server.uri(),
        };
        RestClient::new(&endpoint, &HttpFileConfig::default(), session).unwrap()
    }

    fn signed_in() -> Arc<dyn SessionStore> {
        Arc::new(MemorySessionStore::signed_in("me", "tok"))
    }

    #[tokio::test]
    async fn fetch_messages_sends_bearer_and_parses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/me/sam"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "message_id": "m-1",
                    "sender_id": "sam",
                    "receiver_id": "me",
                    "content": "hi",
                    "sent_at": "2026-03-18T15:20:00",
                    "is_read": false
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let messages = client(&server, signed_in())
            .fetch_messages("me", "sam")
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "m-1");
    }

    #[tokio::test]
    async fn post_message_uses_trailing_slash_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/"))
            .and(body_json(serde_json::json!({
                "sender_id": "me",
                "receiver_id": "sam",
                "content": "hello"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"message_id": "m-9"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let sent = client(&server, signed_in())
            .post_message(&NewMessage {
                sender_id: "me".into(),
                receiver_id: "sam".into(),
                content: "hello".into(),
            })
            .await
            .unwrap();
        assert_eq!(sent.message_id, "m-9");
    }

    #[tokio::test]
    async fn mark_conversation_read_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/me/mark-conversation-read/sam"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, signed_in())
            .mark_conversation_read("me", "sam")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unauthorized_maps_to_variant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/sam"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let err = client(&server, signed_in())
            .fetch_user("sam")
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn error_status_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/"))
            .respond_with(ResponseTemplate::new(403).set_body_string("not matched"))
            .mount(&server)
            .await;

        let err = client(&server, signed_in())
            .post_message(&NewMessage {
                sender_id: "me".into(),
                receiver_id: "sam".into(),
                content: "hello".into(),
            })
            .await
            .unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "not matched");
            }
            other => panic!("Expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_session_fails_before_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server, Arc::new(MemorySessionStore::default()))
            .fetch_unread_counts("me")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NoSession));
    }

    #[tokio::test]
    async fn listings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/me/conversations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"other_user_id": "sam", "other_user_name": "Sam", "last_message": "bye", "unread_count": 1}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages/unread/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"unread_count": 3})))
            .mount(&server)
            .await;

        let api = client(&server, signed_in());
        let convos = api.fetch_conversations("me").await.unwrap();
        assert_eq!(convos[0].other_user_id, "sam");
        assert_eq!(api.fetch_unread_counts("me").await.unwrap().unread_count, 3);
    }

    #[test]
    fn base_url_with_path_prefix() {
        let endpoint = ServerEndpoint {
            host: "unused".into(),
            secure: true,
            api_base_url: "https://api.example.com/v1".into(),
        };
        let api = RestClient::new(&endpoint, &HttpFileConfig::default(), signed_in()).unwrap();
        assert_eq!(
            api.url(&["messages", "a b", "c"]).unwrap().as_str(),
            "https://api.example.com/v1/messages/a%20b/c"
        );
        assert_eq!(
            api.url(&["messages", ""]).unwrap().as_str(),
            "https://api.example.com/v1/messages/"
        );
    }
}
