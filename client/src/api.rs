//! REST client for the chat service — the durable path.
//!
//! All calls carry a conservative request timeout; expiry surfaces as
//! [`ClientError::Network`], which read paths treat as recoverable by
//! falling back to the cache.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use lavoro_shared::{
    Attachment, Contact, ConversationSummary, Envelope, Group, GroupMessage, GroupSummary,
    Message,
};

use crate::error::{ClientError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the caller's identity on authenticated endpoints.
const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendGroupMessageRequest {
    pub group_id: String,
    pub sender_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub creator: String,
    pub members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct EditBody<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesPayload<T> {
    messages: Vec<T>,
}

/// Thin typed client over the `/chat` REST surface.
#[derive(Clone)]
pub struct ChatApi {
    base_url: String,
    http: reqwest::Client,
}

impl ChatApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn unwrap<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let env: Envelope<T> = resp.json().await?;
        if env.success {
            env.data.ok_or(ClientError::Protocol)
        } else {
            Err(ClientError::Api(
                env.error.unwrap_or_else(|| "unknown server error".to_string()),
            ))
        }
    }

    // --- Contacts ---

    pub async fn list_contacts(&self, user_id: &str) -> Result<Vec<Contact>> {
        let resp = self
            .http
            .get(self.url(&format!("/chat/contacts/{user_id}")))
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn upsert_contact(&self, contact: &Contact) -> Result<Contact> {
        let resp = self
            .http
            .put(self.url("/chat/contacts"))
            .json(contact)
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    // --- Direct messages ---

    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let resp = self
            .http
            .get(self.url(&format!("/chat/user/{user_id}")))
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn get_conversation(
        &self,
        user_id: &str,
        other_user_id: &str,
    ) -> Result<Vec<Message>> {
        let resp = self
            .http
            .get(self.url(&format!("/chat/conversation/{user_id}/{other_user_id}")))
            .send()
            .await?;
        let payload: MessagesPayload<Message> = Self::unwrap(resp).await?;
        Ok(payload.messages)
    }

    pub async fn send_message(&self, request: &SendMessageRequest) -> Result<Message> {
        let resp = self
            .http
            .post(self.url("/chat/message"))
            .json(request)
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn update_message(
        &self,
        message_id: &str,
        requester_id: &str,
        new_body: &str,
    ) -> Result<Message> {
        let resp = self
            .http
            .put(self.url(&format!("/chat/message/{message_id}")))
            .header(USER_ID_HEADER, requester_id)
            .json(&EditBody { message: new_body })
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn delete_message(&self, message_id: &str, requester_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/chat/message/{message_id}")))
            .header(USER_ID_HEADER, requester_id)
            .send()
            .await?;
        let _: serde_json::Value = Self::unwrap(resp).await?;
        Ok(())
    }

    // --- Groups ---

    pub async fn list_groups(&self, user_id: &str) -> Result<Vec<GroupSummary>> {
        let resp = self
            .http
            .get(self.url(&format!("/chat/groups/{user_id}")))
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn create_group(&self, request: &CreateGroupRequest) -> Result<Group> {
        let resp = self
            .http
            .post(self.url("/chat/group"))
            .json(request)
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn add_group_member(
        &self,
        group_id: &str,
        requester_id: &str,
        user_id: &str,
    ) -> Result<Group> {
        let resp = self
            .http
            .put(self.url(&format!("/chat/group/{group_id}/add/{user_id}")))
            .header(USER_ID_HEADER, requester_id)
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn remove_group_member(
        &self,
        group_id: &str,
        requester_id: &str,
        user_id: &str,
    ) -> Result<Group> {
        let resp = self
            .http
            .put(self.url(&format!("/chat/group/{group_id}/remove/{user_id}")))
            .header(USER_ID_HEADER, requester_id)
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn get_group_messages(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<Vec<GroupMessage>> {
        let resp = self
            .http
            .get(self.url(&format!("/chat/group/{group_id}/{user_id}")))
            .send()
            .await?;
        let payload: MessagesPayload<GroupMessage> = Self::unwrap(resp).await?;
        Ok(payload.messages)
    }

    pub async fn send_group_message(
        &self,
        request: &SendGroupMessageRequest,
    ) -> Result<GroupMessage> {
        let resp = self
            .http
            .post(self.url("/chat/group/message"))
            .json(request)
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn update_group_message(
        &self,
        message_id: &str,
        requester_id: &str,
        new_body: &str,
    ) -> Result<GroupMessage> {
        let resp = self
            .http
            .put(self.url(&format!("/chat/group/message/{message_id}")))
            .header(USER_ID_HEADER, requester_id)
            .json(&EditBody { message: new_body })
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    pub async fn delete_group_message(
        &self,
        message_id: &str,
        requester_id: &str,
    ) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/chat/group/message/{message_id}")))
            .header(USER_ID_HEADER, requester_id)
            .send()
            .await?;
        let _: serde_json::Value = Self::unwrap(resp).await?;
        Ok(())
    }
}
