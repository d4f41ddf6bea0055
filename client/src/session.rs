//! Session facade: REST, socket, cache and merge logic wired together.
//!
//! The session keeps an in-memory view per user — sidebar summaries plus
//! the message threads that have been opened — and reconciles it from
//! three sources: REST fetches (authoritative), socket events (fast
//! path), and the local cache (reload/offline fallback). Sends are
//! optimistic: the thread gains a `temp_`-tagged entry immediately and
//! the server's canonical record replaces it when the confirmation lands,
//! whether over REST or as a socket echo.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use lavoro_shared::{
    Attachment, ClientEvent, ConversationSummary, Group, GroupMessage, GroupSummary, Message,
    ServerEvent,
};

use crate::api::{ChatApi, CreateGroupRequest, SendGroupMessageRequest, SendMessageRequest};
use crate::cache::CacheStore;
use crate::error::{ClientError, Result};
use crate::reconcile;
use crate::socket::SocketClient;

/// Polling backstop: a periodic summary refresh catches anything the
/// socket missed while disconnected. [`ChatSession::refresh_after_interval`]
/// is one iteration; embedders loop over it alongside the event pump.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// One user's chat session.
pub struct ChatSession {
    user_id: String,
    api: ChatApi,
    cache: CacheStore,
    socket: Option<SocketClient>,
    conversations: Vec<ConversationSummary>,
    groups: Vec<GroupSummary>,
    /// Open direct threads, keyed by counterpart user id.
    threads: HashMap<String, Vec<Message>>,
    /// Open group threads, keyed by group id.
    group_threads: HashMap<String, Vec<GroupMessage>>,
}

impl ChatSession {
    pub fn new(api: ChatApi, cache: CacheStore, user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            api,
            cache,
            socket: None,
            conversations: Vec::new(),
            groups: Vec::new(),
            threads: HashMap::new(),
            group_threads: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn groups(&self) -> &[GroupSummary] {
        &self.groups
    }

    pub fn thread(&self, other_user_id: &str) -> &[Message] {
        self.threads
            .get(other_user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn group_thread(&self, group_id: &str) -> &[GroupMessage] {
        self.group_threads
            .get(group_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // --- Real-time channel ---

    /// Open the socket and announce this session's identity.
    pub async fn connect(&mut self, ws_url: &str) -> Result<()> {
        self.socket = Some(SocketClient::connect(ws_url, &self.user_id).await?);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Drain pending socket events, fold them into the local view, and
    /// return them so the UI can react (typing indicators and the like).
    pub fn pump_events(&mut self) -> Vec<ServerEvent> {
        let mut drained = Vec::new();
        while let Some(event) = self.socket.as_mut().and_then(SocketClient::try_next_event) {
            self.apply_event(&event);
            drained.push(event);
        }
        drained
    }

    /// Wait for the next socket event and fold it into the local view.
    pub async fn next_event(&mut self) -> Result<ServerEvent> {
        let socket = self.socket.as_mut().ok_or(ClientError::SocketClosed)?;
        let event = socket.next_event().await?;
        self.apply_event(&event);
        Ok(event)
    }

    async fn emit(&mut self, event: ClientEvent) -> Result<()> {
        match self.socket.as_mut() {
            Some(socket) => socket.emit(&event).await,
            None => Err(ClientError::SocketClosed),
        }
    }

    pub async fn start_typing(&mut self, receiver_id: &str) -> Result<()> {
        let event = ClientEvent::Typing {
            sender_id: self.user_id.clone(),
            receiver_id: receiver_id.to_string(),
        };
        self.emit(event).await
    }

    pub async fn stop_typing(&mut self, receiver_id: &str) -> Result<()> {
        let event = ClientEvent::StopTyping {
            sender_id: self.user_id.clone(),
            receiver_id: receiver_id.to_string(),
        };
        self.emit(event).await
    }

    // --- Summaries ---

    /// Refresh both sidebar lists from the server, falling back to the
    /// cached copy when the server is unreachable.
    pub async fn refresh_summaries(&mut self) -> Result<()> {
        match self.api.list_conversations(&self.user_id).await {
            Ok(mut summaries) => {
                reconcile::sort_conversations(&mut summaries);
                if let Err(err) = self.cache.save_conversations(&self.user_id, &summaries) {
                    warn!(%err, "failed to cache conversation summaries");
                }
                self.conversations = summaries;
            }
            Err(ClientError::Network(err)) => {
                debug!(%err, "conversation fetch failed, using cached summaries");
                if let Some(cached) = self.cache.load_conversations(&self.user_id)? {
                    self.conversations = cached;
                }
            }
            Err(err) => return Err(err),
        }

        match self.api.list_groups(&self.user_id).await {
            Ok(mut summaries) => {
                reconcile::sort_groups(&mut summaries);
                if let Err(err) = self.cache.save_groups(&self.user_id, &summaries) {
                    warn!(%err, "failed to cache group summaries");
                }
                self.groups = summaries;
            }
            Err(ClientError::Network(err)) => {
                debug!(%err, "group fetch failed, using cached summaries");
                if let Some(cached) = self.cache.load_groups(&self.user_id)? {
                    self.groups = cached;
                }
            }
            Err(err) => return Err(err),
        }

        Ok(())
    }

    /// One backstop iteration: wait out [`REFRESH_INTERVAL`], then
    /// reconcile the summaries.
    pub async fn refresh_after_interval(&mut self) -> Result<()> {
        tokio::time::sleep(REFRESH_INTERVAL).await;
        self.refresh_summaries().await
    }

    // --- Direct messages ---

    /// Fetch a conversation's history and reconcile it with the local
    /// thread. Opening a conversation marks it read server-side.
    pub async fn open_conversation(&mut self, other_user_id: &str) -> Result<&[Message]> {
        let history = self
            .api
            .get_conversation(&self.user_id, other_user_id)
            .await?;
        let thread = self.threads.entry(other_user_id.to_string()).or_default();
        reconcile::merge_history(thread, history, Utc::now());
        Ok(thread)
    }

    /// Send a direct message. The thread gains an optimistic entry before
    /// the request goes out; the canonical record replaces it on success.
    /// On failure the optimistic entry is withdrawn and the error is
    /// returned.
    pub async fn send_message(
        &mut self,
        receiver_id: &str,
        body: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message> {
        let now = Utc::now();
        let optimistic =
            reconcile::optimistic_direct(&self.user_id, receiver_id, body, attachment.clone(), now);
        let temp_id = optimistic.id.clone();
        self.threads
            .entry(receiver_id.to_string())
            .or_default()
            .push(optimistic);

        let request = SendMessageRequest {
            sender_id: self.user_id.clone(),
            receiver_id: receiver_id.to_string(),
            message: body.to_string(),
            attachment,
        };
        match self.api.send_message(&request).await {
            Ok(stored) => {
                let thread = self.threads.entry(receiver_id.to_string()).or_default();
                reconcile::merge_entry(thread, stored.clone(), Utc::now());
                Ok(stored)
            }
            Err(err) => {
                if let Some(thread) = self.threads.get_mut(receiver_id) {
                    reconcile::apply_delete(thread, &temp_id);
                }
                Err(err)
            }
        }
    }

    pub async fn edit_message(
        &mut self,
        message_id: &str,
        other_user_id: &str,
        new_body: &str,
    ) -> Result<Message> {
        let updated = self
            .api
            .update_message(message_id, &self.user_id, new_body)
            .await?;
        if let Some(thread) = self.threads.get_mut(other_user_id) {
            reconcile::apply_edit(thread, updated.clone());
        }
        Ok(updated)
    }

    pub async fn delete_message(&mut self, message_id: &str, other_user_id: &str) -> Result<()> {
        self.api.delete_message(message_id, &self.user_id).await?;
        if let Some(thread) = self.threads.get_mut(other_user_id) {
            reconcile::apply_delete(thread, message_id);
        }
        Ok(())
    }

    // --- Groups ---

    pub async fn create_group(
        &mut self,
        name: &str,
        description: Option<String>,
        members: Vec<String>,
        avatar_url: Option<String>,
    ) -> Result<Group> {
        let request = CreateGroupRequest {
            name: name.to_string(),
            description,
            creator: self.user_id.clone(),
            members,
            avatar_url,
        };
        self.api.create_group(&request).await
    }

    /// Fetch a group thread and reconcile it. Opening marks the thread
    /// read for this user.
    pub async fn open_group(&mut self, group_id: &str) -> Result<&[GroupMessage]> {
        let history = self.api.get_group_messages(group_id, &self.user_id).await?;
        let thread = self.group_threads.entry(group_id.to_string()).or_default();
        reconcile::merge_history(thread, history, Utc::now());
        Ok(thread)
    }

    pub async fn send_group_message(
        &mut self,
        group_id: &str,
        body: &str,
        attachment: Option<Attachment>,
    ) -> Result<GroupMessage> {
        let now = Utc::now();
        let optimistic =
            reconcile::optimistic_group(group_id, &self.user_id, body, attachment.clone(), now);
        let temp_id = optimistic.id.clone();
        self.group_threads
            .entry(group_id.to_string())
            .or_default()
            .push(optimistic);

        let request = SendGroupMessageRequest {
            group_id: group_id.to_string(),
            sender_id: self.user_id.clone(),
            message: body.to_string(),
            attachment,
        };
        match self.api.send_group_message(&request).await {
            Ok(stored) => {
                let thread = self.group_threads.entry(group_id.to_string()).or_default();
                reconcile::merge_entry(thread, stored.clone(), Utc::now());
                Ok(stored)
            }
            Err(err) => {
                if let Some(thread) = self.group_threads.get_mut(group_id) {
                    reconcile::apply_delete(thread, &temp_id);
                }
                Err(err)
            }
        }
    }

    pub async fn edit_group_message(
        &mut self,
        message_id: &str,
        group_id: &str,
        new_body: &str,
    ) -> Result<GroupMessage> {
        let updated = self
            .api
            .update_group_message(message_id, &self.user_id, new_body)
            .await?;
        if let Some(thread) = self.group_threads.get_mut(group_id) {
            reconcile::apply_edit(thread, updated.clone());
        }
        Ok(updated)
    }

    pub async fn delete_group_message(&mut self, message_id: &str, group_id: &str) -> Result<()> {
        self.api
            .delete_group_message(message_id, &self.user_id)
            .await?;
        if let Some(thread) = self.group_threads.get_mut(group_id) {
            reconcile::apply_delete(thread, message_id);
        }
        Ok(())
    }

    // --- Event folding ---

    fn counterpart_of(&self, message: &Message) -> String {
        if message.sender_id == self.user_id {
            message.receiver_id.clone()
        } else {
            message.sender_id.clone()
        }
    }

    /// Fold one server event into the local view. Events for threads that
    /// were never opened are ignored; the next summary refresh or thread
    /// open picks them up from the durable store.
    pub fn apply_event(&mut self, event: &ServerEvent) {
        let now = Utc::now();
        match event {
            ServerEvent::NewMessage { message } | ServerEvent::MessageSent { message } => {
                let key = self.counterpart_of(message);
                if let Some(thread) = self.threads.get_mut(&key) {
                    reconcile::merge_entry(thread, message.clone(), now);
                }
            }
            ServerEvent::MessageUpdated { message } => {
                let key = self.counterpart_of(message);
                if let Some(thread) = self.threads.get_mut(&key) {
                    reconcile::apply_edit(thread, message.clone());
                }
            }
            ServerEvent::MessageDeleted {
                message_id,
                sender_id,
                receiver_id,
            } => {
                let key = if *sender_id == self.user_id {
                    receiver_id
                } else {
                    sender_id
                };
                if let Some(thread) = self.threads.get_mut(key) {
                    reconcile::apply_delete(thread, message_id);
                }
            }
            ServerEvent::NewGroupMessage { message }
            | ServerEvent::GroupMessageSent { message } => {
                if let Some(thread) = self.group_threads.get_mut(&message.group_id) {
                    reconcile::merge_entry(thread, message.clone(), now);
                }
            }
            ServerEvent::GroupMessageUpdated { message } => {
                if let Some(thread) = self.group_threads.get_mut(&message.group_id) {
                    reconcile::apply_edit(thread, message.clone());
                }
            }
            ServerEvent::GroupMessageDeleted {
                message_id,
                group_id,
            } => {
                if let Some(thread) = self.group_threads.get_mut(group_id) {
                    reconcile::apply_delete(thread, message_id);
                }
            }
            // Presentation-only; surfaced to the caller by pump_events.
            ServerEvent::UserTyping { .. } | ServerEvent::UserStopTyping { .. } => {}
            ServerEvent::Error { code, message } => {
                warn!(code, %message, "server rejected an event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The TempDir guard must outlive the session's cache connection.
    fn session() -> (ChatSession, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open_at(&dir.path().join("cache.sqlite")).unwrap();
        let api = ChatApi::new("http://127.0.0.1:1").unwrap();
        (ChatSession::new(api, cache, "alice"), dir)
    }

    fn canonical(id: &str, sender: &str, receiver: &str, body: &str) -> Message {
        Message {
            id: id.to_string(),
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            body: body.to_string(),
            attachment: None,
            sent_at: Utc::now(),
            is_read: false,
            edited: false,
            edited_at: None,
        }
    }

    #[tokio::test]
    async fn refresh_falls_back_to_cache_when_server_is_unreachable() {
        use lavoro_shared::{Contact, ConversationSummary};

        let (mut s, _dir) = session();
        let cached = ConversationSummary {
            counterpart: Contact {
                id: "bob".to_string(),
                display_name: "Bob".to_string(),
                avatar_url: None,
            },
            last_message: canonical("m1", "bob", "alice", "hi"),
            unread_count: 1,
        };
        s.cache.save_conversations("alice", &[cached]).unwrap();

        // The api points at a closed port: the fetch fails with a
        // transport error and the cached copy takes over.
        s.refresh_summaries().await.unwrap();
        assert_eq!(s.conversations().len(), 1);
        assert_eq!(s.conversations()[0].counterpart.id, "bob");
        assert!(s.groups().is_empty());
    }

    #[test]
    fn incoming_message_lands_in_the_open_thread() {
        let (mut s, _dir) = session();
        s.threads.insert("bob".to_string(), Vec::new());

        s.apply_event(&ServerEvent::NewMessage {
            message: canonical("m1", "bob", "alice", "hi"),
        });
        assert_eq!(s.thread("bob").len(), 1);

        // Threads that were never opened stay untouched.
        s.apply_event(&ServerEvent::NewMessage {
            message: canonical("m2", "carol", "alice", "hey"),
        });
        assert!(s.thread("carol").is_empty());
    }

    #[test]
    fn sent_echo_replaces_the_optimistic_entry() {
        let (mut s, _dir) = session();
        let optimistic = reconcile::optimistic_direct("alice", "bob", "hello", None, Utc::now());
        s.threads.insert("bob".to_string(), vec![optimistic]);

        s.apply_event(&ServerEvent::MessageSent {
            message: canonical("m1", "alice", "bob", "hello"),
        });
        let thread = s.thread("bob");
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].id, "m1");
    }

    #[test]
    fn delete_event_removes_by_id_on_either_side() {
        let (mut s, _dir) = session();
        s.threads
            .insert("bob".to_string(), vec![canonical("m1", "bob", "alice", "x")]);

        s.apply_event(&ServerEvent::MessageDeleted {
            message_id: "m1".to_string(),
            sender_id: "bob".to_string(),
            receiver_id: "alice".to_string(),
        });
        assert!(s.thread("bob").is_empty());
    }

    #[test]
    fn group_events_key_by_group_id() {
        let (mut s, _dir) = session();
        s.group_threads.insert("g1".to_string(), Vec::new());

        let message = GroupMessage {
            id: "gm1".to_string(),
            group_id: "g1".to_string(),
            sender_id: "bob".to_string(),
            body: "hello group".to_string(),
            attachment: None,
            sent_at: Utc::now(),
            read_by: vec!["bob".to_string()],
            edited: false,
            edited_at: None,
        };
        s.apply_event(&ServerEvent::NewGroupMessage {
            message: message.clone(),
        });
        assert_eq!(s.group_thread("g1").len(), 1);

        s.apply_event(&ServerEvent::GroupMessageDeleted {
            message_id: "gm1".to_string(),
            group_id: "g1".to_string(),
        });
        assert!(s.group_thread("g1").is_empty());
    }
}
