//! In-memory fakes of the chat and tracker capabilities, for tests.
//!
//! Both fakes record what was asked of them so tests can assert on the
//! order of calls and on the resulting chat state.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::api::{
    ChatApi, ChatError, CreateRoomOptions, Issue, Project, RoomId, TrackerApi, TrackerError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Chat
// =============================================================================

/// One call made against [`FakeChat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Connect,
    CreateRoom { alias: String },
    GetRoomIdByName { alias: String },
    SendMessage { room: RoomId, plain: String },
    Invite { room: RoomId, user: String },
    SetTopic { room: RoomId, topic: String },
    SetName { room: RoomId, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub room: RoomId,
    pub plain: String,
    pub html: String,
}

#[derive(Default)]
struct ChatState {
    connected: bool,
    /// Set while the link is down: every call fails until the next connect.
    link_down: bool,
    failing_connects: usize,
    next_room: usize,
    rooms: HashMap<String, RoomId>,
    names: HashMap<RoomId, String>,
    topics: HashMap<RoomId, String>,
    members: HashMap<RoomId, Vec<String>>,
    messages: Vec<SentMessage>,
    calls: Vec<ChatCall>,
    failing_aliases: HashSet<String>,
    failing_messages: bool,
}

/// A chat backend that keeps rooms and messages in memory.
#[derive(Default)]
pub struct FakeChat {
    state: Mutex<ChatState>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pre-existing room.
    pub fn with_room(self, alias: &str) -> Self {
        {
            let mut state = lock(&self.state);
            let id = Self::allocate(&mut state, alias);
            state.members.insert(id, Vec::new());
        }
        self
    }

    fn allocate(state: &mut ChatState, alias: &str) -> RoomId {
        state.next_room += 1;
        let id = RoomId(format!("!room{}:fake", state.next_room));
        state.rooms.insert(alias.to_string(), id.clone());
        id
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        lock(&self.state).failing_connects = count;
    }

    /// Make room creation for `alias` fail with a request error.
    pub fn fail_room_creation(&self, alias: &str) {
        lock(&self.state).failing_aliases.insert(alias.to_string());
    }

    /// Make every message send fail with a request error.
    pub fn fail_messages(&self) {
        lock(&self.state).failing_messages = true;
    }

    /// Simulate the connection dropping. Calls fail with
    /// [`ChatError::NotConnected`] until the next successful `connect`.
    pub fn drop_connection(&self) {
        let mut state = lock(&self.state);
        state.connected = false;
        state.link_down = true;
    }

    pub fn room_id(&self, alias: &str) -> Option<RoomId> {
        lock(&self.state).rooms.get(alias).cloned()
    }

    pub fn room_name(&self, alias: &str) -> Option<String> {
        let state = lock(&self.state);
        let id = state.rooms.get(alias)?;
        state.names.get(id).cloned()
    }

    pub fn room_topic(&self, alias: &str) -> Option<String> {
        let state = lock(&self.state);
        let id = state.rooms.get(alias)?;
        state.topics.get(id).cloned()
    }

    pub fn members_of(&self, alias: &str) -> Vec<String> {
        let state = lock(&self.state);
        state
            .rooms
            .get(alias)
            .and_then(|id| state.members.get(id))
            .cloned()
            .unwrap_or_default()
    }

    /// Messages posted into the room with the given alias.
    pub fn messages_in(&self, alias: &str) -> Vec<SentMessage> {
        let state = lock(&self.state);
        let Some(id) = state.rooms.get(alias) else {
            return Vec::new();
        };
        state
            .messages
            .iter()
            .filter(|m| &m.room == id)
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        lock(&self.state).messages.clone()
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        lock(&self.state).calls.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| matches!(c, ChatCall::Connect))
            .count()
    }

    fn online(state: &ChatState) -> Result<(), ChatError> {
        if state.link_down {
            Err(ChatError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn known_room(state: &ChatState, room: &RoomId) -> Result<(), ChatError> {
        Self::online(state)?;
        if state.members.contains_key(room) {
            Ok(())
        } else {
            Err(ChatError::request("room lookup", format!("unknown room {}", room)))
        }
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn connect(&self) -> Result<(), ChatError> {
        let mut state = lock(&self.state);
        state.calls.push(ChatCall::Connect);
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(ChatError::request("connect", "connection refused"));
        }
        state.connected = true;
        state.link_down = false;
        Ok(())
    }

    async fn disconnect(&self) {
        lock(&self.state).connected = false;
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn create_room(&self, options: &CreateRoomOptions) -> Result<RoomId, ChatError> {
        let mut state = lock(&self.state);
        state.calls.push(ChatCall::CreateRoom {
            alias: options.alias.clone(),
        });
        Self::online(&state)?;
        if state.failing_aliases.contains(&options.alias) {
            return Err(ChatError::request("create room", "server error"));
        }
        if state.rooms.contains_key(&options.alias) {
            return Err(ChatError::RoomAlreadyExists {
                alias: options.alias.clone(),
            });
        }
        let id = Self::allocate(&mut state, &options.alias);
        state.names.insert(id.clone(), options.name.clone());
        if let Some(topic) = &options.topic {
            state.topics.insert(id.clone(), topic.clone());
        }
        state.members.insert(id.clone(), options.invite.clone());
        Ok(id)
    }

    async fn get_room_id_by_name(&self, alias: &str) -> Result<Option<RoomId>, ChatError> {
        let mut state = lock(&self.state);
        state.calls.push(ChatCall::GetRoomIdByName {
            alias: alias.to_string(),
        });
        Self::online(&state)?;
        Ok(state.rooms.get(alias).cloned())
    }

    async fn send_html_message(
        &self,
        room: &RoomId,
        plain: &str,
        html: &str,
    ) -> Result<(), ChatError> {
        let mut state = lock(&self.state);
        Self::known_room(&state, room)?;
        if state.failing_messages {
            return Err(ChatError::request("send", "server error"));
        }
        state.calls.push(ChatCall::SendMessage {
            room: room.clone(),
            plain: plain.to_string(),
        });
        state.messages.push(SentMessage {
            room: room.clone(),
            plain: plain.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }

    async fn invite(&self, room: &RoomId, user_id: &str) -> Result<(), ChatError> {
        let mut state = lock(&self.state);
        Self::known_room(&state, room)?;
        state.calls.push(ChatCall::Invite {
            room: room.clone(),
            user: user_id.to_string(),
        });
        let members = state.members.entry(room.clone()).or_default();
        if !members.iter().any(|m| m == user_id) {
            members.push(user_id.to_string());
        }
        Ok(())
    }

    async fn room_members(&self, room: &RoomId) -> Result<Vec<String>, ChatError> {
        let state = lock(&self.state);
        Self::known_room(&state, room)?;
        Ok(state.members.get(room).cloned().unwrap_or_default())
    }

    async fn set_room_topic(&self, room: &RoomId, topic: &str) -> Result<(), ChatError> {
        let mut state = lock(&self.state);
        Self::known_room(&state, room)?;
        state.calls.push(ChatCall::SetTopic {
            room: room.clone(),
            topic: topic.to_string(),
        });
        state.topics.insert(room.clone(), topic.to_string());
        Ok(())
    }

    async fn set_room_name(&self, room: &RoomId, name: &str) -> Result<(), ChatError> {
        let mut state = lock(&self.state);
        Self::known_room(&state, room)?;
        state.calls.push(ChatCall::SetName {
            room: room.clone(),
            name: name.to_string(),
        });
        state.names.insert(room.clone(), name.to_string());
        Ok(())
    }
}

// =============================================================================
// Tracker
// =============================================================================

#[derive(Default)]
struct TrackerState {
    unreachable: bool,
    issues: Vec<Issue>,
    projects: HashMap<String, Project>,
    watchers: HashMap<String, Vec<String>>,
    lookups: Vec<String>,
}

/// A tracker whose issues and projects are set up by the test.
#[derive(Default)]
pub struct FakeTracker {
    state: Mutex<TrackerState>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A minimal issue in the project named by the key's prefix.
    pub fn issue(id: &str, key: &str, summary: &str) -> Issue {
        let project_key = key.split('-').next().unwrap_or(key).to_string();
        Issue {
            id: id.to_string(),
            key: key.to_string(),
            summary: summary.to_string(),
            type_name: Some("Task".to_string()),
            project_key,
            status: Some("To Do".to_string()),
            ..Issue::default()
        }
    }

    pub fn project(key: &str) -> Project {
        Project {
            key: key.to_string(),
            id: format!("{}-id", key),
            name: format!("Project {}", key),
            lead: Some("lead".to_string()),
            is_private: false,
            style: Some("classic".to_string()),
        }
    }

    pub fn add_issue(&self, issue: Issue) {
        let mut state = lock(&self.state);
        state.issues.retain(|i| i.id != issue.id);
        state.issues.push(issue);
    }

    pub fn remove_issue(&self, id_or_key: &str) {
        lock(&self.state)
            .issues
            .retain(|i| i.id != id_or_key && i.key != id_or_key);
    }

    pub fn add_project(&self, project: Project) {
        lock(&self.state)
            .projects
            .insert(project.key.clone(), project);
    }

    pub fn set_watchers(&self, key: &str, watchers: &[&str]) {
        lock(&self.state).watchers.insert(
            key.to_string(),
            watchers.iter().map(|w| w.to_string()).collect(),
        );
    }

    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).unreachable = !reachable;
    }

    /// Ids and keys passed to `get_issue`, in call order.
    pub fn issue_lookups(&self) -> Vec<String> {
        lock(&self.state).lookups.clone()
    }
}

#[async_trait]
impl TrackerApi for FakeTracker {
    async fn ping(&self) -> Result<(), TrackerError> {
        if lock(&self.state).unreachable {
            Err(TrackerError::Unreachable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn get_issue(&self, id_or_key: &str) -> Result<Option<Issue>, TrackerError> {
        let mut state = lock(&self.state);
        state.lookups.push(id_or_key.to_string());
        if state.unreachable {
            return Err(TrackerError::Unreachable("connection refused".to_string()));
        }
        Ok(state
            .issues
            .iter()
            .find(|i| i.id == id_or_key || i.key == id_or_key)
            .cloned())
    }

    async fn get_project(&self, key: &str) -> Result<Option<Project>, TrackerError> {
        let state = lock(&self.state);
        if state.unreachable {
            return Err(TrackerError::Unreachable("connection refused".to_string()));
        }
        Ok(state.projects.get(key).cloned())
    }

    async fn get_issue_watchers(&self, key: &str) -> Result<Vec<String>, TrackerError> {
        Ok(lock(&self.state)
            .watchers
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn issue_url(&self, key: &str) -> String {
        format!("https://tracker.test/browse/{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_chat_rejects_duplicate_alias() {
        let chat = FakeChat::new().with_room("ABC-1");
        let result = chat
            .create_room(&CreateRoomOptions {
                alias: "ABC-1".to_string(),
                name: "ABC-1 S".to_string(),
                ..CreateRoomOptions::default()
            })
            .await;
        assert!(matches!(result, Err(ChatError::RoomAlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_fake_chat_fails_requested_connects() {
        let chat = FakeChat::new();
        chat.fail_next_connects(1);
        assert!(chat.connect().await.is_err());
        assert!(!chat.is_connected());
        chat.connect().await.unwrap();
        assert!(chat.is_connected());
        assert_eq!(chat.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_fake_tracker_finds_by_id_or_key() {
        let tracker = FakeTracker::new();
        tracker.add_issue(FakeTracker::issue("10001", "ABC-1", "S"));
        assert!(tracker.get_issue_safety("10001").await.is_some());
        assert!(tracker.get_issue_safety("ABC-1").await.is_some());
        tracker.remove_issue("ABC-1");
        assert!(tracker.get_issue_safety("10001").await.is_none());
    }

    #[tokio::test]
    async fn test_fake_tracker_outage_is_an_error_not_a_miss() {
        let tracker = FakeTracker::new();
        tracker.add_issue(FakeTracker::issue("10001", "ABC-1", "S"));
        tracker.set_reachable(false);
        assert!(matches!(
            tracker.get_issue("ABC-1").await,
            Err(TrackerError::Unreachable(_))
        ));
        assert!(tracker.get_issue_safety("ABC-1").await.is_none());
    }

    #[tokio::test]
    async fn test_fake_chat_refuses_calls_until_reconnected() {
        let chat = FakeChat::new().with_room("ABC-1");
        chat.connect().await.unwrap();
        chat.drop_connection();
        assert!(!chat.is_connected());
        assert!(matches!(
            chat.get_room_id_by_name("ABC-1").await,
            Err(ChatError::NotConnected)
        ));

        chat.connect().await.unwrap();
        assert!(chat.get_room_id_by_name("ABC-1").await.unwrap().is_some());
    }
}
