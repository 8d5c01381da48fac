//! Handlers for the late-bound bot actions.

use tracing::{debug, info, warn};

use j2m_core::records::{
    Action, EpicUpdateKind, InviteNewMembersData, LinkData, LinkEnd, PostCommentData,
    PostEpicUpdatesData, PostIssueUpdatesData, PostLinkedChangesData, PostLinksDeletedData,
    PostNewLinksData, PostProjectUpdatesData, ProjectUpdateKind,
};
use j2m_core::{Issue, RoomId};

use super::{DispatchError, Dispatcher, RoomTarget};

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// A chat message built in plain text and HTML at the same time.
pub(crate) struct Message {
    plain: Vec<String>,
    html: Vec<String>,
}

impl Message {
    pub(crate) fn new(headline: String) -> Self {
        let html = format!("<strong>{}</strong>", escape_html(&headline));
        Self {
            plain: vec![headline],
            html: vec![html],
        }
    }

    pub(crate) fn line(&mut self, text: String) {
        self.html.push(escape_html(&text));
        self.plain.push(text);
    }

    pub(crate) fn link(&mut self, url: &str, label: &str) {
        self.plain.push(url.to_string());
        self.html.push(format!(
            "<a href=\"{}\">{}</a>",
            escape_html(url),
            escape_html(label)
        ));
    }

    pub(crate) fn plain(&self) -> String {
        self.plain.join("\n")
    }

    pub(crate) fn html(&self) -> String {
        self.html.join("<br>")
    }
}

fn with_summary(key: &str, summary: &Option<String>) -> String {
    match summary {
        Some(summary) => format!("{} \"{}\"", key, summary),
        None => key.to_string(),
    }
}

impl Dispatcher {
    pub(super) async fn run_action(&self, action: &Action) -> Result<(), DispatchError> {
        match action {
            Action::InviteNewMembers(data) => self.invite_new_members(data).await,
            Action::PostComment(data) => self.post_comment(data).await,
            Action::PostIssueUpdates(data) => self.post_issue_updates(data).await,
            Action::PostEpicUpdates(data) => self.post_epic_updates(data).await,
            Action::PostProjectUpdates(data) => self.post_project_updates(data).await,
            Action::PostNewLinks(data) => self.post_new_links(data).await,
            Action::PostLinkedChanges(data) => self.post_linked_changes(data).await,
            Action::PostLinksDeleted(data) => self.post_links_deleted(data).await,
        }
    }

    /// Room of an issue. A missing room is recoverable unless the tracker
    /// says the issue itself is gone.
    async fn issue_room(&self, key: &str) -> Result<RoomId, DispatchError> {
        if let Some(room) = self.chat.get_room_id_by_name(key).await? {
            return Ok(room);
        }
        match self.tracker.get_issue(key).await {
            Ok(None) => return Err(DispatchError::IssueGone(key.to_string())),
            Ok(Some(_)) => {}
            Err(e) => warn!("Could not check whether {} still exists: {}", key, e),
        }
        Err(DispatchError::RoomMissing {
            target: RoomTarget::Issue(key.to_string()),
        })
    }

    async fn project_room(&self, key: &str) -> Result<RoomId, DispatchError> {
        if let Some(room) = self.chat.get_room_id_by_name(key).await? {
            return Ok(room);
        }
        match self.tracker.get_project(key).await {
            Ok(None) => return Err(DispatchError::ProjectGone(key.to_string())),
            Ok(Some(_)) => {}
            Err(e) => warn!("Could not check whether project {} still exists: {}", key, e),
        }
        Err(DispatchError::RoomMissing {
            target: RoomTarget::Project(key.to_string()),
        })
    }

    /// Look an issue up. A transient tracker failure surfaces as
    /// [`DispatchError::Unavailable`] so the record is kept.
    async fn require_issue(&self, id_or_key: &str) -> Result<Issue, DispatchError> {
        self.tracker
            .get_issue(id_or_key)
            .await?
            .ok_or_else(|| DispatchError::IssueGone(id_or_key.to_string()))
    }

    async fn send(&self, room: &RoomId, message: &Message) -> Result<(), DispatchError> {
        self.chat
            .send_html_message(room, &message.plain(), &message.html())
            .await?;
        Ok(())
    }

    async fn invite_new_members(&self, data: &InviteNewMembersData) -> Result<(), DispatchError> {
        let room = self.issue_room(&data.issue_key).await?;
        let issue = self.require_issue(&data.issue_key).await?;
        let watchers = self.tracker.get_issue_watchers(&issue.key).await?;

        let members = self.chat.room_members(&room).await?;
        let mut invited = Vec::new();
        let people = [&issue.assignee, &issue.reporter, &issue.creator]
            .into_iter()
            .flatten()
            .chain(watchers.iter());
        for person in people {
            let user_id = self.chat.chat_user_id(person);
            if members.contains(&user_id) || invited.contains(&user_id) {
                continue;
            }
            self.chat.invite(&room, &user_id).await?;
            invited.push(user_id);
        }

        if !invited.is_empty() {
            info!("Invited {} to {}", invited.join(", "), data.issue_key);
        }
        Ok(())
    }

    async fn post_comment(&self, data: &PostCommentData) -> Result<(), DispatchError> {
        let key = match &data.issue_key {
            Some(key) => key.clone(),
            None => self.require_issue(&data.issue_id).await?.key,
        };
        let room = self.issue_room(&key).await?;

        let mut message = Message::new(format!("{}:", data.header_text));
        message.line(data.body.clone());
        self.send(&room, &message).await
    }

    async fn post_issue_updates(&self, data: &PostIssueUpdatesData) -> Result<(), DispatchError> {
        let room = self.issue_room(&data.issue_key).await?;

        let mut message = Message::new(format!("{} changed {}", data.author, data.issue_key));
        for change in &data.changes {
            message.line(format!(
                "{}: {} -> {}",
                change.field,
                change.from.as_deref().unwrap_or("none"),
                change.to.as_deref().unwrap_or("none")
            ));
        }
        self.send(&room, &message).await?;

        if let Some(summary) = &data.new_summary {
            self.chat
                .set_room_name(&room, &format!("{} {}", data.issue_key, summary))
                .await?;
        }
        Ok(())
    }

    async fn post_epic_updates(&self, data: &PostEpicUpdatesData) -> Result<(), DispatchError> {
        let room = self.issue_room(&data.epic_key).await?;
        let issue = with_summary(&data.issue_key, &data.summary);
        let headline = match data.kind {
            EpicUpdateKind::IssueAdded => format!("{} added {} to the epic", data.author, issue),
            EpicUpdateKind::StatusChanged => format!(
                "{} moved {} to {}",
                data.author,
                issue,
                data.status.as_deref().unwrap_or("an unknown status")
            ),
        };
        let mut message = Message::new(headline);
        message.link(&self.tracker.issue_url(&data.issue_key), &data.issue_key);
        self.send(&room, &message).await
    }

    async fn post_project_updates(
        &self,
        data: &PostProjectUpdatesData,
    ) -> Result<(), DispatchError> {
        let room = self.project_room(&data.project_key).await?;
        let epic = with_summary(&data.epic_key, &data.summary);
        let headline = match data.kind {
            ProjectUpdateKind::EpicCreated => format!("{} created epic {}", data.author, epic),
            ProjectUpdateKind::EpicStatusChanged => format!(
                "{} moved epic {} to {}",
                data.author,
                epic,
                data.status.as_deref().unwrap_or("an unknown status")
            ),
        };
        let mut message = Message::new(headline);
        message.link(&self.tracker.issue_url(&data.epic_key), &data.epic_key);
        self.send(&room, &message).await
    }

    /// Key of one link end, looked up by id when the hook did not carry it.
    async fn link_end_key(&self, end: &LinkEnd) -> Option<String> {
        if let Some(key) = &end.key {
            return Some(key.clone());
        }
        self.tracker.get_issue_safety(&end.id).await.map(|i| i.key)
    }

    /// Post into a room only if it exists. Link notifications are best-effort
    /// per side.
    async fn post_if_room(&self, key: &str, message: &Message) -> Result<bool, DispatchError> {
        match self.chat.get_room_id_by_name(key).await? {
            Some(room) => {
                self.send(&room, message).await?;
                Ok(true)
            }
            None => {
                debug!("No room for {}, skipping link notification", key);
                Ok(false)
            }
        }
    }

    async fn announce_link(&self, link: &LinkData, created: bool) -> Result<(), DispatchError> {
        let source = self.link_end_key(&link.source).await;
        let destination = self.link_end_key(&link.destination).await;
        let verb = if created { "New link" } else { "Link removed" };

        if let Some(source_key) = &source {
            let other = destination.as_deref().unwrap_or(&link.destination.id);
            let message = Message::new(format!(
                "{}: {} {} {}",
                verb, source_key, link.outward, other
            ));
            self.post_if_room(source_key, &message).await?;
        }
        if let Some(destination_key) = &destination {
            let other = source.as_deref().unwrap_or(&link.source.id);
            let message = Message::new(format!(
                "{}: {} {} {}",
                verb, destination_key, link.inward, other
            ));
            self.post_if_room(destination_key, &message).await?;
        }
        if source.is_none() && destination.is_none() {
            warn!("Neither end of link {} could be resolved", link.link_id);
        }
        Ok(())
    }

    async fn post_new_links(&self, data: &PostNewLinksData) -> Result<(), DispatchError> {
        for link in &data.links {
            self.announce_link(link, true).await?;
        }
        Ok(())
    }

    async fn post_links_deleted(&self, data: &PostLinksDeletedData) -> Result<(), DispatchError> {
        self.announce_link(&data.link, false).await
    }

    async fn post_linked_changes(
        &self,
        data: &PostLinkedChangesData,
    ) -> Result<(), DispatchError> {
        let issue = with_summary(&data.issue_key, &data.summary);
        let mut message = Message::new(format!(
            "{} moved linked issue {} to {}",
            data.author, issue, data.status
        ));
        message.link(&self.tracker.issue_url(&data.issue_key), &data.issue_key);

        for key in &data.linked_keys {
            self.post_if_room(key, &message).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use j2m_core::records::{FieldChange, LinkEnd};
    use j2m_core::testing::{FakeChat, FakeTracker};
    use j2m_core::{ChatApi, DurableQueue, InMemoryStore, Issue};
    use std::sync::Arc;

    fn setup(chat: FakeChat) -> (Arc<FakeChat>, Arc<FakeTracker>, Dispatcher) {
        let chat = Arc::new(chat);
        let tracker = Arc::new(FakeTracker::new());
        tracker.add_issue(FakeTracker::issue("10001", "ABC-1", "First"));
        tracker.add_issue(FakeTracker::issue("10002", "ABC-2", "Second"));
        let queue = DurableQueue::new(Arc::new(InMemoryStore::new()), "t:");
        let dispatcher = Dispatcher::new(queue, chat.clone(), tracker.clone());
        (chat, tracker, dispatcher)
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"Tom\" & 'Jerry'</b>"),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_message_renders_both_forms() {
        let mut message = Message::new("Alice <admin>".to_string());
        message.line("body".to_string());
        message.link("https://x.test/browse/A-1", "A-1");
        assert_eq!(message.plain(), "Alice <admin>\nbody\nhttps://x.test/browse/A-1");
        assert_eq!(
            message.html(),
            "<strong>Alice &lt;admin&gt;</strong><br>body<br><a href=\"https://x.test/browse/A-1\">A-1</a>"
        );
    }

    #[tokio::test]
    async fn test_invite_only_new_members() {
        let (chat, tracker, dispatcher) = setup(FakeChat::new().with_room("ABC-1"));
        tracker.add_issue(Issue {
            assignee: Some("alice".to_string()),
            reporter: Some("bob".to_string()),
            ..FakeTracker::issue("10001", "ABC-1", "First")
        });
        let room = chat.room_id("ABC-1").unwrap();
        chat.invite(&room, "alice").await.unwrap();

        dispatcher
            .run_action(&Action::InviteNewMembers(InviteNewMembersData {
                issue_key: "ABC-1".to_string(),
            }))
            .await
            .unwrap();

        assert_eq!(chat.members_of("ABC-1"), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_summary_change_renames_room() {
        let (chat, _, dispatcher) = setup(FakeChat::new().with_room("ABC-1"));
        dispatcher
            .run_action(&Action::PostIssueUpdates(PostIssueUpdatesData {
                issue_key: "ABC-1".to_string(),
                summary: Some("Renamed".to_string()),
                author: "Alice".to_string(),
                changes: vec![FieldChange {
                    field: "summary".to_string(),
                    from: Some("First".to_string()),
                    to: Some("Renamed".to_string()),
                }],
                new_summary: Some("Renamed".to_string()),
                new_status: None,
            }))
            .await
            .unwrap();

        assert_eq!(chat.room_name("ABC-1").as_deref(), Some("ABC-1 Renamed"));
        let messages = chat.messages_in("ABC-1");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].plain.contains("summary: First -> Renamed"));
    }

    #[tokio::test]
    async fn test_project_update_without_room_is_room_missing() {
        let (_, _, dispatcher) = setup(FakeChat::new());
        let result = dispatcher
            .run_action(&Action::PostProjectUpdates(PostProjectUpdatesData {
                project_key: "ABC".to_string(),
                epic_key: "ABC-1".to_string(),
                summary: None,
                kind: ProjectUpdateKind::EpicCreated,
                status: None,
                author: "Alice".to_string(),
            }))
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::RoomMissing {
                target: RoomTarget::Project(ref key)
            }) if key == "ABC"
        ));
    }

    #[tokio::test]
    async fn test_new_link_resolves_keys_and_skips_missing_rooms() {
        let (chat, _, dispatcher) = setup(FakeChat::new().with_room("ABC-2"));
        dispatcher
            .run_action(&Action::PostNewLinks(PostNewLinksData {
                links: vec![LinkData {
                    link_id: "5".to_string(),
                    source: LinkEnd {
                        id: "10001".to_string(),
                        key: None,
                    },
                    destination: LinkEnd {
                        id: "10002".to_string(),
                        key: None,
                    },
                    outward: "blocks".to_string(),
                    inward: "is blocked by".to_string(),
                }],
            }))
            .await
            .unwrap();

        assert!(chat.messages_in("ABC-1").is_empty());
        let messages = chat.messages_in("ABC-2");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].plain, "New link: ABC-2 is blocked by ABC-1");
    }

    #[tokio::test]
    async fn test_linked_changes_reach_each_linked_room() {
        let (chat, _, dispatcher) = setup(FakeChat::new().with_room("ABC-2").with_room("XYZ-9"));
        dispatcher
            .run_action(&Action::PostLinkedChanges(PostLinkedChangesData {
                issue_key: "ABC-1".to_string(),
                summary: Some("First".to_string()),
                status: "Done".to_string(),
                linked_keys: vec!["ABC-2".to_string(), "XYZ-9".to_string(), "NOPE-1".to_string()],
                author: "Alice".to_string(),
            }))
            .await
            .unwrap();

        assert_eq!(chat.messages_in("ABC-2").len(), 1);
        assert_eq!(chat.messages_in("XYZ-9").len(), 1);
    }
}
