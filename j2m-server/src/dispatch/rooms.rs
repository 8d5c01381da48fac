use tracing::{debug, info, warn};

use j2m_core::records::{DescriptionFields, RoomIssue};
use j2m_core::{ChatError, CreateRoomOptions, Issue, RoomId, RoomRecord};

use super::actions::Message;
use super::{DispatchError, Dispatcher};

/// What ensuring a room record amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomOutcome {
    Created,
    Existing,
    /// The issue or project is gone; the intent is discarded.
    Dropped,
}

impl RoomOutcome {
    fn combine(self, other: RoomOutcome) -> RoomOutcome {
        use RoomOutcome::*;
        match (self, other) {
            (Dropped, _) | (_, Dropped) => Dropped,
            (Created, _) | (_, Created) => Created,
            _ => Existing,
        }
    }
}

impl Dispatcher {
    /// Check-then-create the rooms a record asks for. "Already exists" from
    /// the chat backend counts as success.
    pub async fn ensure_room(&self, record: &RoomRecord) -> Result<RoomOutcome, DispatchError> {
        let mut outcome = RoomOutcome::Existing;
        if let Some(issue) = &record.issue {
            outcome = outcome.combine(self.ensure_issue_room(issue).await?);
        }
        if let Some(project_key) = &record.project_key {
            outcome = outcome.combine(self.ensure_project_room(project_key).await?);
        }
        Ok(outcome)
    }

    async fn ensure_issue_room(&self, room: &RoomIssue) -> Result<RoomOutcome, DispatchError> {
        if self.chat.get_room_id_by_name(&room.key).await?.is_some() {
            debug!("Room for {} already exists", room.key);
            return Ok(RoomOutcome::Existing);
        }

        let Some(issue) = self.tracker.get_issue(&room.key).await? else {
            warn!("Issue {} no longer exists, not creating its room", room.key);
            return Ok(RoomOutcome::Dropped);
        };

        let watchers = match self.tracker.get_issue_watchers(&issue.key).await {
            Ok(watchers) => watchers,
            Err(e) => {
                warn!("Could not fetch watchers of {}: {}", issue.key, e);
                Vec::new()
            }
        };

        let mut invite: Vec<String> = Vec::new();
        let people = [&issue.assignee, &issue.reporter, &issue.creator]
            .into_iter()
            .flatten()
            .chain(watchers.iter());
        for person in people {
            let user_id = self.chat.chat_user_id(person);
            if !invite.contains(&user_id) {
                invite.push(user_id);
            }
        }

        let summary = room.summary.as_deref().unwrap_or(&issue.summary);
        let options = CreateRoomOptions {
            alias: issue.key.clone(),
            name: format!("{} {}", issue.key, summary),
            topic: Some(self.tracker.issue_url(&issue.key)),
            invite,
        };

        let room_id = match self.chat.create_room(&options).await {
            Ok(room_id) => room_id,
            Err(ChatError::RoomAlreadyExists { alias }) => {
                debug!("Room {} was created concurrently", alias);
                return Ok(RoomOutcome::Existing);
            }
            Err(e) => return Err(e.into()),
        };
        info!("Created room {} for {}", room_id, issue.key);

        let fields = room
            .description_fields
            .clone()
            .unwrap_or_else(|| description_from_issue(&issue));
        // The room exists now; a retry would find it and skip the description.
        if let Err(e) = self.post_description(&room_id, &issue, &fields).await {
            warn!("Could not post description into {}: {}", issue.key, e);
        }

        Ok(RoomOutcome::Created)
    }

    async fn post_description(
        &self,
        room_id: &RoomId,
        issue: &Issue,
        fields: &DescriptionFields,
    ) -> Result<(), DispatchError> {
        let mut message = Message::new(format!("{} {}", issue.key, issue.summary));
        let rows = [
            ("Type", &fields.type_name),
            ("Status", &fields.status),
            ("Priority", &fields.priority),
            ("Assignee", &fields.assignee_name),
            ("Reporter", &fields.reporter_name),
            ("Epic", &fields.epic_link),
        ];
        for (label, value) in rows {
            if let Some(value) = value {
                message.line(format!("{}: {}", label, value));
            }
        }
        if let Some(description) = fields.description.as_deref().filter(|d| !d.is_empty()) {
            message.line(description.to_string());
        }
        message.link(&self.tracker.issue_url(&issue.key), &issue.key);

        self.chat
            .send_html_message(room_id, &message.plain(), &message.html())
            .await?;
        Ok(())
    }

    async fn ensure_project_room(&self, key: &str) -> Result<RoomOutcome, DispatchError> {
        if self.chat.get_room_id_by_name(key).await?.is_some() {
            debug!("Room for project {} already exists", key);
            return Ok(RoomOutcome::Existing);
        }

        let Some(project) = self.tracker.get_project(key).await? else {
            warn!("Project {} no longer exists, not creating its room", key);
            return Ok(RoomOutcome::Dropped);
        };

        let options = CreateRoomOptions {
            alias: project.key.clone(),
            name: format!("{} {}", project.key, project.name),
            topic: Some(project.name.clone()),
            invite: project
                .lead
                .iter()
                .map(|lead| self.chat.chat_user_id(lead))
                .collect(),
        };

        match self.chat.create_room(&options).await {
            Ok(room_id) => {
                info!("Created room {} for project {}", room_id, project.key);
                Ok(RoomOutcome::Created)
            }
            Err(ChatError::RoomAlreadyExists { .. }) => Ok(RoomOutcome::Existing),
            Err(e) => Err(e.into()),
        }
    }
}

fn description_from_issue(issue: &Issue) -> DescriptionFields {
    DescriptionFields {
        assignee_name: issue.assignee.clone(),
        reporter_name: issue.reporter.clone(),
        type_name: issue.type_name.clone(),
        epic_link: None,
        priority: issue.priority.clone(),
        status: issue.status.clone(),
        description: issue.description.clone(),
    }
}
