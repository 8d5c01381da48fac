use j2m_core::records::{Action, PostCommentData};
use j2m_core::webhook::{COMMENT_CREATED, COMMENT_UPDATED};
use j2m_core::WebhookEvent;

use super::ParseError;
use crate::config::Features;

pub(super) fn is_post_comment(event: &WebhookEvent, features: &Features) -> bool {
    features.post_comments
        && matches!(event.event_name(), COMMENT_CREATED | COMMENT_UPDATED)
        && event.comment.is_some()
}

pub(super) fn parse_post_comment(
    event: &WebhookEvent,
    _features: &Features,
) -> Result<Action, ParseError> {
    let comment = event
        .comment
        .as_ref()
        .ok_or(ParseError::MissingField("comment"))?;
    let issue_id = event
        .comment_issue_id()
        .ok_or(ParseError::MissingField("comment issue id"))?;

    let author = event.author_label().to_string();
    let header_text = if event.event_name() == COMMENT_UPDATED {
        format!("{} changed a comment", author)
    } else {
        format!("{} added a comment", author)
    };

    Ok(Action::PostComment(PostCommentData {
        issue_id,
        issue_key: event.issue.as_ref().map(|i| i.key.clone()),
        header_text,
        comment_id: comment.id.clone(),
        body: comment.body.clone().unwrap_or_default(),
        author,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_updated_comment_uses_update_author() {
        let hook: WebhookEvent = serde_json::from_value(json!({
            "webhookEvent": "comment_updated",
            "timestamp": 5,
            "comment": {
                "id": "77",
                "self": "https://jira.example.com/rest/api/2/issue/10001/comment/77",
                "body": "edited",
                "author": {"name": "alice", "displayName": "Alice"},
                "updateAuthor": {"name": "bob", "displayName": "Bob"}
            }
        }))
        .unwrap();

        let Action::PostComment(data) = parse_post_comment(&hook, &Features::default()).unwrap()
        else {
            panic!("expected postComment");
        };
        assert_eq!(data.issue_id, "10001");
        assert_eq!(data.issue_key, None);
        assert_eq!(data.header_text, "Bob changed a comment");
        assert_eq!(data.body, "edited");
    }

    #[test]
    fn test_comment_without_issue_reference_fails() {
        let hook: WebhookEvent = serde_json::from_value(json!({
            "webhookEvent": "comment_created",
            "timestamp": 5,
            "comment": {"id": "77", "body": "orphan"}
        }))
        .unwrap();

        assert!(is_post_comment(&hook, &Features::default()));
        assert_eq!(
            parse_post_comment(&hook, &Features::default()),
            Err(ParseError::MissingField("comment issue id"))
        );
    }
}
