use std::sync::Arc;

use serde::{Deserialize, Serialize};

use noticeboard_core::domain::notice::UserId;
use noticeboard_core::domain::notification::{Notification, NotificationId};
use noticeboard_core::errors::{ApplicationError, ApprovalError};
use noticeboard_db::repositories::NotificationRepository;

pub const DEFAULT_INBOX_LIMIT: u32 = 20;
pub const MAX_INBOX_LIMIT: u32 = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxPage {
    pub user_id: UserId,
    pub unread: u64,
    pub notifications: Vec<Notification>,
}

/// Per-user notification inbox fed by the outbox relay.
pub struct NotificationInbox {
    notifications: Arc<dyn NotificationRepository>,
}

impl NotificationInbox {
    pub fn new(notifications: Arc<dyn NotificationRepository>) -> Self {
        Self { notifications }
    }

    pub async fn list(&self, user_id: &UserId, limit: Option<u32>) -> Result<InboxPage, ApplicationError> {
        let limit = limit.unwrap_or(DEFAULT_INBOX_LIMIT).clamp(1, MAX_INBOX_LIMIT);
        let notifications = self.notifications.list_for_user(user_id, limit).await?;
        let unread = self.notifications.count_unread(user_id).await?;
        Ok(InboxPage { user_id: user_id.clone(), unread, notifications })
    }

    pub async fn mark_read(&self, id: &NotificationId, user_id: &UserId) -> Result<(), ApplicationError> {
        if self.notifications.mark_read(id, user_id).await? {
            Ok(())
        } else {
            Err(ApprovalError::not_found("notification", id.0.clone()).into())
        }
    }

    pub async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        Ok(self.notifications.mark_all_read(user_id).await?)
    }
}
