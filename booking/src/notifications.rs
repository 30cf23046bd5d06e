//! Notification Dispatcher.
//!
//! One call to [`NotificationDispatcher::notify`] produces at most one stored
//! [`Notification`]. There are no retries: a failed dispatch is reported to the caller,
//! which logs it and carries on. The template text for each kind lives in [`render`].

use crate::stores::NotificationRepository;
use crate::types::{
    Notification, NotificationId, NotificationKind, SessionId, SessionStatus, UserId,
};
use chrono::{DateTime, Utc};
use mentorly_core::environment::Clock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Notification dispatch error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The notification could not be persisted
    #[error("Failed to store notification: {0}")]
    Store(String),
    /// Dispatch exceeded its time budget
    #[error("Notification dispatch timed out after {0:?}")]
    Timeout(Duration),
}

/// Boxed future returned by [`NotificationDispatcher::notify`]
pub type NotifyFuture = Pin<Box<dyn Future<Output = Result<NotificationId, NotificationError>> + Send>>;

/// Values substituted into a notification template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateParams {
    /// Session status after the triggering transition
    pub status: SessionStatus,
    /// Session start
    pub starts_at: DateTime<Utc>,
}

/// One notification to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Recipient
    pub user_id: UserId,
    /// Notification type
    pub kind: NotificationKind,
    /// Session that caused it
    pub related_session_id: SessionId,
    /// Template values
    pub params: TemplateParams,
}

/// Title and message for a notification kind.
#[must_use]
pub fn render(kind: NotificationKind, params: &TemplateParams) -> (String, String) {
    let when = params.starts_at.format("%Y-%m-%d %H:%M UTC");
    match kind {
        NotificationKind::Request => (
            "New Session Request".to_string(),
            format!("You have a new session request for {when}"),
        ),
        NotificationKind::Confirmation => (
            "Session Confirmed".to_string(),
            format!("Your session on {when} has been confirmed"),
        ),
        NotificationKind::Summary if params.status == SessionStatus::Declined => (
            "Session Declined".to_string(),
            format!("Your session request for {when} was declined"),
        ),
        NotificationKind::Summary => (
            "Session Cancelled".to_string(),
            format!("Your session on {when} was cancelled"),
        ),
        NotificationKind::Reminder => (
            "Session Reminder".to_string(),
            format!("Your session starts at {when}"),
        ),
        NotificationKind::FollowUp => (
            "Session Completed".to_string(),
            format!("Your session on {when} is complete. Add your notes while they are fresh"),
        ),
    }
}

/// Delivers notifications.
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver one notification.
    ///
    /// # Errors
    ///
    /// Returns error if the notification could not be delivered. Callers log the error and
    /// never fail the triggering transition because of it.
    fn notify(&self, request: NotificationRequest) -> NotifyFuture;
}

/// Dispatcher that persists each notification in a [`NotificationRepository`].
pub struct StoredNotificationDispatcher {
    repo: Arc<dyn NotificationRepository>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl StoredNotificationDispatcher {
    /// Creates a new dispatcher bounded by `timeout` per notification
    #[must_use]
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            clock,
            timeout,
        }
    }
}

impl NotificationDispatcher for StoredNotificationDispatcher {
    fn notify(&self, request: NotificationRequest) -> NotifyFuture {
        let repo = Arc::clone(&self.repo);
        let timeout = self.timeout;
        let (title, message) = render(request.kind, &request.params);
        let notification = Notification {
            id: NotificationId::new(),
            user_id: request.user_id,
            title,
            message,
            kind: request.kind,
            read: false,
            created_at: self.clock.now(),
            related_session_id: Some(request.related_session_id),
        };

        Box::pin(async move {
            let stored = tokio::time::timeout(timeout, repo.insert_notification(notification))
                .await
                .map_err(|_| NotificationError::Timeout(timeout))?
                .map_err(|e| NotificationError::Store(e.to_string()))?;
            tracing::debug!(
                notification_id = %stored.id,
                user_id = %stored.user_id,
                kind = %stored.kind,
                "Notification stored"
            );
            Ok(stored.id)
        })
    }
}
