//! User notification seam.
//!
//! Push delivery (FCM tokens live on the user record) is a collaborator
//! behind a narrow trait; the core ships a log-only implementation.

use async_trait::async_trait;
use std::fmt;

use crate::types::Result;
use crate::user::UserRecord;

/// Why the user is being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// An activity is paused waiting on their input.
    InputRequired,
    /// A pipeline run finished with at least one failed destination.
    SyncFailed,
}

/// Notification sink contract.
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn notify(&self, user: &UserRecord, kind: NotificationKind, message: &str)
        -> Result<()>;
}

/// Log-only notifier.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user: &UserRecord,
        kind: NotificationKind,
        message: &str,
    ) -> Result<()> {
        tracing::info!(
            user_id = %user.user_id,
            kind = ?kind,
            tokens = user.fcm_tokens.len(),
            message,
            "user notification"
        );
        Ok(())
    }
}
