//! Notification display capability.

use async_trait::async_trait;
use color_eyre::Result;
use tracing::info;

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
}

/// Host capability that shows notifications to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that emits each notification as a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      icon = %notification.icon,
      "notification"
    );
    Ok(())
  }
}
