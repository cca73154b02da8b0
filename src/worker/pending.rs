//! Tracks asynchronous work the host must let finish before tearing the
//! worker down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
  outstanding: AtomicUsize,
  idle: Notify,
}

/// Counter of in-flight work. Cloning shares the same counter.
#[derive(Clone, Default)]
pub struct PendingWork {
  inner: Arc<Inner>,
}

impl PendingWork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a unit of work. It stays pending until the token is dropped.
  pub fn acquire(&self) -> WorkToken {
    self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
    WorkToken {
      inner: Arc::clone(&self.inner),
    }
  }

  pub fn outstanding(&self) -> usize {
    self.inner.outstanding.load(Ordering::SeqCst)
  }

  /// Resolve once no tokens are outstanding.
  pub async fn wait_idle(&self) {
    loop {
      let notified = self.inner.idle.notified();
      tokio::pin!(notified);
      // Register before checking so a release in between is not missed.
      notified.as_mut().enable();

      if self.outstanding() == 0 {
        return;
      }
      notified.await;
    }
  }
}

/// Keeps one unit of work pending while alive.
#[must_use = "work is released as soon as the token is dropped"]
pub struct WorkToken {
  inner: Arc<Inner>,
}

impl Drop for WorkToken {
  fn drop(&mut self) {
    if self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.inner.idle.notify_waiters();
    }
  }
}
