use crate::cache::FetchResult;
use crate::net::Request;
use crate::notify::Notification;

/// Events the host delivers to the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  /// Populate the current partition from the manifest
  Install,
  /// Drop every partition except the current one
  Activate,
  /// Answer an intercepted network request
  FetchIntercept(Request),
  /// Show a notification for a push payload
  Push(Option<String>),
}

impl WorkerEvent {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Install => "install",
      Self::Activate => "activate",
      Self::FetchIntercept(_) => "fetch",
      Self::Push(_) => "push",
    }
  }
}

/// What handling an event did.
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed { cached: usize },
  Activated { deleted: Vec<String> },
  Responded(FetchResult),
  Notified(Notification),
}

/// Lifecycle of one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, install not started
  Parsed,
  /// Running the install event
  Installing,
  /// Precache complete, waiting to be promoted
  Installed,
  /// Cleaning up stale partitions
  Activating,
  /// Steady state: intercepting fetches
  Ready,
  /// Install failed; this version will never activate
  Redundant,
}

impl WorkerState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Ready => "ready",
      Self::Redundant => "redundant",
    }
  }
}
