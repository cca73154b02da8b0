//! The cache lifecycle manager.
//!
//! A worker owns one versioned cache partition and reacts to host events:
//! - `Install` precaches the manifest, all or nothing
//! - `Activate` deletes every partition from older versions
//! - `FetchIntercept` answers requests cache-first with an offline fallback
//! - `Push` shows a notification
//!
//! Background work (response stores) is tracked by [`PendingWork`] so the
//! host knows when the worker may be torn down.

mod event;
mod lifecycle;
mod pending;

pub use event::{EventOutcome, WorkerEvent, WorkerState};
pub use lifecycle::CacheWorker;
pub use pending::PendingWork;
