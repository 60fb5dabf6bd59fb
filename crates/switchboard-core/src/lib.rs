//! Conversation synchronization core for the Switchboard console.
//!
//! This crate keeps the operator's conversation list and the open
//! conversation's message history consistent by merging a fixed-cadence
//! rescan with a live change feed. All state transitions run on one actor
//! task (see [`service`]); the pieces it drives are plain state machines that
//! can be exercised on their own.

pub mod backend;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod event;
pub mod feed;
pub mod normalizer;
pub mod reconciler;
pub mod scheduler;
pub mod service;
pub mod stream;

/// Collaborator seams implemented by backend adapters and test stubs.
pub use backend::{ConversationBackend, Messenger};
pub use error::{BackendError, FeedError, SyncError};
pub use feed::{BroadcastChangeFeed, ChangeFeed, InsertFilter, RecordStream};
pub use normalizer::{normalize, normalize_all};
pub use reconciler::{ConversationReconciler, RescanMode};
pub use scheduler::{RefreshScheduler, Visibility};
/// Service facade consumed by the UI layer.
pub use service::{ConsoleView, ErrorSource, SyncHandle, SyncService, ViewError};
pub use stream::{MessageStream, OpenTicket, StreamState};
