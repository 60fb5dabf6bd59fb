//! Error types for the synchronization core.

use thiserror::Error;

/// Failures talking to the hosted backend or the messaging collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend answered with a non-success status.
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// A required setting is missing.
    #[error("not configured: {0}")]
    NotConfigured(String),
}

/// Change-feed subscription failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The subscription could not be established.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    /// The feed transport failed while delivering.
    #[error("feed backend error: {0}")]
    Backend(#[from] BackendError),
    /// The feed was shut down.
    #[error("feed closed")]
    Closed,
}

/// Errors returned by the sync service handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
    /// Sending requires an open conversation.
    #[error("no conversation selected")]
    NoConversationSelected,
    /// No messenger was configured for outbound sends.
    #[error("messaging is not configured")]
    MessagingUnavailable,
    /// Refused to send an empty message.
    #[error("message cannot be empty")]
    EmptyMessage,
    /// The service task has stopped.
    #[error("sync service is not running")]
    ServiceClosed,
}
