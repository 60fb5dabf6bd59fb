//! Test helpers shared across Switchboard crates.

pub mod backend;
pub mod messenger;
pub mod records;
pub mod wait;

pub use backend::{BackendCall, Gate, StubBackend};
pub use messenger::RecordingMessenger;
pub use records::{ai_record, client, human_record, nested_record, record_time};
pub use wait::{wait_for_subscribers, wait_for_view};
