//! HTTP adapters connecting the sync core to a hosted PostgREST backend and
//! an automation webhook.

mod http;
mod polling;
mod rest;
mod webhook;

pub use polling::{PollingChangeFeed, RecordTail};
pub use rest::RestBackend;
pub use webhook::WebhookMessenger;
