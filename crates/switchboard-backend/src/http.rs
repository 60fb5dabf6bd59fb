//! Shared request plumbing.

use reqwest::{Client, Response};
use std::time::Duration;
use switchboard_core::BackendError;

pub(crate) fn build_client(timeout: Duration) -> Result<Client, BackendError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| BackendError::Transport(err.to_string()))
}

pub(crate) fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Transport(err.to_string())
}

/// Turn a non-success response into [`BackendError::Status`].
pub(crate) async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Required non-blank setting.
pub(crate) fn required(value: Option<&str>, path: &str) -> Result<String, BackendError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.trim_end_matches('/').to_string())
        .ok_or_else(|| BackendError::NotConfigured(path.to_string()))
}
