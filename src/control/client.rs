//! HTTP client for the control API.
//!
//! Mutating calls return `Ok(true)` when the server applied the operation,
//! `Ok(false)` when it rejected it (unknown ID, duplicate, bad time spec),
//! and `Err` only when the server could not be reached or answered with
//! something unreadable.

use crate::control::handle::AlarmStatus;
use crate::control::server::{
    CancelRequest, CreateRequest, ModifyRequest, OperationResponse, SnoozeRequest,
};
use crate::error::{AlarmError, Result};
use crate::scheduler::runner::TaskRunRecord;
use crate::scheduler::tasks::AlarmTask;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Request timeout for control calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a running control API server.
#[derive(Debug, Clone)]
pub struct AlarmClient {
    base_url: String,
    client: reqwest::Client,
}

impl AlarmClient {
    /// Create a client for `base_url`, e.g. `http://127.0.0.1:8080`.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AlarmError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client,
        })
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Schedule a new alarm.
    pub async fn create(&self, alarm_id: &str, time_spec: &str, command: &str) -> Result<bool> {
        self.operation(
            "create",
            &CreateRequest {
                alarm_id: alarm_id.to_owned(),
                time_spec: time_spec.to_owned(),
                command: command.to_owned(),
            },
        )
        .await
    }

    /// Move a pending alarm to a new time spec.
    pub async fn modify(&self, alarm_id: &str, new_time_spec: &str) -> Result<bool> {
        self.operation(
            "modify",
            &ModifyRequest {
                alarm_id: alarm_id.to_owned(),
                new_time_spec: new_time_spec.to_owned(),
            },
        )
        .await
    }

    /// Cancel a pending alarm.
    pub async fn cancel(&self, alarm_id: &str) -> Result<bool> {
        self.operation(
            "cancel",
            &CancelRequest {
                alarm_id: alarm_id.to_owned(),
            },
        )
        .await
    }

    /// Snooze a pending alarm. `None` uses the server's default length.
    pub async fn snooze(&self, alarm_id: &str, snooze_seconds: Option<u64>) -> Result<bool> {
        self.operation(
            "snooze",
            &SnoozeRequest {
                alarm_id: alarm_id.to_owned(),
                snooze_seconds,
            },
        )
        .await
    }

    /// Look up one alarm. The ID is percent-encoded into the path.
    pub async fn status(&self, alarm_id: &str) -> Result<AlarmStatus> {
        self.get_json(&format!("status/{}", urlencoding::encode(alarm_id)))
            .await
    }

    /// All pending alarms, earliest first.
    pub async fn list(&self) -> Result<Vec<AlarmTask>> {
        self.get_json("alarms").await
    }

    /// Recently finished executions, oldest first.
    pub async fn history(&self) -> Result<Vec<TaskRunRecord>> {
        self.get_json("history").await
    }

    async fn operation<B: Serialize>(&self, path: &str, body: &B) -> Result<bool> {
        let url = format!("{}/{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AlarmError::Http(format!("POST {url} failed: {e}")))?;

        let status = resp.status();
        let body: OperationResponse = resp
            .json()
            .await
            .map_err(|e| AlarmError::Http(format!("POST {url} returned {status}: {e}")))?;

        if let Some(err) = &body.error {
            debug!(path, kind = %err.kind, message = %err.message, "operation rejected");
        }
        Ok(body.success)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AlarmError::Http(format!("GET {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AlarmError::Http(format!("GET {url} returned {status}")));
        }
        resp.json()
            .await
            .map_err(|e| AlarmError::Http(format!("GET {url} returned invalid JSON: {e}")))
    }
}
