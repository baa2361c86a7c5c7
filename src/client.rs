//! Vendor controller HTTP client
//!
//! The controller accepts `GET /<command>?key=value` requests and answers
//! every one of them with its full status as newline-separated `key=value`
//! text. One call is one bounded exchange; retry policy, if any, belongs to
//! the caller.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ControllerError;
use crate::status::StatusSnapshot;

/// One request/response exchange with the mount controller.
///
/// The trait seam lets command orchestration run against a scripted
/// controller in tests.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Issue one command and parse the returned status snapshot.
    async fn exchange(
        &self,
        command: &str,
        params: &[(&str, String)],
    ) -> Result<StatusSnapshot, ControllerError>;

    /// Poll the controller status without issuing a command.
    async fn status(&self) -> Result<StatusSnapshot, ControllerError> {
        self.exchange("status", &[]).await
    }
}

/// reqwest-backed client for a PWI4-style controller.
pub struct PwiClient {
    http: reqwest::Client,
    base_url: String,
}

impl PwiClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, ControllerError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: format!("http://{host}:{port}"),
        })
    }
}

#[async_trait]
impl Controller for PwiClient {
    async fn exchange(
        &self,
        command: &str,
        params: &[(&str, String)],
    ) -> Result<StatusSnapshot, ControllerError> {
        let url = format!("{}/{}", self.base_url, command);
        debug!(command, "issuing controller exchange");

        let response = self.http.get(&url).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(StatusSnapshot::parse(&body))
    }
}
