//! [`HttpRobotIo`] – robot arm behind a small REST bridge.
//!
//! The bridge exposes two endpoints:
//!
//! | Request | Body | Reply |
//! |---|---|---|
//! | `POST {base}/joints/read` | – | `{"angles_rad": [f32; 6]}` |
//! | `POST {base}/joints/write` | `{"angles": [f32; 6]}` | any 2xx |

use std::time::Duration;

use armpilot_types::PilotError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::robot_io::{RobotIo, actuation_fault};

const COMPONENT: &str = "http_robot";

/// Per-request timeout for the REST bridge.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ReadReply {
    angles_rad: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    angles: &'a [f32],
}

/// Blocking REST client for a robot bridge.
pub struct HttpRobotIo {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpRobotIo {
    /// Connect to the bridge at `base_url` (e.g. `"http://localhost:80"`).
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Config`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, PilotError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| PilotError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl RobotIo for HttpRobotIo {
    fn id(&self) -> &str {
        COMPONENT
    }

    fn read_state(&mut self) -> Result<Vec<f32>, PilotError> {
        let url = self.endpoint("joints/read");
        let reply: ReadReply = self
            .client
            .post(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| actuation_fault(COMPONENT, format!("POST {url} failed: {e}")))?
            .json()
            .map_err(|e| actuation_fault(COMPONENT, format!("bad reply from {url}: {e}")))?;
        debug!(angles = ?reply.angles_rad, "read joint state");
        Ok(reply.angles_rad)
    }

    fn send_action(&mut self, action: &[f32]) -> Result<(), PilotError> {
        let url = self.endpoint("joints/write");
        self.client
            .post(&url)
            .json(&WriteRequest { angles: action })
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| actuation_fault(COMPONENT, format!("POST {url} failed: {e}")))?;
        Ok(())
    }
}
