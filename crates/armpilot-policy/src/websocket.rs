//! [`WebsocketPolicyClient`] – blocking websocket transport to a policy
//! server.
//!
//! The server sends a metadata frame as soon as the session opens.  After
//! that every request is a single JSON text frame answered by a single
//! response frame.
//!
//! # Example
//!
//! ```rust,no_run
//! use armpilot_policy::websocket::WebsocketPolicyClient;
//!
//! // Requires a running policy server – skipped in unit tests.
//! let client = WebsocketPolicyClient::connect("ws://0.0.0.0:8000", None).unwrap();
//! println!("server metadata: {:?}", client.server_metadata());
//! ```

use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use armpilot_types::PilotError;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::client::{PolicyClient, PolicyResponse, ServerMetadata};
use crate::schema::ObservationBundle;

/// Delay between connection attempts while the server is unreachable.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the websocket transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying socket failed.
    #[error("websocket error: {0}")]
    Socket(#[from] tungstenite::Error),
    /// The server closed the session.
    #[error("server closed the connection")]
    Closed,
    /// A frame arrived that is not valid UTF-8 JSON.
    #[error("unexpected frame: {0}")]
    BadFrame(String),
    /// The server stayed unreachable for longer than the allowed wait.
    #[error("gave up connecting to {url} after {waited:?}")]
    Unreachable { url: String, waited: Duration },
}

impl From<TransportError> for PilotError {
    fn from(err: TransportError) -> Self {
        PilotError::Inference(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebsocketPolicyClient
// ─────────────────────────────────────────────────────────────────────────────

/// A connected policy session.
pub struct WebsocketPolicyClient {
    url: String,
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    metadata: ServerMetadata,
}

impl WebsocketPolicyClient {
    /// Connect to `url` (e.g. `"ws://0.0.0.0:8000"`), retrying every
    /// [`RETRY_INTERVAL`] while the server is unreachable.
    ///
    /// With `max_wait` set to `None` the retry loop only ends on success.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Inference`] when `max_wait` elapses or the
    /// metadata frame is malformed.
    pub fn connect(url: &str, max_wait: Option<Duration>) -> Result<Self, PilotError> {
        Self::connect_with_interval(url, max_wait, RETRY_INTERVAL)
    }

    pub fn connect_with_interval(
        url: &str,
        max_wait: Option<Duration>,
        interval: Duration,
    ) -> Result<Self, PilotError> {
        let started = Instant::now();
        let mut socket = loop {
            match tungstenite::connect(url) {
                Ok((socket, _response)) => break socket,
                Err(e) => {
                    let waited = started.elapsed();
                    if max_wait.is_some_and(|limit| waited + interval > limit) {
                        return Err(TransportError::Unreachable {
                            url: url.to_string(),
                            waited,
                        }
                        .into());
                    }
                    info!(url, error = %e, "still waiting for policy server");
                    thread::sleep(interval);
                }
            }
        };

        let metadata = match read_json(&mut socket)? {
            Value::Object(map) => map,
            other => {
                return Err(TransportError::BadFrame(format!(
                    "server metadata must be an object, got {other}"
                ))
                .into());
            }
        };
        info!(url, keys = metadata.len(), "connected to policy server");

        Ok(Self {
            url: url.to_string(),
            socket,
            metadata,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Metadata announced by the server on connect.
    pub fn server_metadata(&self) -> &ServerMetadata {
        &self.metadata
    }

    fn round_trip(&mut self, payload: String) -> Result<String, TransportError> {
        self.socket.send(Message::text(payload))?;
        read_text(&mut self.socket)
    }
}

impl PolicyClient for WebsocketPolicyClient {
    fn infer(&mut self, observation: &ObservationBundle) -> Result<PolicyResponse, PilotError> {
        let payload = observation.to_wire()?;
        debug!(bytes = payload.len(), schema = %observation.schema(), "sending observation");
        let reply = self.round_trip(payload)?;
        PolicyResponse::from_json(&reply)
    }

    fn metadata(&self) -> &ServerMetadata {
        &self.metadata
    }

    fn close(&mut self) {
        if let Err(e) = self.socket.close(None) {
            warn!(url = %self.url, error = %e, "error closing policy session");
        }
    }
}

/// Read the next data frame, skipping control frames.
fn read_text<S: std::io::Read + std::io::Write>(
    socket: &mut WebSocket<S>,
) -> Result<String, TransportError> {
    loop {
        match socket.read()? {
            Message::Text(text) => return Ok(text.as_str().to_string()),
            Message::Binary(bytes) => {
                return String::from_utf8(bytes.to_vec())
                    .map_err(|e| TransportError::BadFrame(e.to_string()));
            }
            Message::Close(_) => return Err(TransportError::Closed),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }
    }
}

fn read_json<S: std::io::Read + std::io::Write>(
    socket: &mut WebSocket<S>,
) -> Result<Value, TransportError> {
    let text = read_text(socket)?;
    serde_json::from_str(&text).map_err(|e| TransportError::BadFrame(e.to_string()))
}
