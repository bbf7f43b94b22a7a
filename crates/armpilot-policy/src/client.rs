//! The [`PolicyClient`] seam and the response shape shared by every
//! transport.
//!
//! A response carries the predicted action rows plus whatever timing or
//! diagnostic fields the server attaches.  Rows arrive either as nested JSON
//! arrays or as an ndarray envelope (`{"dtype", "shape", "data"}`), the same
//! envelope the client uses for images.

use armpilot_types::{ActionVector, PilotError};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::schema::ObservationBundle;

/// Free-form metadata the server announces when a session opens.
pub type ServerMetadata = Map<String, Value>;

/// One inference call's result.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyResponse {
    /// Predicted action rows, oldest first, as produced by the model.
    pub actions: Vec<ActionVector>,
    /// Model-side timing, when the server reports it.
    pub policy_timing: Option<Value>,
    /// Transport-side timing, when the server reports it.
    pub server_timing: Option<Value>,
}

impl PolicyResponse {
    pub fn new(actions: Vec<ActionVector>) -> Self {
        Self {
            actions,
            policy_timing: None,
            server_timing: None,
        }
    }

    /// Decode a response frame.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Inference`] when the frame is not JSON, carries
    /// an `error` field, or lacks a well-formed `actions` entry.
    pub fn from_json(text: &str) -> Result<Self, PilotError> {
        let raw: RawResponse = serde_json::from_str(text)
            .map_err(|e| PilotError::Inference(format!("malformed response: {e}")))?;
        if let Some(err) = raw.error {
            return Err(PilotError::Inference(format!("server error: {err}")));
        }
        let actions = raw
            .actions
            .ok_or_else(|| PilotError::Inference("response has no 'actions' field".to_string()))?
            .into_rows()?;
        Ok(Self {
            actions,
            policy_timing: raw.policy_timing,
            server_timing: raw.server_timing,
        })
    }
}

#[derive(Deserialize)]
struct RawResponse {
    actions: Option<RawActions>,
    error: Option<Value>,
    policy_timing: Option<Value>,
    server_timing: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawActions {
    Nested(Vec<Vec<f32>>),
    NdArray { shape: Vec<usize>, data: Vec<f32> },
}

impl RawActions {
    fn into_rows(self) -> Result<Vec<ActionVector>, PilotError> {
        match self {
            RawActions::Nested(rows) => Ok(rows),
            RawActions::NdArray { shape, data } => {
                let [rows, cols] = shape[..] else {
                    return Err(PilotError::Inference(format!(
                        "actions must be 2-dimensional, got shape {shape:?}"
                    )));
                };
                if cols == 0 || rows.checked_mul(cols) != Some(data.len()) {
                    return Err(PilotError::Inference(format!(
                        "actions shape {shape:?} does not match {} values",
                        data.len()
                    )));
                }
                Ok(data.chunks(cols).map(<[f32]>::to_vec).collect())
            }
        }
    }
}

/// A request/response channel to a remote action-prediction service.
///
/// Implementations block until the server answers.  They must not retry a
/// failed request on their own.
pub trait PolicyClient {
    /// Send `observation` and return the predicted action rows.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Inference`] on transport failure or a malformed
    /// reply.
    fn infer(&mut self, observation: &ObservationBundle) -> Result<PolicyResponse, PilotError>;

    /// Metadata announced by the server when the session opened.
    fn metadata(&self) -> &ServerMetadata;

    /// Close the session.
    fn close(&mut self) {}
}

impl<P: PolicyClient + ?Sized> PolicyClient for Box<P> {
    fn infer(&mut self, observation: &ObservationBundle) -> Result<PolicyResponse, PilotError> {
        (**self).infer(observation)
    }

    fn metadata(&self) -> &ServerMetadata {
        (**self).metadata()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
