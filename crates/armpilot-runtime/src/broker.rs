//! [`ActionChunkBroker`] – serves one action per tick out of a cached chunk.
//!
//! The policy server predicts `H` future actions per call.  The broker keeps
//! the latest chunk and a cursor into it:
//!
//! - no chunk, or cursor at `H`: send the observation, validate the reply,
//!   replace the chunk and reset the cursor to 0;
//! - otherwise: ignore the observation and serve the row at the cursor.
//!
//! The cursor advances by one after every served row.  A failed refresh
//! leaves the broker untouched, so the exhausted chunk is never served again
//! and the next call fetches anew.  There are no retries.
//!
//! # Example
//!
//! ```rust,no_run
//! use armpilot_policy::WebsocketPolicyClient;
//! use armpilot_runtime::broker::ActionChunkBroker;
//!
//! let client = WebsocketPolicyClient::connect("ws://0.0.0.0:8000", None).unwrap();
//! let mut broker = ActionChunkBroker::new(client, 50, 6).unwrap();
//! # let observation: armpilot_policy::ObservationBundle = todo!();
//! let served = broker.infer(&observation).unwrap();
//! println!("row {} -> {:?}", served.index, served.action);
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use armpilot_policy::{ObservationBundle, PolicyClient, ServerMetadata, trim_actions};
use armpilot_types::{ActionChunk, ActionVector, PilotError};
use serde_json::Value;
use tracing::{debug, info, info_span};

// ─────────────────────────────────────────────────────────────────────────────
// Served output
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the server returned with a freshly fetched chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRefresh {
    pub chunk: ActionChunk,
    pub policy_timing: Option<Value>,
    pub server_timing: Option<Value>,
}

/// The single action row produced by one [`ActionChunkBroker::infer`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ServedAction {
    /// Index of `action` within its chunk.
    pub index: usize,
    pub action: ActionVector,
    /// Present only when this call fetched a new chunk.
    pub refresh: Option<ChunkRefresh>,
}

impl ServedAction {
    pub fn refreshed(&self) -> bool {
        self.refresh.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionChunkBroker
// ─────────────────────────────────────────────────────────────────────────────

pub struct ActionChunkBroker<P> {
    client: P,
    horizon: usize,
    action_dim: usize,
    chunk: Option<ActionChunk>,
    cursor: usize,
}

impl<P: PolicyClient> ActionChunkBroker<P> {
    /// Wrap `client`, serving `horizon` rows of `action_dim` values per
    /// fetched chunk.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Config`] when `horizon` or `action_dim` is zero.
    pub fn new(client: P, horizon: usize, action_dim: usize) -> Result<Self, PilotError> {
        if horizon == 0 {
            return Err(PilotError::Config("action horizon must be at least 1".to_string()));
        }
        if action_dim == 0 {
            return Err(PilotError::Config("action dimension must be at least 1".to_string()));
        }
        Ok(Self {
            client,
            horizon,
            action_dim,
            chunk: None,
            cursor: 0,
        })
    }

    /// Serve the next action, fetching a new chunk first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Inference`] when the refresh call fails or the
    /// reply has fewer than `horizon` rows, rows narrower than `action_dim`,
    /// or non-finite values.  The broker state is unchanged on error.
    pub fn infer(&mut self, observation: &ObservationBundle) -> Result<ServedAction, PilotError> {
        let refresh = if self.needs_refresh() {
            let refresh = self.fetch(observation)?;
            self.chunk = Some(refresh.chunk.clone());
            self.cursor = 0;
            Some(refresh)
        } else {
            None
        };

        let index = self.cursor;
        let action = self
            .chunk
            .as_ref()
            .and_then(|c| c.row(index))
            .cloned()
            .ok_or_else(|| PilotError::Inference(format!("no cached action at index {index}")))?;
        self.cursor += 1;
        debug!(index, "serving cached action");

        Ok(ServedAction {
            index,
            action,
            refresh,
        })
    }

    fn fetch(&mut self, observation: &ObservationBundle) -> Result<ChunkRefresh, PilotError> {
        let _span = info_span!("chunk_refresh", horizon = self.horizon).entered();
        let response = self.client.infer(observation)?;
        let received = response.actions.len();
        if received < self.horizon {
            return Err(PilotError::Inference(format!(
                "server returned {received} action rows, need at least {}",
                self.horizon
            )));
        }
        let mut rows = trim_actions(response.actions, self.action_dim)?;
        rows.truncate(self.horizon);
        let chunk = ActionChunk::new(rows)?;
        info!(received, horizon = self.horizon, "fetched new action chunk");
        Ok(ChunkRefresh {
            chunk,
            policy_timing: response.policy_timing,
            server_timing: response.server_timing,
        })
    }

    /// `true` when the next [`infer`](Self::infer) will call the server.
    pub fn needs_refresh(&self) -> bool {
        self.chunk.is_none() || self.cursor >= self.horizon
    }

    /// Drop the cached chunk so the next call fetches fresh.
    pub fn reset(&mut self) {
        self.chunk = None;
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    pub fn chunk(&self) -> Option<&ActionChunk> {
        self.chunk.as_ref()
    }

    /// Metadata the server announced when the session opened.
    pub fn metadata(&self) -> &ServerMetadata {
        self.client.metadata()
    }

    pub fn client_mut(&mut self) -> &mut P {
        &mut self.client
    }

    /// Close the underlying session.
    pub fn close(&mut self) {
        self.client.close();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SharedBroker
// ─────────────────────────────────────────────────────────────────────────────

/// A broker handle that several callers can use concurrently.
///
/// The refresh-or-serve decision and the cursor advance happen under one
/// lock, so no two callers are ever served the same row of a chunk.
pub struct SharedBroker<P> {
    inner: Arc<Mutex<ActionChunkBroker<P>>>,
}

impl<P> Clone for SharedBroker<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: PolicyClient> SharedBroker<P> {
    pub fn new(broker: ActionChunkBroker<P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(broker)),
        }
    }

    /// See [`ActionChunkBroker::infer`].
    pub fn infer(&self, observation: &ObservationBundle) -> Result<ServedAction, PilotError> {
        self.lock().infer(observation)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor()
    }

    fn lock(&self) -> MutexGuard<'_, ActionChunkBroker<P>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::thread;

    use armpilot_policy::{CapturedFrames, ObservationSchema, PolicyResponse};
    use armpilot_types::{JointState, RgbImage};

    use super::*;

    /// Replays scripted replies and records the state of every observation
    /// it was sent.
    struct ScriptedClient {
        replies: VecDeque<Result<PolicyResponse, PilotError>>,
        sent: Vec<JointState>,
        metadata: ServerMetadata,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<PolicyResponse, PilotError>>) -> Self {
            Self {
                replies: replies.into(),
                sent: Vec::new(),
                metadata: ServerMetadata::new(),
            }
        }
    }

    impl PolicyClient for ScriptedClient {
        fn infer(&mut self, observation: &ObservationBundle) -> Result<PolicyResponse, PilotError> {
            self.sent.push(observation.state());
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(PilotError::Inference("script exhausted".to_string())))
        }

        fn metadata(&self) -> &ServerMetadata {
            &self.metadata
        }
    }

    /// A chunk whose row `i` is filled with `base + i`.
    fn chunk(base: f32, rows: usize, dim: usize) -> Result<PolicyResponse, PilotError> {
        Ok(PolicyResponse::new(
            (0..rows).map(|i| vec![base + i as f32; dim]).collect(),
        ))
    }

    fn observation(tag: f32) -> ObservationBundle {
        let mut frames = CapturedFrames::new();
        for camera in ObservationSchema::So100.cameras() {
            frames.insert(*camera, RgbImage::black(1, 1));
        }
        ObservationBundle::assemble(ObservationSchema::So100, JointState([tag; 6]), frames, "")
            .unwrap()
    }

    #[test]
    fn serves_cached_rows_until_horizon() {
        let client = ScriptedClient::new(vec![chunk(0.0, 4, 6), chunk(100.0, 4, 6)]);
        let mut broker = ActionChunkBroker::new(client, 4, 6).unwrap();

        let served: Vec<ServedAction> =
            (0..6).map(|t| broker.infer(&observation(t as f32)).unwrap()).collect();

        let indices: Vec<usize> = served.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 0, 1]);
        assert!(served[0].refreshed());
        assert!(!served[1].refreshed() && !served[3].refreshed());
        assert!(served[4].refreshed());
        assert_eq!(served[3].action, vec![3.0; 6]);
        assert_eq!(served[4].action, vec![100.0; 6]);

        // Only the ticks that refreshed sent their observation.
        assert_eq!(broker.client_mut().sent, vec![JointState([0.0; 6]), JointState([4.0; 6])]);
    }

    #[test]
    fn no_row_is_served_twice() {
        let client = ScriptedClient::new((0..3).map(|k| chunk(k as f32 * 10.0, 5, 2)).collect());
        let mut broker = ActionChunkBroker::new(client, 5, 2).unwrap();
        let actions: Vec<ActionVector> = (0..15)
            .map(|_| broker.infer(&observation(0.0)).unwrap().action)
            .collect();
        for pair in actions.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn horizon_one_always_fetches() {
        let client = ScriptedClient::new(vec![chunk(0.0, 3, 6), chunk(1.0, 3, 6), chunk(2.0, 3, 6)]);
        let mut broker = ActionChunkBroker::new(client, 1, 6).unwrap();
        for _ in 0..3 {
            let served = broker.infer(&observation(0.0)).unwrap();
            assert!(served.refreshed());
            assert_eq!(served.index, 0);
            assert_eq!(served.refresh.unwrap().chunk.len(), 1);
        }
    }

    #[test]
    fn failed_refresh_caches_nothing_and_refetches() {
        let client = ScriptedClient::new(vec![
            chunk(0.0, 2, 6),
            Err(PilotError::Inference("connection reset".to_string())),
            chunk(7.0, 2, 6),
        ]);
        let mut broker = ActionChunkBroker::new(client, 2, 6).unwrap();
        broker.infer(&observation(0.0)).unwrap();
        broker.infer(&observation(0.0)).unwrap();
        assert!(broker.needs_refresh());

        let err = broker.infer(&observation(1.0)).unwrap_err();
        assert!(matches!(err, PilotError::Inference(_)));
        assert!(broker.needs_refresh(), "exhausted chunk must not be reused");

        let served = broker.infer(&observation(2.0)).unwrap();
        assert!(served.refreshed());
        assert_eq!((served.index, served.action), (0, vec![7.0; 6]));
        assert_eq!(broker.client_mut().sent.len(), 3);
    }

    #[test]
    fn undersized_chunk_is_rejected() {
        let client = ScriptedClient::new(vec![chunk(0.0, 49, 6)]);
        let mut broker = ActionChunkBroker::new(client, 50, 6).unwrap();
        let err = broker.infer(&observation(0.0)).unwrap_err();
        assert!(err.to_string().contains("49"));
        assert!(broker.chunk().is_none());
    }

    #[test]
    fn narrow_rows_are_rejected_and_wide_rows_trimmed() {
        let client = ScriptedClient::new(vec![chunk(0.0, 2, 5), chunk(1.0, 3, 32)]);
        let mut broker = ActionChunkBroker::new(client, 2, 6).unwrap();
        assert!(broker.infer(&observation(0.0)).is_err());

        let served = broker.infer(&observation(0.0)).unwrap();
        let refresh = served.refresh.unwrap();
        assert_eq!((refresh.chunk.len(), refresh.chunk.dim()), (2, 6));
        assert_eq!(served.action.len(), 6);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut rows = vec![vec![0.0; 6]; 2];
        rows[1][2] = f32::NAN;
        let client = ScriptedClient::new(vec![Ok(PolicyResponse::new(rows))]);
        let mut broker = ActionChunkBroker::new(client, 2, 6).unwrap();
        assert!(broker.infer(&observation(0.0)).is_err());
        assert!(broker.needs_refresh());
    }

    #[test]
    fn reset_forces_a_new_fetch() {
        let client = ScriptedClient::new(vec![chunk(0.0, 10, 6), chunk(5.0, 10, 6)]);
        let mut broker = ActionChunkBroker::new(client, 10, 6).unwrap();
        broker.infer(&observation(0.0)).unwrap();
        broker.reset();
        let served = broker.infer(&observation(0.0)).unwrap();
        assert!(served.refreshed());
        assert_eq!(served.action, vec![5.0; 6]);
    }

    #[test]
    fn zero_horizon_is_a_config_error() {
        let err = ActionChunkBroker::new(ScriptedClient::new(vec![]), 0, 6).err().unwrap();
        assert!(matches!(err, PilotError::Config(_)));
    }

    #[test]
    fn shared_broker_hands_out_each_row_once() {
        let client = ScriptedClient::new(vec![chunk(0.0, 20, 1), chunk(20.0, 20, 1)]);
        let shared = SharedBroker::new(ActionChunkBroker::new(client, 20, 1).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let broker = shared.clone();
                thread::spawn(move || {
                    let obs = observation(0.0);
                    (0..10)
                        .map(|_| broker.infer(&obs).unwrap().action[0] as i32)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<i32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..40).collect::<Vec<_>>());
    }
}
