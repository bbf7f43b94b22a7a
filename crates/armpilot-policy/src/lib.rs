//! `armpilot-policy` – Remote Policy Interface
//!
//! Everything on the wire between the arm and the action-prediction server.
//!
//! # Modules
//!
//! - [`schema`] – [`ObservationSchema`][schema::ObservationSchema] layouts and
//!   the [`ObservationBundle`][schema::ObservationBundle] sent every refresh.
//! - [`client`] – the [`PolicyClient`][client::PolicyClient] seam and
//!   [`PolicyResponse`][client::PolicyResponse] decoding.
//! - [`websocket`] – [`WebsocketPolicyClient`][websocket::WebsocketPolicyClient],
//!   the blocking websocket transport with connect-time retry.
//! - [`transforms`] – SO-100 action trimming.

pub mod client;
pub mod schema;
pub mod transforms;
pub mod websocket;

pub use client::{PolicyClient, PolicyResponse, ServerMetadata};
pub use schema::{CapturedFrames, ObservationBundle, ObservationSchema};
pub use transforms::trim_actions;
pub use websocket::{TransportError, WebsocketPolicyClient};
