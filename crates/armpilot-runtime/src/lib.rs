//! `armpilot-runtime` – The Control Loop Engine
//!
//! Turns slow, chunked remote inference into a steady stream of joint
//! targets.
//!
//! # Modules
//!
//! - [`normalizer`] – [`StateNormalizer`][normalizer::StateNormalizer]:
//!   validates raw joint readings, converts degrees, reorders channels and
//!   clamps to limits.
//! - [`broker`] – [`ActionChunkBroker`][broker::ActionChunkBroker]: caches one
//!   predicted chunk and serves it row by row, refreshing only when it runs
//!   out.  [`SharedBroker`][broker::SharedBroker] wraps it for several
//!   callers.
//! - [`pacer`] – [`Pacer`][pacer::Pacer] and the [`Clock`][pacer::Clock]
//!   seam: fixed-rate deadlines that drop missed slots instead of bursting.
//! - [`actuation_loop`] – [`ActuationLoop`][actuation_loop::ActuationLoop]:
//!   the `INIT → WARMUP → RUNNING → SHUTDOWN` driver tying everything
//!   together.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console or
//!   JSON logs with optional OTLP span export.

pub mod actuation_loop;
pub mod broker;
pub mod normalizer;
pub mod pacer;
pub mod telemetry;

pub use actuation_loop::{
    ActuationErrorPolicy, ActuationLoop, ActuationLoopConfig, LoopPhase, LoopSummary, Rig,
};
pub use broker::{ActionChunkBroker, ChunkRefresh, ServedAction, SharedBroker};
pub use normalizer::{StateNormalizer, normalize_state};
pub use pacer::{Clock, ManualClock, Pace, Pacer, SystemClock};
pub use telemetry::{TracerProviderGuard, init_tracing};
