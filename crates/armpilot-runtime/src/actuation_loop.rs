//! [`ActuationLoop`] – the fixed-rate sense → infer → act cycle.
//!
//! The loop walks through `INIT → WARMUP → RUNNING → SHUTDOWN`.  Each
//! RUNNING tick:
//!
//! 1. capture one frame per schema camera and read the raw joint state;
//! 2. normalize the state, substituting zeros on failure;
//! 3. assemble the [`ObservationBundle`];
//! 4. ask the [`ActionChunkBroker`] for the next action;
//! 5. send it to the robot, or only report it when none is attached;
//! 6. sleep until the next slot, or resync if the tick overran.
//!
//! # Failure handling
//!
//! | Error | Effect |
//! |---|---|
//! | `SensorCapture` | fatal: the loop shuts down and returns the error |
//! | `InvalidState` / `InvalidPermutation` | zero state substituted, tick continues; this includes a robot reading of the wrong length |
//! | `Inference` | tick skipped, nothing sent, loop continues |
//! | `Actuation` | per [`ActuationErrorPolicy`]: abort (default) or continue |
//!
//! Cameras, robot and policy session are released exactly once on every exit
//! path.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use armpilot_hal::{FrameSource, RobotIo};
use armpilot_policy::{CapturedFrames, ObservationBundle, ObservationSchema, PolicyClient};
use armpilot_types::{JOINT_COUNT, JointState, PilotError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use crate::broker::{ActionChunkBroker, ServedAction};
use crate::normalizer::StateNormalizer;
use crate::pacer::{Clock, Pace, Pacer, SystemClock};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// What to do when the robot rejects a command or cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuationErrorPolicy {
    #[default]
    Abort,
    Continue,
}

impl FromStr for ActuationErrorPolicy {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "continue" => Ok(Self::Continue),
            other => Err(PilotError::Config(format!(
                "unknown actuation error policy {other:?} (expected \"abort\" or \"continue\")"
            ))),
        }
    }
}

impl fmt::Display for ActuationErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

/// Configuration bundle for [`ActuationLoop`].
#[derive(Debug, Clone)]
pub struct ActuationLoopConfig {
    /// Tick rate in Hz.
    pub freq_hz: u32,
    /// Observation layout sent to the server.
    pub schema: ObservationSchema,
    /// Task instruction attached to every observation.
    pub prompt: String,
    pub normalizer: StateNormalizer,
    pub on_actuation_error: ActuationErrorPolicy,
    /// Issue one throw-away inference before RUNNING so the first real tick
    /// does not pay the model's cold-start cost.
    pub warmup: bool,
    /// Stop after this many RUNNING ticks.  `None` runs until shutdown is
    /// requested.
    pub max_ticks: Option<u64>,
}

impl Default for ActuationLoopConfig {
    fn default() -> Self {
        Self {
            freq_hz: 30,
            schema: ObservationSchema::So100,
            prompt: String::new(),
            normalizer: StateNormalizer::identity(),
            on_actuation_error: ActuationErrorPolicy::Abort,
            warmup: true,
            max_ticks: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resource guard
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the camera source and the optional robot, closing each exactly once.
///
/// [`Rig::close`] is idempotent and also runs on drop, so every exit path
/// releases the hardware.
pub struct Rig {
    frames: Box<dyn FrameSource>,
    robot: Option<Box<dyn RobotIo>>,
    closed: bool,
}

impl Rig {
    pub fn new(frames: Box<dyn FrameSource>, robot: Option<Box<dyn RobotIo>>) -> Self {
        Self {
            frames,
            robot,
            closed: false,
        }
    }

    pub fn has_robot(&self) -> bool {
        self.robot.is_some()
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.frames.close();
        if let Some(robot) = self.robot.as_mut() {
            info!(robot = robot.id(), "closing robot connection");
            robot.close();
        }
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.close();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Init,
    Warmup,
    Running,
    Shutdown,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::Init => "INIT",
            LoopPhase::Warmup => "WARMUP",
            LoopPhase::Running => "RUNNING",
            LoopPhase::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Counters accumulated over one [`ActuationLoop::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// RUNNING ticks started.
    pub ticks: u64,
    /// Ticks that fetched a new chunk.
    pub refreshes: u64,
    /// Ticks that produced no action.
    pub skipped: u64,
    /// Ticks that overran their slot.
    pub overruns: u64,
    /// Actions sent to the robot, or reported when none is attached.
    pub dispatched: u64,
}

enum TickOutcome {
    Dispatched,
    Skipped,
}

// ─────────────────────────────────────────────────────────────────────────────
// ActuationLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct ActuationLoop<P: PolicyClient, C: Clock = SystemClock> {
    config: ActuationLoopConfig,
    broker: ActionChunkBroker<P>,
    rig: Rig,
    clock: C,
    shutdown: Arc<AtomicBool>,
    phase: LoopPhase,
}

impl<P: PolicyClient> ActuationLoop<P, SystemClock> {
    pub fn new(config: ActuationLoopConfig, broker: ActionChunkBroker<P>, rig: Rig) -> Self {
        Self::with_clock(config, broker, rig, SystemClock::new())
    }
}

impl<P: PolicyClient, C: Clock> ActuationLoop<P, C> {
    pub fn with_clock(
        config: ActuationLoopConfig,
        broker: ActionChunkBroker<P>,
        rig: Rig,
        clock: C,
    ) -> Self {
        Self {
            config,
            broker,
            rig,
            clock,
            shutdown: Arc::new(AtomicBool::new(false)),
            phase: LoopPhase::Init,
        }
    }

    /// Flag that stops the loop after the current tick when set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn broker(&self) -> &ActionChunkBroker<P> {
        &self.broker
    }

    /// Run until shutdown is requested, `max_ticks` is reached, or a fatal
    /// error occurs.  Resources are released before returning either way.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::SensorCapture`] on any capture failure, and
    /// [`PilotError::Actuation`] when the policy is
    /// [`ActuationErrorPolicy::Abort`].
    pub fn run(&mut self) -> Result<LoopSummary, PilotError> {
        let mut summary = LoopSummary::default();
        let result = self.run_phases(&mut summary);

        self.enter(LoopPhase::Shutdown);
        self.broker.close();
        self.rig.close();
        info!(
            ticks = summary.ticks,
            refreshes = summary.refreshes,
            skipped = summary.skipped,
            overruns = summary.overruns,
            dispatched = summary.dispatched,
            "actuation loop stopped"
        );
        if let Err(e) = &result {
            error!(error = %e, "actuation loop aborted");
        }
        result.map(|()| summary)
    }

    fn run_phases(&mut self, summary: &mut LoopSummary) -> Result<(), PilotError> {
        if self.config.warmup {
            self.enter(LoopPhase::Warmup);
            self.warmup()?;
        }

        self.enter(LoopPhase::Running);
        let mut pacer = Pacer::new(self.config.freq_hz, self.clock.now())?;
        let mut last_tick = self.clock.now();

        while !self.shutdown.load(Ordering::SeqCst)
            && self.config.max_ticks.is_none_or(|max| summary.ticks < max)
        {
            summary.ticks += 1;
            let _span = info_span!("tick", n = summary.ticks).entered();

            match self.tick(summary)? {
                TickOutcome::Dispatched => summary.dispatched += 1,
                TickOutcome::Skipped => summary.skipped += 1,
            }

            if let Pace::Overrun { behind } = pacer.wait(&mut self.clock) {
                summary.overruns += 1;
                debug!(behind_ms = behind.as_secs_f64() * 1e3, "tick overran its slot");
            }
            let now = self.clock.now();
            debug!(dt_ms = (now - last_tick).as_secs_f64() * 1e3, "tick complete");
            last_tick = now;
        }
        Ok(())
    }

    /// Send one zero-state observation and discard the result.
    ///
    /// The zero reading goes through the normalizer like any other, so
    /// configured limits apply to the placeholder state too.
    fn warmup(&mut self) -> Result<(), PilotError> {
        let frames = self.capture_frames()?;
        let state = self
            .config
            .normalizer
            .normalize(&[0.0; JOINT_COUNT])
            .unwrap_or_else(|e| {
                warn!(error = %e, "warmup state normalization failed, using zeros");
                JointState::ZERO
            });
        let observation =
            ObservationBundle::assemble(self.config.schema, state, frames, &self.config.prompt)?;
        match self.broker.infer(&observation) {
            Ok(_) => info!("warmup inference complete"),
            Err(e) => warn!(error = %e, "warmup inference failed"),
        }
        self.broker.reset();
        Ok(())
    }

    fn tick(&mut self, summary: &mut LoopSummary) -> Result<TickOutcome, PilotError> {
        let frames = self.capture_frames()?;

        let raw = match self.rig.robot.as_mut() {
            Some(robot) => match robot.read_state() {
                Ok(raw) => raw,
                Err(e) => return self.actuation_failed(e),
            },
            None => vec![0.0; JOINT_COUNT],
        };

        let state = match self.config.normalizer.normalize(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(raw = ?raw, error = %e, "state normalization failed, using zeros");
                JointState::ZERO
            }
        };

        let observation =
            ObservationBundle::assemble(self.config.schema, state, frames, &self.config.prompt)?;

        let served = match self.broker.infer(&observation) {
            Ok(served) => served,
            Err(e @ PilotError::Inference(_)) => {
                error!(error = %e, "inference failed, skipping tick");
                return Ok(TickOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };
        if let Some(refresh) = &served.refresh {
            summary.refreshes += 1;
            info!(
                rows = refresh.chunk.len(),
                policy_timing = ?refresh.policy_timing,
                server_timing = ?refresh.server_timing,
                "new action chunk"
            );
        }

        self.dispatch(served)
    }

    fn dispatch(&mut self, served: ServedAction) -> Result<TickOutcome, PilotError> {
        let Some(robot) = self.rig.robot.as_mut() else {
            info!(index = served.index, action = ?served.action, "action");
            return Ok(TickOutcome::Dispatched);
        };
        match robot.send_action(&served.action) {
            Ok(()) => {
                debug!(index = served.index, "action sent");
                Ok(TickOutcome::Dispatched)
            }
            Err(e) => self.actuation_failed(e),
        }
    }

    fn actuation_failed(&self, err: PilotError) -> Result<TickOutcome, PilotError> {
        match self.config.on_actuation_error {
            ActuationErrorPolicy::Abort => Err(err),
            ActuationErrorPolicy::Continue => {
                error!(error = %err, "actuation failed, continuing");
                Ok(TickOutcome::Skipped)
            }
        }
    }

    fn capture_frames(&mut self) -> Result<CapturedFrames, PilotError> {
        let mut frames = CapturedFrames::new();
        for &camera in self.config.schema.cameras() {
            frames.insert(camera, self.rig.frames.capture(camera)?);
        }
        Ok(frames)
    }

    fn enter(&mut self, phase: LoopPhase) {
        info!(from = %self.phase, to = %phase, "loop phase");
        self.phase = phase;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
