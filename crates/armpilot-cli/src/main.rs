//! `armpilot` – SO-100 arm client for a remote action-prediction server.
//!
//! Subcommands:
//!
//! - `run` – connect to the policy server and drive the arm at a fixed rate.
//! - `probe` – report which observation layouts the server accepts.
//! - `config init|show` – write or print `~/.armpilot/config.toml`.
//!
//! Ctrl-C stops the control loop after the current tick; cameras, robot and
//! server session are released before the process exits.

mod config;
mod probe;

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use armpilot_hal::{
    DirectArmIo, FrameSource, HttpRobotIo, MOTOR_NAMES, RobotIo, RobotIoMode, Servo, SimRig,
    SimServo,
};
use armpilot_policy::{ObservationSchema, PolicyClient, WebsocketPolicyClient};
use armpilot_runtime::{
    ActionChunkBroker, ActuationErrorPolicy, ActuationLoop, Rig, init_tracing,
};

use crate::config::{Config, Settings};

// ─────────────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of `~/.armpilot/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop.
    Run(RunArgs),
    /// Test every observation schema against the server.
    Probe(ServerArgs),
    /// Manage the config file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default config.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config after env overrides.
    Show,
}

#[derive(Args, Debug, Default)]
struct ServerArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Give up connecting after this many seconds.
    #[arg(long)]
    connect_timeout_secs: Option<u64>,
    #[arg(long)]
    action_horizon: Option<usize>,
    #[arg(long)]
    action_dim: Option<usize>,
    #[arg(long)]
    prompt: Option<String>,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    #[command(flatten)]
    server: ServerArgs,
    #[arg(long)]
    freq_hz: Option<u32>,
    #[arg(long)]
    schema: Option<ObservationSchema>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    io_mode: Option<RobotIoMode>,
    /// Allow simulated camera frames with a physical arm.
    #[arg(long)]
    sim_cameras: bool,
    #[arg(long)]
    http_url: Option<String>,
    #[arg(long)]
    robot_port: Option<String>,
    #[arg(long)]
    robot_id: Option<String>,
    /// Servos report and accept degrees.
    #[arg(long)]
    use_degrees: bool,
    /// `rad` or `deg`.
    #[arg(long)]
    state_units: Option<String>,
    /// e.g. `0,1,2,3,4,5`.
    #[arg(long)]
    state_order: Option<String>,
    /// e.g. `(-2.5,2.5);(-2.5,2.5);(-2.5,2.5);(-2.5,2.5);(-3.1,3.1)`.
    #[arg(long)]
    state_joint_limits: Option<String>,
    /// e.g. `(0,100)`.
    #[arg(long)]
    state_gripper_limits: Option<String>,
    #[arg(long)]
    on_actuation_error: Option<ActuationErrorPolicy>,
    /// Skip the warmup inference.
    #[arg(long)]
    no_warmup: bool,
    /// Stop after this many ticks.
    #[arg(long)]
    max_ticks: Option<u64>,
}

impl ServerArgs {
    fn apply(&self, cfg: &mut Config) {
        if let Some(v) = &self.host {
            cfg.host = v.clone();
        }
        if let Some(v) = self.port {
            cfg.port = v;
        }
        if let Some(v) = self.connect_timeout_secs {
            cfg.connect_timeout_secs = Some(v);
        }
        if let Some(v) = self.action_horizon {
            cfg.action_horizon = v;
        }
        if let Some(v) = self.action_dim {
            cfg.action_dim = v;
        }
        if let Some(v) = &self.prompt {
            cfg.prompt = v.clone();
        }
    }
}

impl RunArgs {
    fn apply(&self, cfg: &mut Config) {
        self.server.apply(cfg);
        if let Some(v) = self.freq_hz {
            cfg.freq_hz = v;
        }
        if let Some(v) = self.schema {
            cfg.schema = v;
        }
        if let Some(v) = self.height {
            cfg.height = v;
        }
        if let Some(v) = self.width {
            cfg.width = v;
        }
        if let Some(v) = self.io_mode {
            cfg.io_mode = v;
        }
        if self.sim_cameras {
            cfg.sim_cameras = true;
        }
        if let Some(v) = &self.http_url {
            cfg.http_url = v.clone();
        }
        if let Some(v) = &self.robot_port {
            cfg.robot_port = v.clone();
        }
        if let Some(v) = &self.robot_id {
            cfg.robot_id = v.clone();
        }
        if self.use_degrees {
            cfg.use_degrees = true;
        }
        if let Some(v) = &self.state_units {
            cfg.state_units = v.clone();
        }
        if let Some(v) = &self.state_order {
            cfg.state_order = v.clone();
        }
        if let Some(v) = &self.state_joint_limits {
            cfg.state_joint_limits = Some(v.clone());
        }
        if let Some(v) = &self.state_gripper_limits {
            cfg.state_gripper_limits = Some(v.clone());
        }
        if let Some(v) = self.on_actuation_error {
            cfg.on_actuation_error = v;
        }
        if self.no_warmup {
            cfg.warmup = false;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = init_tracing("armpilot");

    let path = cli.config.clone().unwrap_or_else(config::config_path);
    if let Command::Config(ConfigCommand::Init { force }) = cli.command {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        config::save_to(&Config::default(), &path)?;
        println!(
            "  {} Config saved to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        );
        return Ok(());
    }

    let loaded = config::load_from(&path)?;
    if loaded.is_some() {
        info!(path = %path.display(), "config loaded");
    }
    let mut cfg = loaded.unwrap_or_default();
    config::apply_env_overrides(&mut cfg);

    match cli.command {
        Command::Run(args) => {
            args.apply(&mut cfg);
            run(&cfg, args.max_ticks)
        }
        Command::Probe(args) => {
            args.apply(&mut cfg);
            probe(&cfg)
        }
        Command::Config(ConfigCommand::Init { .. }) => Ok(()),
        Command::Config(ConfigCommand::Show) => {
            let rendered = toml::to_string_pretty(&cfg).context("failed to render config")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn run(cfg: &Config, max_ticks: Option<u64>) -> Result<()> {
    let mut settings = cfg.resolve().context("invalid configuration")?;
    settings.loop_config.max_ticks = max_ticks;

    // Connect before opening hardware; the retry loop can block indefinitely.
    let client = WebsocketPolicyClient::connect(&settings.server_url, settings.connect_max_wait)?;
    let broker = ActionChunkBroker::new(client, settings.action_horizon, settings.action_dim)?;

    let rig = Rig::new(open_frames(cfg, &settings), open_robot(&settings)?);
    let mut control = ActuationLoop::new(settings.loop_config.clone(), broker, rig);

    let shutdown = control.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after the current tick …".yellow().bold());
        shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop with SIGKILL only");
    }

    info!(
        server = %settings.server_url,
        freq_hz = settings.loop_config.freq_hz,
        horizon = settings.action_horizon,
        schema = %settings.loop_config.schema,
        io_mode = %settings.io_mode,
        "starting control loop"
    );
    let summary = control.run()?;
    println!(
        "  {} {} ticks, {} chunks, {} skipped, {} overruns",
        "✓".green().bold(),
        summary.ticks,
        summary.refreshes,
        summary.skipped,
        summary.overruns
    );
    Ok(())
}

fn probe(cfg: &Config) -> Result<()> {
    // Probing never touches the arm.
    let settings = Config {
        io_mode: RobotIoMode::None,
        ..cfg.clone()
    }
    .resolve()
    .context("invalid configuration")?;
    let mut client =
        WebsocketPolicyClient::connect(&settings.server_url, settings.connect_max_wait)?;
    println!("  Connected to {}", settings.server_url.bold());

    let mut frames = SimRig::new(settings.width, settings.height).build();
    let outcomes = probe::probe_schemas(
        &mut client,
        &mut frames,
        &cfg.prompt,
        settings.action_horizon,
        settings.action_dim,
    );
    frames.close();
    client.close();
    probe::print_report(&outcomes);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Resource construction
// ─────────────────────────────────────────────────────────────────────────────

fn open_frames(cfg: &Config, settings: &Settings) -> Box<dyn FrameSource> {
    if settings.io_mode == RobotIoMode::Http {
        warn!("physical arm attached with simulated cameras (sim_cameras = true)");
    }
    info!(
        top = cfg.cameras.top,
        wrist = cfg.cameras.wrist,
        side = cfg.cameras.side,
        width = settings.width,
        height = settings.height,
        "opening simulated cameras"
    );
    Box::new(SimRig::new(settings.width, settings.height).build())
}

fn open_robot(settings: &Settings) -> Result<Option<Box<dyn RobotIo>>> {
    let robot: Option<Box<dyn RobotIo>> = match settings.io_mode {
        RobotIoMode::None => None,
        RobotIoMode::Http => Some(Box::new(HttpRobotIo::new(&settings.http_url)?)),
        RobotIoMode::Direct => {
            warn!(
                port = %settings.robot_port,
                "io_mode \"direct\" drives simulated servos; no serial bus is opened"
            );
            let servos: Vec<Box<dyn Servo>> = MOTOR_NAMES
                .iter()
                .map(|name| SimServo::new(*name) as Box<dyn Servo>)
                .collect();
            Some(Box::new(DirectArmIo::new(
                settings.robot_id.clone(),
                servos,
                settings.use_degrees,
            )?))
        }
    };
    Ok(robot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "armpilot",
            "run",
            "--port",
            "9000",
            "--schema",
            "libero",
            "--io-mode",
            "http",
            "--on-actuation-error",
            "continue",
            "--no-warmup",
            "--max-ticks",
            "10",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut cfg = Config::default();
        args.apply(&mut cfg);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.schema, ObservationSchema::Libero);
        assert_eq!(cfg.io_mode, RobotIoMode::Http);
        assert_eq!(cfg.on_actuation_error, ActuationErrorPolicy::Continue);
        assert!(!cfg.warmup);
        assert_eq!(args.max_ticks, Some(10));
    }

    #[test]
    fn flags_override_file_values_only_when_given() {
        let mut cfg = Config {
            freq_hz: 15,
            prompt: "fold the towel".to_string(),
            ..Config::default()
        };
        RunArgs::default().apply(&mut cfg);
        assert_eq!(cfg.freq_hz, 15);
        assert_eq!(cfg.prompt, "fold the towel");
    }

    #[test]
    fn http_run_needs_sim_cameras_flag() {
        let parse = |extra: &[&str]| {
            let mut argv = vec!["armpilot", "run", "--io-mode", "http"];
            argv.extend_from_slice(extra);
            let Command::Run(args) = Cli::parse_from(argv).command else {
                panic!("expected run");
            };
            let mut cfg = Config::default();
            args.apply(&mut cfg);
            cfg
        };
        assert!(parse(&[]).resolve().is_err());
        assert!(parse(&["--sim-cameras"]).resolve().is_ok());
    }

    #[test]
    fn cli_rejects_unknown_schema() {
        assert!(Cli::try_parse_from(["armpilot", "run", "--schema", "aloha"]).is_err());
    }

    #[test]
    fn direct_mode_builds_all_servos() {
        let settings = Config {
            io_mode: RobotIoMode::Direct,
            use_degrees: true,
            ..Config::default()
        }
        .resolve()
        .unwrap();
        let mut robot = open_robot(&settings).unwrap().expect("robot");
        robot.send_action(&[0.0, 0.5, 0.0, 0.0, 0.0, 40.0]).unwrap();
        let state = robot.read_state().unwrap();
        assert!((state[1] - 0.5).abs() < 1e-5);
        assert!((state[5] - 40.0).abs() < 1e-5);
    }

    #[test]
    fn none_mode_has_no_robot() {
        let settings = Config::default().resolve().unwrap();
        assert!(open_robot(&settings).unwrap().is_none());
    }
}
