use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nalgebra::Vector2;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use seeker_control::{CancelToken, ControlLoop, LoopConfig, LoopReport, LoopSetup, Outcome, Pipeline};
use seeker_fc::{check_channels, check_output, LogTransport, OutputConfig, OutputKind, PigpioDaemon, Transport};
use seeker_guide::pn::pure_pn_command;
use seeker_guide::GuidanceConfig;
use seeker_proto::command::radians_to_sbus;
use seeker_proto::telemetry::TickEvent;
use seeker_proto::{AxisMap, SbusFrame, WireFrame};
use seeker_vision::{Detector, FixedTarget, ReplayDetector, SimConfig, SimulatedDetector, VisionConfig};

#[derive(Debug, Parser)]
#[command(name = "seeker", version, about = "Seeker - camera-guided pan/tilt guidance and actuation")]
struct Cli {
    #[arg(long, default_value = "config/seeker.toml")]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config without touching hardware.
    Doctor,
    /// Track the configured target on the configured output until arrival or Ctrl-C.
    Run,
    /// Run the loop against a log-only output.
    Simulate {
        /// Write one JSON tick event per line.
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Stop after this many ticks.
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Print the SBUS frame for a roll/pitch pair in radians.
    Encode {
        #[arg(long, allow_hyphen_values = true)]
        roll: f64,
        #[arg(long, allow_hyphen_values = true)]
        pitch: f64,
    },
    Servo { #[command(subcommand)] cmd: ServoCmd },
    /// Pure proportional-navigation command for one geometry.
    Pn {
        /// Line of sight, `x,y`.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        los: Vec<f64>,
        /// Target velocity, `x,y`.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        vt: Vec<f64>,
        /// Interceptor velocity, `x,y`.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        vi: Vec<f64>,
        /// Navigation ratio.
        #[arg(long, default_value_t = 3.0)]
        n: f64,
    },
}

#[derive(Debug, Subcommand)]
enum ServoCmd {
    /// Drive a servo through the pin daemon between its extremes.
    Sweep {
        #[arg(long, default_value_t = 18)]
        gpio: u8,
        #[arg(long, default_value_t = 5)]
        cycles: u32,
        #[arg(long, default_value_t = 1000)]
        dwell_ms: u64,
    },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    guidance: GuidanceConfig,
    target: TargetCfg,
    #[serde(default)]
    vision: VisionConfig,
    #[serde(default, rename = "loop")]
    control: LoopConfig,
    #[serde(rename = "axis")]
    axes: Vec<AxisMap>,
    #[serde(default)]
    output: OutputConfig,
}

#[derive(Debug, serde::Deserialize)]
struct TargetCfg {
    /// "fixed", "replay" or "sim"
    source: String,
    /// Fixed target; a third coordinate sets the depth for spatial guidance.
    position: Option<Vec<f64>>,
    replay: Option<ReplayCfg>,
    sim: Option<SimConfig>,
}

#[derive(Debug, serde::Deserialize)]
struct ReplayCfg {
    path: PathBuf,
    #[serde(default)]
    looped: bool,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    let mut cfg: Config = toml::from_str(s).context("parse config toml")?;
    if let Some(p) = &cfg.target.position {
        if let Some(z) = p.get(2) {
            cfg.control.target_z = *z;
        }
    }
    Ok(cfg)
}

/// The `[output]` table alone, for commands that need no loop config.
#[derive(Debug, Default, serde::Deserialize)]
struct OutputOnly {
    #[serde(default)]
    output: OutputConfig,
}

fn load_output(path: &str) -> Result<OutputConfig> {
    if !std::path::Path::new(path).is_file() {
        return Ok(OutputConfig::default());
    }
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    let out = toml::from_str::<OutputOnly>(&s).context("parse config toml")?.output;
    check_output(&out)?;
    Ok(out)
}

fn axis_channels(cfg: &Config) -> Vec<u8> {
    cfg.axes.iter().map(|a| a.channel).collect()
}

fn check_startup(cfg: &Config) -> Result<Pipeline> {
    check_output(&cfg.output)?;
    check_channels(&cfg.output, &axis_channels(cfg))?;
    Ok(loop_setup(cfg).validate()?)
}

fn loop_setup(cfg: &Config) -> LoopSetup {
    LoopSetup {
        guidance: cfg.guidance.clone(),
        axes: cfg.axes.clone(),
        format: cfg.output.frame_format(),
        vision: cfg.vision.clone(),
        control: cfg.control.clone(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Encode { roll, pitch } => encode(&load_output(&cli.config)?, roll, pitch),
        Command::Pn { los, vt, vi, n } => pn(&los, &vt, &vi, n),
        cmd => {
            let cfg = load_config(&cli.config)?;
            match cmd {
                Command::Doctor => doctor(&cfg),
                Command::Run => run(&cfg).await,
                Command::Simulate { trace, ticks } => simulate(cfg, trace, ticks).await,
                Command::Servo { cmd: ServoCmd::Sweep { gpio, cycles, dwell_ms } } => {
                    servo_sweep(&cfg.output, gpio, cycles, Duration::from_millis(dwell_ms)).await
                }
                Command::Encode { .. } | Command::Pn { .. } => Ok(()),
            }
        }
    }
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    check_startup(cfg)?;
    check_target(&cfg.target, &cfg.guidance)?;
    info!(
        "doctor: output {:?} ({:?}), {} axes, target {}",
        cfg.output.kind,
        cfg.output.frame_format(),
        cfg.axes.len(),
        cfg.target.source
    );
    info!("doctor: OK");
    Ok(())
}

fn check_target(t: &TargetCfg, g: &GuidanceConfig) -> Result<()> {
    match t.source.as_str() {
        "fixed" => {
            let p = t.position.as_ref().context("target.position missing (source=fixed)")?;
            seeker_guide::position_from_slice(g.axes, p).context("target.position")?;
        }
        "replay" => {
            let r = t.replay.as_ref().context("[target.replay] missing (source=replay)")?;
            anyhow::ensure!(r.path.is_file(), "target.replay.path {} not found", r.path.display());
        }
        "sim" => {
            anyhow::ensure!(t.sim.is_some(), "[target.sim] missing (source=sim)");
        }
        other => anyhow::bail!("unknown target.source: {}", other),
    }
    Ok(())
}

fn open_detector(cfg: &Config) -> Result<Box<dyn Detector>> {
    check_target(&cfg.target, &cfg.guidance)?;
    let det: Box<dyn Detector> = match cfg.target.source.as_str() {
        "fixed" => {
            let p = cfg.target.position.as_deref().context("target.position missing")?;
            let p = seeker_guide::position_from_slice(cfg.guidance.axes, p)?;
            Box::new(FixedTarget::new(Vector2::new(p.x, p.y)))
        }
        "replay" => {
            let r = cfg.target.replay.as_ref().context("[target.replay] missing")?;
            Box::new(ReplayDetector::open(&r.path, r.looped, cfg.vision.frame_w, cfg.vision.frame_h)?)
        }
        "sim" => {
            let sim = cfg.target.sim.clone().context("[target.sim] missing")?;
            Box::new(SimulatedDetector::new(sim)?)
        }
        other => anyhow::bail!("unknown target.source: {}", other),
    };
    Ok(det)
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");
    let pipeline = check_startup(cfg)?;
    let detector = open_detector(cfg)?;

    let channels = axis_channels(cfg);
    let transport = cfg.output.open(&channels).await.context("open output")?;

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrl_c();
    let mut lp = ControlLoop::new(pipeline, detector, transport, cancel);
    let report = lp.run().await?;
    summary("run", &report);
    Ok(())
}

async fn simulate(mut cfg: Config, trace: Option<PathBuf>, ticks: Option<u64>) -> Result<()> {
    if ticks.is_some() {
        cfg.control.max_ticks = ticks;
    }
    if cfg.output.kind != OutputKind::Log {
        info!("simulate: {:?} output replaced by log", cfg.output.kind);
    }
    let pipeline = loop_setup(&cfg).validate()?;
    let detector = open_detector(&cfg)?;
    let transport: Box<dyn Transport> = Box::new(LogTransport::new());

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrl_c();
    let mut lp = ControlLoop::new(pipeline, detector, transport, cancel);

    let writer = match trace {
        Some(path) => {
            let (tx, rx) = mpsc::channel(1024);
            lp = lp.with_telemetry(tx);
            Some(tokio::spawn(write_trace(path, rx)))
        }
        None => None,
    };

    let res = lp.run().await;
    // closes the telemetry channel so the writer drains and stops
    drop(lp);
    if let Some(h) = writer {
        match h.await {
            Ok(Ok(n)) => info!("simulate: wrote {} trace events", n),
            Ok(Err(e)) => warn!("simulate: trace: {:#}", e),
            Err(e) => warn!("simulate: trace writer: {}", e),
        }
    }
    summary("simulate", &res?);
    Ok(())
}

async fn write_trace(path: PathBuf, mut rx: mpsc::Receiver<TickEvent>) -> Result<u64> {
    let file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("create trace {}", path.display()))?;
    let mut out = tokio::io::BufWriter::new(file);
    let mut n = 0;
    while let Some(ev) = rx.recv().await {
        let mut line = serde_json::to_vec(&ev)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        n += 1;
    }
    out.flush().await?;
    Ok(n)
}

fn summary(what: &str, r: &LoopReport) {
    let how = match r.outcome {
        Outcome::Arrived => "arrived",
        Outcome::Cancelled => "cancelled",
        Outcome::TickLimit => "tick limit",
    };
    println!(
        "{}: {} after {} ticks, {} steps, {} held, position {:?}",
        what,
        how,
        r.ticks,
        r.steps,
        r.held_ticks,
        r.final_position.as_slice()
    );
}

fn encode(out: &OutputConfig, roll: f64, pitch: f64) -> Result<()> {
    let (lo, hi) = (out.sbus.min, out.sbus.max);
    let frame = SbusFrame::new(radians_to_sbus(roll, lo, hi), radians_to_sbus(pitch, lo, hi));
    let (r, p) = frame.channels();
    info!("encode: roll={} -> {}, pitch={} -> {}", roll, r, pitch, p);
    println!("{}", WireFrame::Sbus(frame));
    Ok(())
}

fn pn(los: &[f64], vt: &[f64], vi: &[f64], n: f64) -> Result<()> {
    let v2 = |name: &str, v: &[f64]| -> Result<Vector2<f64>> {
        anyhow::ensure!(v.len() == 2, "--{} needs two values x,y", name);
        Ok(Vector2::new(v[0], v[1]))
    };
    let a = pure_pn_command(v2("los", los)?, v2("vt", vt)?, v2("vi", vi)?, n);
    println!("a = ({}, {})", a.x, a.y);
    Ok(())
}

async fn servo_sweep(out: &OutputConfig, gpio: u8, cycles: u32, dwell: Duration) -> Result<()> {
    let mut d = PigpioDaemon::connect(&out.pigpio.host, out.pigpio.port, &[gpio])
        .await
        .context("connect pigpiod")?;
    info!("servo: sweeping gpio{} for {} cycles", gpio, cycles);

    let cancel = CancelToken::new();
    cancel.cancel_on_ctrl_c();
    let res = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        r = d.sweep(gpio, cycles, dwell) => r,
    };
    d.release().await?;
    res?;
    info!("servo: done");
    Ok(())
}
