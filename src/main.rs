// src/main.rs
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::mpsc::{RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use myohand::config::Config;
use myohand::drivers::{LoggingPwmBus, SerialSource, ServoDriver, SimulatedSource};
use myohand::engine;
use myohand::types::{ControlMode, EngineCommand, EngineMessage};

/// EMG gesture control for a servo-driven hand.
///
/// While running, stdin accepts `reset`, `mode gesture`, `mode macro` and `stop`.
#[derive(Parser, Debug)]
#[command(name = "myohand", version, about, long_about = None)]
struct Cli {
    /// JSON configuration; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port streaming `>CH1:..` or `DATA,..` lines (e.g. /dev/ttyACM0 or COM3)
    #[arg(short, long, conflicts_with = "replay")]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Replays a captured sample log instead of reading live input
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Overrides the configured control mode: gesture or macro
    #[arg(short, long)]
    mode: Option<ControlMode>,

    /// Stops after this many seconds
    #[arg(long)]
    seconds: Option<u64>,
}

/// Turns stdin lines into engine commands until stdin closes or `stop` is read.
fn spawn_console(commands: Sender<EngineCommand>) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let cmd = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
                    [] => continue,
                    ["reset"] => EngineCommand::Reset,
                    ["stop"] | ["quit"] => EngineCommand::Stop,
                    ["mode", mode] => match mode.parse::<ControlMode>() {
                        Ok(mode) => EngineCommand::SetMode(mode),
                        Err(err) => {
                            warn!("{err}");
                            continue;
                        }
                    },
                    _ => {
                        warn!("unknown command '{}'", line.trim());
                        continue;
                    }
                };
                let stop = matches!(cmd, EngineCommand::Stop);
                if commands.send(cmd).is_err() || stop {
                    break;
                }
            }
        })
        .context("spawning console thread")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    config.validate().context("invalid configuration")?;

    let driver = ServoDriver::new(LoggingPwmBus::default(), config.actuation.pwm_channels());
    let sampling = &config.sampling;
    let engine = if let Some(port) = &cli.serial {
        let source = SerialSource::open(port, cli.baud, sampling.channels)
            .with_context(|| format!("opening {port}"))?;
        engine::spawn(&config, source, driver)?
    } else if let Some(path) = &cli.replay {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        info!("replaying {}", path.display());
        let source = SerialSource::from_reader(BufReader::new(file), sampling.channels);
        engine::spawn(&config, source, driver)?
    } else {
        info!("no input given, running the simulator");
        let source = SimulatedSource::new(
            config.simulation.clone(),
            sampling.rate_hz,
            sampling.channels,
            sampling.adc_bits,
        );
        engine::spawn(&config, source, driver)?
    };
    spawn_console(engine.commands.clone())?;

    let deadline = cli.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut stop_sent = false;
    loop {
        if !stop_sent && deadline.is_some_and(|d| Instant::now() >= d) {
            engine.stop();
            stop_sent = true;
        }
        match engine.messages.recv_timeout(Duration::from_millis(100)) {
            Ok(EngineMessage::Log(line)) => info!("{line}"),
            Ok(EngineMessage::StateChange(event)) => println!("{event}"),
            Ok(EngineMessage::Telemetry(frame)) => println!("{frame}"),
            Ok(EngineMessage::ActuatorFault { at_ms, failures }) => {
                println!("FAULT,{at_ms},{failures}")
            }
            Ok(EngineMessage::Stopped) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    engine.join();
    Ok(())
}
