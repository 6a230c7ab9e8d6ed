// src/engine.rs
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use log::{error, info, trace, warn};

use crate::config::Config;
use crate::drivers::{ActuatorDriver, Controller, SampleHandoff, SampleSource};
use crate::types::{EngineCommand, EngineMessage, RawSample};

/// How long the control loop waits for a block before polling commands again.
const IDLE_WAIT: Duration = Duration::from_millis(20);

/// Running producer and control threads plus the channels to talk to them.
pub struct Engine {
    pub commands: Sender<EngineCommand>,
    pub messages: Receiver<EngineMessage>,
    handoff: Arc<SampleHandoff>,
    threads: Vec<JoinHandle<()>>,
}
impl Engine {
    pub fn stop(&self) {
        self.commands.send(EngineCommand::Stop).ok();
    }
    pub fn join(mut self) {
        self.handoff.close();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("engine thread panicked");
            }
        }
    }
}

/// Builds the controller up front so configuration errors surface before any thread starts.
pub fn spawn<S, D>(config: &Config, source: S, driver: D) -> anyhow::Result<Engine>
where
    S: SampleSource + Send + 'static,
    D: ActuatorDriver + Send + 'static,
{
    let controller = Controller::new(config).context("building the control pipeline")?;
    let handoff = Arc::new(SampleHandoff::new());
    let (tx, messages) = mpsc::channel();
    let (commands, rx_cmd) = mpsc::channel();

    let producer = {
        let handoff = Arc::clone(&handoff);
        let tx = tx.clone();
        thread::Builder::new()
            .name("sampler".into())
            .spawn(move || run_producer(source, &handoff, &tx))
            .context("spawning sampler thread")?
    };
    let control = {
        let handoff = Arc::clone(&handoff);
        thread::Builder::new()
            .name("control".into())
            .spawn(move || run_control(controller, driver, &handoff, &tx, &rx_cmd))
            .context("spawning control thread")?
    };
    Ok(Engine {
        commands,
        messages,
        handoff,
        threads: vec![producer, control],
    })
}

fn run_producer<S: SampleSource>(mut source: S, handoff: &SampleHandoff, tx: &Sender<EngineMessage>) {
    while !handoff.is_closed() {
        match source.next_block() {
            Ok(Some(block)) if block.is_empty() => {}
            Ok(Some(block)) => {
                if handoff.publish(&block) {
                    warn!("control loop fell behind; {} blocks overwritten", handoff.overruns());
                }
            }
            Ok(None) => {
                info!("sample source exhausted");
                tx.send(EngineMessage::Log("source exhausted".into())).ok();
                break;
            }
            Err(err) => {
                error!("sample source failed: {err}");
                tx.send(EngineMessage::Log(format!("source failed: {err}"))).ok();
                break;
            }
        }
    }
    handoff.close();
}

fn run_control<D: ActuatorDriver>(
    mut controller: Controller,
    mut driver: D,
    handoff: &SampleHandoff,
    tx: &Sender<EngineMessage>,
    rx_cmd: &Receiver<EngineCommand>,
) {
    tx.send(EngineMessage::Log(format!("control loop started ({:?} mode)", controller.mode())))
        .ok();
    let mut block: Vec<RawSample> = Vec::new();
    'control: loop {
        while let Ok(cmd) = rx_cmd.try_recv() {
            match cmd {
                EngineCommand::Stop => break 'control,
                EngineCommand::Reset => {
                    controller.reset();
                    tx.send(EngineMessage::Log("pipeline reset".into())).ok();
                }
                EngineCommand::SetMode(mode) => {
                    controller.set_mode(mode);
                    tx.send(EngineMessage::Log(format!("{mode:?} mode"))).ok();
                }
            }
        }
        if !handoff.wait_take_into(&mut block, IDLE_WAIT) {
            if handoff.is_closed() {
                break;
            }
            continue;
        }
        for sample in &block {
            match controller.step(sample.as_slice(), &mut driver) {
                Ok(Some(report)) => {
                    if let Some(raw) = report.raw {
                        trace!(
                            "{} ms: window {} ({:?}) -> {}",
                            report.at_ms,
                            raw.label,
                            raw.confidence,
                            report.decision
                        );
                    }
                    if report.failures > 0 {
                        warn!("{} actuator commands failed at {} ms", report.failures, report.at_ms);
                        tx.send(EngineMessage::ActuatorFault {
                            at_ms: report.at_ms,
                            failures: report.failures,
                        })
                        .ok();
                    }
                    if let Some(event) = report.event {
                        tx.send(EngineMessage::StateChange(event)).ok();
                    }
                    if let Some(telemetry) = report.telemetry {
                        tx.send(EngineMessage::Telemetry(telemetry)).ok();
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("dropping tick: {err}"),
            }
        }
    }
    handoff.close();
    info!("control loop stopped after {} samples", controller.samples());
    tx.send(EngineMessage::Stopped).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{ManualSource, PipelineError};
    use crate::types::ControlMode;

    struct NullDriver;
    impl ActuatorDriver for NullDriver {
        fn set_actuator_angle(&mut self, _index: usize, _angle: u8) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[test]
    fn engine_stops_when_source_ends() {
        let ticks: Vec<Vec<u16>> = (0..600).map(|_| vec![800, 800, 800]).collect();
        let source = ManualSource::from_ticks(&ticks, 600);
        let engine = spawn(&Config::default(), source, NullDriver).unwrap();
        let mut stopped = false;
        while let Ok(msg) = engine.messages.recv_timeout(Duration::from_secs(5)) {
            if matches!(msg, EngineMessage::Stopped) {
                stopped = true;
                break;
            }
        }
        assert!(stopped);
        engine.join();
    }

    #[test]
    fn stop_command_ends_a_live_source() {
        let config = Config::default();
        let source = crate::drivers::SimulatedSource::new(
            config.simulation.clone(),
            config.sampling.rate_hz,
            config.sampling.channels,
            config.sampling.adc_bits,
        );
        let engine = spawn(&config, source, NullDriver).unwrap();
        engine.stop();
        let stopped = engine
            .messages
            .iter()
            .any(|msg| matches!(msg, EngineMessage::Stopped));
        assert!(stopped);
        engine.join();
    }

    struct DeadDriver;
    impl ActuatorDriver for DeadDriver {
        fn set_actuator_angle(&mut self, index: usize, _angle: u8) -> Result<(), PipelineError> {
            Err(PipelineError::Actuator {
                index,
                reason: "bus unplugged".into(),
            })
        }
    }

    #[test]
    fn actuator_faults_reach_the_observer() {
        let ticks: Vec<Vec<u16>> = (0..345).map(|_| vec![800, 800, 800]).collect();
        let source = ManualSource::from_ticks(&ticks, 345);
        let engine = spawn(&Config::default(), source, DeadDriver).unwrap();
        let faults: Vec<_> = engine
            .messages
            .iter()
            .take_while(|msg| !matches!(msg, EngineMessage::Stopped))
            .filter_map(|msg| match msg {
                EngineMessage::ActuatorFault { at_ms, failures } => Some((at_ms, failures)),
                _ => None,
            })
            .collect();
        assert_eq!(faults, vec![(200, 5), (230, 5)]);
        engine.join();
    }

    #[test]
    fn commands_switch_mode_and_reset() {
        let (tx, rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let handoff = SampleHandoff::new();
        let block: Vec<RawSample> = (0..300).map(|_| RawSample::from_slice(&[800; 3])).collect();
        handoff.publish(&block);
        cmd_tx.send(EngineCommand::SetMode(ControlMode::Macro)).unwrap();
        cmd_tx.send(EngineCommand::Reset).unwrap();
        handoff.close();
        let controller = Controller::new(&Config::default()).unwrap();
        run_control(controller, NullDriver, &handoff, &tx, &cmd_rx);
        let messages: Vec<_> = rx.try_iter().collect();
        let logs: Vec<&str> = messages
            .iter()
            .filter_map(|msg| match msg {
                EngineMessage::Log(line) => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            logs,
            vec!["control loop started (Gesture mode)", "Macro mode", "pipeline reset"]
        );
        // the window filled after the reset, so one cycle ran
        let telemetry = messages
            .iter()
            .filter(|msg| matches!(msg, EngineMessage::Telemetry(_)))
            .count();
        assert_eq!(telemetry, 1);
        assert!(matches!(messages.last(), Some(EngineMessage::Stopped)));
    }

    #[test]
    fn invalid_config_fails_before_spawning() {
        let mut config = Config::default();
        config.sampling.window = 1;
        assert!(spawn(&config, ManualSource::new(Vec::new()), NullDriver).is_err());
    }
}
