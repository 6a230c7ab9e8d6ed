// src/types.rs
use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest channel count a deployment may configure.
pub const MAX_CHANNELS: usize = 4;

/// Hand shapes the classifier can emit. REST is index 0 so argmax ties favor it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GestureLabel {
    #[default]
    Rest = 0,
    Rock,
    Scissors,
    Paper,
    Middle,
    Three,
    Four,
    Good,
    Okay,
    FingerGun,
}
impl GestureLabel {
    pub const ALL: [GestureLabel; 10] = [
        GestureLabel::Rest,
        GestureLabel::Rock,
        GestureLabel::Scissors,
        GestureLabel::Paper,
        GestureLabel::Middle,
        GestureLabel::Three,
        GestureLabel::Four,
        GestureLabel::Good,
        GestureLabel::Okay,
        GestureLabel::FingerGun,
    ];
    pub fn index(self) -> usize {
        self as usize
    }
    pub fn name(self) -> &'static str {
        match self {
            GestureLabel::Rest => "REST",
            GestureLabel::Rock => "ROCK",
            GestureLabel::Scissors => "SCISSORS",
            GestureLabel::Paper => "PAPER",
            GestureLabel::Middle => "MIDDLE",
            GestureLabel::Three => "THREE",
            GestureLabel::Four => "FOUR",
            GestureLabel::Good => "GOOD",
            GestureLabel::Okay => "OKAY",
            GestureLabel::FingerGun => "FINGER_GUN",
        }
    }
}
impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse control states derived from channel activation fusion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MacroState {
    #[default]
    Rest,
    Close,
    Open,
    Thumb,
    Hold,
}
impl MacroState {
    pub fn name(self) -> &'static str {
        match self {
            MacroState::Rest => "REST",
            MacroState::Close => "CLOSE",
            MacroState::Open => "OPEN",
            MacroState::Thumb => "THUMB",
            MacroState::Hold => "HOLD",
        }
    }
}
impl fmt::Display for MacroState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which decision drives the actuators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Classifier labels through vote history and the gesture angle table.
    #[default]
    Gesture,
    /// Activation fusion with proportional finger motion.
    Macro,
}
impl std::str::FromStr for ControlMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gesture" => Ok(ControlMode::Gesture),
            "macro" => Ok(ControlMode::Macro),
            other => Err(format!("unknown control mode '{other}'")),
        }
    }
}

/// One reading per channel at one sampling tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RawSample {
    values: [u16; MAX_CHANNELS],
    len: u8,
}
impl RawSample {
    /// Values beyond `MAX_CHANNELS` are dropped.
    pub fn from_slice(values: &[u16]) -> Self {
        let mut sample = Self::default();
        for (slot, value) in sample.values.iter_mut().zip(values) {
            *slot = *value;
        }
        sample.len = values.len().min(MAX_CHANNELS) as u8;
        sample
    }
    pub fn as_slice(&self) -> &[u16] {
        &self.values[..self.len as usize]
    }
    pub fn num_channels(&self) -> usize {
        self.len as usize
    }
}

/// Commands sent to the control thread.
#[derive(Clone, Debug)]
pub enum EngineCommand {
    Stop,
    /// Clears buffers and recalibrates baselines.
    Reset,
    SetMode(ControlMode),
}

/// Confidence assigned to one macro candidate (0..=100).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandidateScore {
    pub state: MacroState,
    pub confidence: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Gesture(GestureLabel),
    Macro(MacroState),
}
impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Gesture(label) => write!(f, "gesture:{label}"),
            Decision::Macro(state) => write!(f, "macro:{state}"),
        }
    }
}

/// Stabilized decision change, emitted for observability.
#[derive(Clone, Debug, PartialEq)]
pub struct StateChangeEvent {
    pub at_ms: u64,
    pub old: Decision,
    pub new: Decision,
    pub scores: Vec<CandidateScore>,
}
impl fmt::Display for StateChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EVT,{},{},{}", self.at_ms, self.old, self.new)?;
        for score in &self.scores {
            write!(f, ",{}={}", score.state, score.confidence)?;
        }
        Ok(())
    }
}

/// Periodic raw and derived channel readings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Telemetry {
    pub at_ms: u64,
    pub raw: Vec<u16>,
    pub envelope: Vec<f32>,
    pub baseline: Vec<Option<f32>>,
    pub mean_frequency_hz: Vec<f32>,
    /// Window features in vector order, labelled `F<ch>_<kind>`.
    pub features: Vec<(String, f32)>,
    pub angles: Vec<u8>,
}
impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">")?;
        for (idx, value) in self.raw.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, "CH{}:{}", idx + 1, value)?;
        }
        for (idx, env) in self.envelope.iter().enumerate() {
            write!(f, ",ENV{}:{:.1}", idx + 1, env)?;
        }
        for (idx, base) in self.baseline.iter().enumerate() {
            match base {
                Some(b) => write!(f, ",BASE{}:{:.1}", idx + 1, b)?,
                None => write!(f, ",BASE{}:-", idx + 1)?,
            }
        }
        for (idx, mnf) in self.mean_frequency_hz.iter().enumerate() {
            write!(f, ",MNF{}:{:.1}", idx + 1, mnf)?;
        }
        for (label, value) in &self.features {
            write!(f, ",{label}:{value:.2}")?;
        }
        for (idx, angle) in self.angles.iter().enumerate() {
            write!(f, ",S{}:{}", idx + 1, angle)?;
        }
        Ok(())
    }
}

/// Messages the control thread sends back to its owner.
#[derive(Clone, Debug)]
pub enum EngineMessage {
    Log(String),
    StateChange(StateChangeEvent),
    Telemetry(Telemetry),
    /// Some actuator commands failed this cycle; they are retried on the next one.
    ActuatorFault { at_ms: u64, failures: usize },
    Stopped,
}
