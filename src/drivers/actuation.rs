use log::warn;
use serde::{Deserialize, Serialize};

use crate::drivers::servo::{ActuatorDriver, MAX_ANGLE};
use crate::drivers::PipelineError;
use crate::types::{Decision, GestureLabel, MacroState};
/// One finger servo and its mechanical limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActuatorSpec {
    pub name: String,
    pub pwm_channel: u8,
    pub min: u8,
    pub max: u8,
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GestureRow {
    pub label: GestureLabel,
    /// One angle per actuator, in actuator order.
    pub angles: Vec<u8>,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Min,
    Max,
}
/// How a channel-driven macro state moves its actuators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MacroBinding {
    pub state: MacroState,
    pub channel: usize,
    pub actuators: Vec<usize>,
    pub toward: Endpoint,
    /// Scale travel with drive level instead of jumping to the end stop.
    #[serde(default = "default_proportional")]
    pub proportional: bool,
}
fn default_proportional() -> bool {
    true
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationSettings {
    pub actuators: Vec<ActuatorSpec>,
    pub gestures: Vec<GestureRow>,
    /// Largest angle change per control cycle.
    pub step_deg: u8,
    pub macros: Vec<MacroBinding>,
}
impl Default for ActuationSettings {
    fn default() -> Self {
        let servo = |name: &str, pwm_channel, min, max| ActuatorSpec {
            name: name.into(),
            pwm_channel,
            min,
            max,
        };
        let row = |label, angles: [u8; 5]| GestureRow {
            label,
            angles: angles.to_vec(),
        };
        let fingers = vec![1, 2, 3, 4];
        Self {
            actuators: vec![
                servo("thumb", 0, 0, 150),
                servo("index", 1, 0, 180),
                servo("middle", 2, 10, 170),
                servo("ring", 3, 20, 180),
                servo("pinky", 4, 0, 120),
            ],
            // thumb, index, middle, ring, pinky
            gestures: vec![
                row(GestureLabel::Rest, [20, 20, 20, 20, 20]),
                row(GestureLabel::Rock, [150, 180, 170, 180, 120]),
                row(GestureLabel::Scissors, [150, 0, 10, 180, 120]),
                row(GestureLabel::Paper, [0, 0, 10, 20, 0]),
                row(GestureLabel::Middle, [150, 180, 10, 180, 120]),
                row(GestureLabel::Three, [150, 0, 10, 20, 120]),
                row(GestureLabel::Four, [150, 0, 10, 20, 0]),
                row(GestureLabel::Good, [0, 180, 170, 180, 120]),
                row(GestureLabel::Okay, [80, 100, 10, 20, 0]),
                row(GestureLabel::FingerGun, [0, 0, 170, 180, 120]),
            ],
            step_deg: 6,
            macros: vec![
                MacroBinding {
                    state: MacroState::Close,
                    channel: 0,
                    actuators: fingers.clone(),
                    toward: Endpoint::Max,
                    proportional: true,
                },
                MacroBinding {
                    state: MacroState::Thumb,
                    channel: 1,
                    actuators: vec![0],
                    toward: Endpoint::Min,
                    proportional: true,
                },
                MacroBinding {
                    state: MacroState::Open,
                    channel: 2,
                    actuators: fingers,
                    toward: Endpoint::Min,
                    proportional: true,
                },
            ],
        }
    }
}
impl ActuationSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::InvalidActuator(msg));
        if self.actuators.is_empty() {
            return fail("no actuators configured".into());
        }
        for spec in &self.actuators {
            if spec.min > spec.max || spec.max > MAX_ANGLE {
                return fail(format!(
                    "{}: range {}..={} is not within 0..={MAX_ANGLE}",
                    spec.name, spec.min, spec.max
                ));
            }
        }
        for row in &self.gestures {
            if row.angles.len() != self.actuators.len() {
                return fail(format!(
                    "{} row has {} angles for {} actuators",
                    row.label,
                    row.angles.len(),
                    self.actuators.len()
                ));
            }
        }
        if !self.gestures.iter().any(|r| r.label == GestureLabel::Rest) {
            return fail("gesture table has no REST row".into());
        }
        if self.step_deg == 0 {
            return fail("step_deg must be at least 1".into());
        }
        for binding in &self.macros {
            if matches!(binding.state, MacroState::Rest | MacroState::Hold) {
                return fail(format!("{} cannot be bound to a channel", binding.state));
            }
            if let Some(idx) = binding.actuators.iter().find(|a| **a >= self.actuators.len()) {
                return fail(format!("{} drives unknown actuator {idx}", binding.state));
            }
        }
        Ok(())
    }
    pub fn pwm_channels(&self) -> Vec<u8> {
        self.actuators.iter().map(|a| a.pwm_channel).collect()
    }
}
/// Target and commanded angle per actuator; moves the latter toward the former each cycle.
pub struct ActuationMapper {
    actuators: Vec<ActuatorSpec>,
    table: Vec<Option<Vec<u8>>>, // gesture index -> clamped row
    macros: Vec<MacroBinding>,
    step: u8,
    targets: Vec<u8>,
    current: Vec<u8>,
}
impl ActuationMapper {
    pub fn new(settings: &ActuationSettings) -> Result<Self, PipelineError> {
        settings.validate()?;
        let mut mapper = Self {
            actuators: settings.actuators.clone(),
            table: vec![None; GestureLabel::ALL.len()],
            macros: settings.macros.clone(),
            step: settings.step_deg,
            targets: settings.actuators.iter().map(|a| a.min).collect(),
            current: settings.actuators.iter().map(|a| a.min).collect(),
        };
        for row in &settings.gestures {
            let clamped = row
                .angles
                .iter()
                .enumerate()
                .map(|(idx, angle)| mapper.clamp(idx, *angle))
                .collect();
            mapper.table[row.label.index()] = Some(clamped);
        }
        mapper.apply_gesture(GestureLabel::Rest);
        Ok(mapper)
    }
    pub fn targets(&self) -> &[u8] {
        &self.targets
    }
    pub fn current(&self) -> &[u8] {
        &self.current
    }
    pub fn clamp(&self, idx: usize, angle: u8) -> u8 {
        let spec = &self.actuators[idx];
        angle.clamp(spec.min, spec.max)
    }
    /// Returns the stored, clamped target.
    pub fn set_target(&mut self, idx: usize, angle: u8) -> Option<u8> {
        if idx >= self.targets.len() {
            return None;
        }
        self.targets[idx] = self.clamp(idx, angle);
        Some(self.targets[idx])
    }
    /// Updates targets for the stabilized decision; `levels` is the per-channel drive in 0..=1.
    pub fn apply(&mut self, decision: Decision, levels: &[f32]) -> &[u8] {
        match decision {
            Decision::Gesture(label) => self.apply_gesture(label),
            Decision::Macro(MacroState::Rest) => self.apply_gesture(GestureLabel::Rest),
            Decision::Macro(MacroState::Hold) => {}
            Decision::Macro(state) => self.apply_macro(state, levels),
        }
        &self.targets
    }
    fn apply_gesture(&mut self, label: GestureLabel) {
        match &self.table[label.index()] {
            Some(row) => self.targets.copy_from_slice(row),
            None => warn!("no angle row for {label}; holding targets"),
        }
    }
    fn apply_macro(&mut self, state: MacroState, levels: &[f32]) {
        for b in 0..self.macros.len() {
            if self.macros[b].state != state {
                continue;
            }
            let level = levels.get(self.macros[b].channel).copied().unwrap_or(0.0);
            // targets hold while the driving channel is disengaged
            if level <= 0.0 {
                continue;
            }
            let level = if self.macros[b].proportional {
                level.min(1.0)
            } else {
                1.0
            };
            for i in 0..self.macros[b].actuators.len() {
                let idx = self.macros[b].actuators[i];
                let spec = &self.actuators[idx];
                let (from, to) = match self.macros[b].toward {
                    Endpoint::Max => (spec.min, spec.max),
                    Endpoint::Min => (spec.max, spec.min),
                };
                let angle = f32::from(from) + (f32::from(to) - f32::from(from)) * level;
                self.set_target(idx, angle.round().clamp(0.0, 255.0) as u8);
            }
        }
    }
    /// Rate-limits every actuator toward its target and commands it.
    /// A failed command leaves that actuator's angle untouched so the move is retried next cycle.
    pub fn drive(&mut self, driver: &mut dyn ActuatorDriver) -> usize {
        let mut failures = 0;
        for idx in 0..self.current.len() {
            let next = step_toward(self.current[idx], self.targets[idx], self.step);
            match driver.set_actuator_angle(idx, next) {
                Ok(()) => self.current[idx] = next,
                Err(err) => {
                    failures += 1;
                    warn!("{} ({idx}): {err}", self.actuators[idx].name);
                }
            }
        }
        failures
    }
    pub fn reset(&mut self) {
        self.apply_gesture(GestureLabel::Rest);
    }
}
pub fn step_toward(current: u8, target: u8, step: u8) -> u8 {
    if current < target {
        current.saturating_add(step).min(target)
    } else {
        current.saturating_sub(step).max(target)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[derive(Default)]
    struct FlakyDriver {
        failing: bool,
        sent: Vec<(usize, u8)>,
    }
    impl ActuatorDriver for FlakyDriver {
        fn set_actuator_angle(&mut self, index: usize, angle: u8) -> Result<(), PipelineError> {
            if self.failing {
                return Err(PipelineError::Actuator {
                    index,
                    reason: "bus NACK".into(),
                });
            }
            self.sent.push((index, angle));
            Ok(())
        }
    }
    fn mapper() -> ActuationMapper {
        ActuationMapper::new(&ActuationSettings::default()).unwrap()
    }
    #[test]
    fn targets_are_clamped_per_actuator() {
        let mut m = mapper();
        assert_eq!(m.set_target(0, 200), Some(150));
        assert_eq!(m.set_target(2, 0), Some(10));
        assert_eq!(m.set_target(4, 130), Some(120));
        assert_eq!(m.set_target(9, 10), None);
    }
    #[test]
    fn starts_at_min_heading_for_rest() {
        let m = mapper();
        assert_eq!(m.current(), &[0, 0, 10, 20, 0]);
        assert_eq!(m.targets(), &[20, 20, 20, 20, 20]);
    }
    #[test]
    fn drive_is_rate_limited_and_commands_every_actuator() {
        let mut m = mapper();
        m.apply(Decision::Gesture(GestureLabel::Rock), &[]);
        let mut driver = FlakyDriver::default();
        let mut last = m.current().to_vec();
        for _ in 0..40 {
            assert_eq!(m.drive(&mut driver), 0);
            for (prev, now) in last.iter().zip(m.current()) {
                assert!(now >= prev && now - prev <= 6);
            }
            last = m.current().to_vec();
        }
        assert_eq!(m.current(), &[150, 180, 170, 180, 120]);
        assert_eq!(driver.sent.len(), 40 * 5);
        // unchanged angles are still sent
        m.drive(&mut driver);
        assert_eq!(
            &driver.sent[driver.sent.len() - 5..],
            &[(0, 150), (1, 180), (2, 170), (3, 180), (4, 120)]
        );
    }
    #[test]
    fn failed_commands_retry_the_same_move() {
        let mut m = mapper();
        let mut driver = FlakyDriver {
            failing: true,
            ..FlakyDriver::default()
        };
        assert_eq!(m.drive(&mut driver), 5);
        assert_eq!(m.current(), &[0, 0, 10, 20, 0]);
        driver.failing = false;
        assert_eq!(m.drive(&mut driver), 0);
        assert_eq!(driver.sent[0], (0, 6));
    }
    #[test]
    fn macro_close_scales_with_drive_level() {
        let mut m = mapper();
        m.apply(Decision::Macro(MacroState::Close), &[0.5, 0.0, 0.0]);
        assert_eq!(m.targets(), &[20, 90, 90, 100, 60]);
        // disengaged channel holds targets
        m.apply(Decision::Macro(MacroState::Close), &[0.0, 0.0, 0.0]);
        assert_eq!(m.targets(), &[20, 90, 90, 100, 60]);
        m.apply(Decision::Macro(MacroState::Hold), &[1.0, 1.0, 1.0]);
        assert_eq!(m.targets(), &[20, 90, 90, 100, 60]);
        m.apply(Decision::Macro(MacroState::Open), &[0.0, 0.0, 1.0]);
        assert_eq!(m.targets(), &[20, 0, 10, 20, 0]);
        m.apply(Decision::Macro(MacroState::Rest), &[]);
        assert_eq!(m.targets(), &[20, 20, 20, 20, 20]);
    }
    #[test]
    fn config_rejects_bad_tables() {
        let mut settings = ActuationSettings::default();
        settings.gestures[1].angles.pop();
        assert!(ActuationMapper::new(&settings).is_err());
        let mut settings = ActuationSettings::default();
        settings.actuators[0].min = 160;
        assert!(settings.validate().is_err());
        let mut settings = ActuationSettings::default();
        settings.gestures.retain(|r| r.label != GestureLabel::Rest);
        assert!(settings.validate().is_err());
    }
    #[test]
    fn step_toward_never_overshoots() {
        assert_eq!(step_toward(10, 12, 6), 12);
        assert_eq!(step_toward(10, 3, 6), 4);
        assert_eq!(step_toward(250, 255, 10), 255);
        assert_eq!(step_toward(3, 0, 6), 0);
    }
}
