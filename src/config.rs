// src/config.rs
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::drivers::{
    build_classifier, ActuationSettings, ClassifierConfig, FeatureExtractor, FeatureSettings,
    PipelineError, SimulationSettings, StabilizerSettings, ValidityGate, ValiditySettings,
};
use crate::types::{ControlMode, MAX_CHANNELS};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub rate_hz: u32,
    pub channels: usize,
    pub adc_bits: u8,
    /// Window length in samples.
    pub window: usize,
    /// Samples between successive windows; also the control-cycle period.
    pub step: usize,
    /// Ring capacity; raised to `window` when smaller.
    pub history: usize,
}
impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            rate_hz: 1500,
            channels: 3,
            adc_bits: 12,
            window: 300,
            step: 45,
            history: 300,
        }
    }
}
impl SamplingConfig {
    pub fn cycle_ms(&self) -> u64 {
        self.step as u64 * 1000 / u64::from(self.rate_hz.max(1))
    }
}

/// Startup configuration; never mutated once the engine runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: ControlMode,
    pub sampling: SamplingConfig,
    pub features: FeatureSettings,
    pub classifier: ClassifierConfig,
    pub stabilizer: StabilizerSettings,
    pub validity: ValiditySettings,
    pub actuation: ActuationSettings,
    pub simulation: SimulationSettings,
    pub telemetry_interval_ms: u64,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            mode: ControlMode::default(),
            sampling: SamplingConfig::default(),
            features: FeatureSettings::default(),
            classifier: ClassifierConfig::default(),
            stabilizer: StabilizerSettings::default(),
            validity: ValiditySettings::default(),
            actuation: ActuationSettings::default(),
            simulation: SimulationSettings::default(),
            telemetry_interval_ms: 250,
        }
    }
}
impl Config {
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(text)?)
    }
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
    }
    pub fn extractor(&self) -> FeatureExtractor {
        FeatureExtractor::new(self.features.clone(), self.sampling.channels)
    }
    /// Every fatal configuration check, run once before anything starts.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let s = &self.sampling;
        if s.rate_hz == 0 {
            return Err(PipelineError::InvalidSampleRate);
        }
        if s.channels == 0 || s.channels > MAX_CHANNELS {
            return Err(PipelineError::UnsupportedChannelCount(s.channels));
        }
        if s.window < 2 || s.step == 0 || s.step > s.window {
            return Err(PipelineError::InvalidWindow {
                window: s.window,
                step: s.step,
            });
        }
        if !(1..=16).contains(&s.adc_bits) {
            return Err(PipelineError::InvalidSampling(format!(
                "adc_bits {} outside 1..=16",
                s.adc_bits
            )));
        }
        if self.features.layout.is_empty() {
            return Err(PipelineError::InvalidModel("feature layout is empty".into()));
        }
        let extractor = self.extractor();
        build_classifier(&self.classifier, &extractor)?;
        ValidityGate::new(&self.validity, &extractor)?;
        self.stabilizer.validate(s.channels)?;
        self.actuation.validate()?;
        if let Some(binding) = self
            .actuation
            .macros
            .iter()
            .find(|b| b.channel >= s.channels)
        {
            return Err(PipelineError::InvalidActuator(format!(
                "{} bound to channel {} of {}",
                binding.state, binding.channel, s.channels
            )));
        }
        Ok(())
    }
}
