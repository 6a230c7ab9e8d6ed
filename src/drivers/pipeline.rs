use log::{debug, info};

use crate::config::Config;
use crate::drivers::classifier::{build_classifier, Classification, GestureClassifier};
use crate::drivers::servo::ActuatorDriver;
use crate::drivers::spectrum::SpectrumAnalyzer;
use crate::drivers::stabilizer::{GestureStabilizer, MacroChannel, ValidityGate};
use crate::drivers::{
    ActuationMapper, FeatureExtractor, FeatureVector, PipelineError, SampleRing, SampleWindow,
};
use crate::types::{ControlMode, Decision, StateChangeEvent, Telemetry};
/// What one control cycle produced.
#[derive(Clone, Debug)]
pub struct CycleReport {
    pub at_ms: u64,
    /// Per-window label before stabilization (gesture mode only).
    pub raw: Option<Classification>,
    pub decision: Decision,
    pub event: Option<StateChangeEvent>,
    pub telemetry: Option<Telemetry>,
    pub failures: usize,
}
/// Owns every piece of long-lived pipeline state; driven from a single thread.
pub struct Controller {
    mode: ControlMode,
    rate_hz: u32,
    ring: SampleRing,
    window: SampleWindow,
    extractor: FeatureExtractor,
    features: FeatureVector,
    feature_labels: Vec<String>,
    classifier: Box<dyn GestureClassifier>,
    gate: ValidityGate,
    stabilizer: GestureStabilizer,
    mapper: ActuationMapper,
    spectrum: SpectrumAnalyzer,
    samples: u64,
    telemetry_interval_ms: u64,
    next_telemetry_ms: u64,
}
impl Controller {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        config.validate()?;
        let s = &config.sampling;
        let extractor = config.extractor();
        let classifier = build_classifier(&config.classifier, &extractor)?;
        let gate = ValidityGate::new(&config.validity, &extractor)?;
        let macro_channels = config
            .actuation
            .macros
            .iter()
            .map(|b| MacroChannel {
                state: b.state,
                channel: b.channel,
            })
            .collect();
        let stabilizer = GestureStabilizer::new(&config.stabilizer, s.channels, macro_channels)?;
        let mapper = ActuationMapper::new(&config.actuation)?;
        let feature_labels = (0..s.channels)
            .flat_map(|ch| {
                extractor
                    .layout()
                    .iter()
                    .map(move |kind| format!("F{}_{}", ch + 1, kind))
            })
            .collect();
        info!(
            "{} Hz x {} ch, window {}/{} ({} ms cycle), {} features, {} classifier, {:?} mode",
            s.rate_hz,
            s.channels,
            s.window,
            s.step,
            s.cycle_ms(),
            extractor.feature_count(),
            classifier.name(),
            config.mode
        );
        Ok(Self {
            mode: config.mode,
            rate_hz: s.rate_hz,
            ring: SampleRing::new(s.channels, s.window, s.step, s.history, s.adc_bits)?,
            window: SampleWindow::with_shape(s.channels, s.window),
            features: FeatureVector::default(),
            feature_labels,
            extractor,
            classifier,
            gate,
            stabilizer,
            mapper,
            spectrum: SpectrumAnalyzer::new(s.window, s.rate_hz as f32),
            samples: 0,
            telemetry_interval_ms: config.telemetry_interval_ms,
            next_telemetry_ms: 0,
        })
    }
    pub fn mode(&self) -> ControlMode {
        self.mode
    }
    pub fn decision(&self) -> Decision {
        match self.mode {
            ControlMode::Gesture => Decision::Gesture(self.stabilizer.gesture()),
            ControlMode::Macro => Decision::Macro(self.stabilizer.macro_state()),
        }
    }
    pub fn stabilizer(&self) -> &GestureStabilizer {
        &self.stabilizer
    }
    pub fn mapper(&self) -> &ActuationMapper {
        &self.mapper
    }
    pub fn samples(&self) -> u64 {
        self.samples
    }
    /// Sample-clock time since start.
    pub fn now_ms(&self) -> u64 {
        self.samples * 1000 / u64::from(self.rate_hz)
    }
    /// Accepts one tick; rejected ticks leave every piece of state untouched.
    pub fn ingest(&mut self, values: &[u16]) -> Result<(), PipelineError> {
        self.ring.push_sample(values)?;
        self.samples += 1;
        let now = self.now_ms();
        self.stabilizer.observe_sample(values, now);
        Ok(())
    }
    /// Ingests one tick and runs a control cycle when a window is due.
    pub fn step(
        &mut self,
        values: &[u16],
        driver: &mut dyn ActuatorDriver,
    ) -> Result<Option<CycleReport>, PipelineError> {
        self.ingest(values)?;
        Ok(self.run_cycle(driver))
    }
    /// Features, classification, stabilization and actuation for the current window.
    /// Returns `None` without touching the decision when no window is due.
    pub fn run_cycle(&mut self, driver: &mut dyn ActuatorDriver) -> Option<CycleReport> {
        if !self.ring.take_window(&mut self.window) {
            return None;
        }
        let now = self.now_ms();
        self.extractor.extract_into(&self.window, &mut self.features);
        let (raw, event) = match self.mode {
            ControlMode::Gesture => {
                if self.gate.check(&self.features) {
                    let raw = self.classifier.classify(&self.features);
                    (Some(raw), self.stabilizer.submit_gesture(raw.label, now))
                } else {
                    debug!("window at {now} ms failed the validity gate");
                    self.ring.reset();
                    (
                        Some(Classification::rest()),
                        self.stabilizer.reject_window(now),
                    )
                }
            }
            ControlMode::Macro => (None, self.stabilizer.update_macro(now)),
        };
        let decision = self.decision();
        self.mapper.apply(decision, self.stabilizer.drive_levels());
        let failures = self.mapper.drive(driver);
        let telemetry = if self.telemetry_interval_ms > 0 && now >= self.next_telemetry_ms {
            Some(self.telemetry(now))
        } else {
            None
        };
        Some(CycleReport {
            at_ms: now,
            raw,
            decision,
            event,
            telemetry,
            failures,
        })
    }
    fn telemetry(&mut self, now: u64) -> Telemetry {
        self.next_telemetry_ms = now + self.telemetry_interval_ms;
        let n = self.ring.num_channels();
        let telemetry = Telemetry {
            at_ms: now,
            raw: self
                .ring
                .latest()
                .map(|s| s.as_slice().to_vec())
                .unwrap_or_default(),
            envelope: (0..n).map(|ch| self.stabilizer.envelope(ch)).collect(),
            baseline: (0..n)
                .map(|ch| self.stabilizer.channel(ch).and_then(|c| c.baseline()))
                .collect(),
            mean_frequency_hz: (0..n)
                .map(|ch| self.spectrum.summarize(self.window.channel(ch)).mean_hz)
                .collect(),
            features: self
                .feature_labels
                .iter()
                .cloned()
                .zip(self.features.as_slice().iter().copied())
                .collect(),
            angles: self.mapper.current().to_vec(),
        };
        debug!("{telemetry}");
        telemetry
    }
    pub fn set_mode(&mut self, mode: ControlMode) {
        if mode == self.mode {
            return;
        }
        info!("mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        self.reset();
    }
    /// Clears buffered samples, restarts calibration and heads back to REST.
    pub fn reset(&mut self) {
        let now = self.now_ms();
        self.ring.reset();
        self.stabilizer.reset(now);
        self.mapper.reset();
        info!("pipeline reset at {now} ms");
    }
}
