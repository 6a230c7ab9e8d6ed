use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::drivers::buffer::RingBuffer;
use crate::drivers::{FeatureExtractor, FeatureKind, FeatureVector, PipelineError};
use crate::types::{CandidateScore, Decision, GestureLabel, MacroState, StateChangeEvent};
/// Per-channel activation constants.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelTuning {
    /// Skips calibration when set.
    pub initial_baseline: Option<f32>,
    /// threshold = baseline + margin
    pub margin: f32,
    pub hysteresis: f32,
}
impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            initial_baseline: None,
            margin: 150.0,
            hysteresis: 70.0,
        }
    }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerSettings {
    /// Moving-average length of the envelope, in samples.
    pub envelope_len: usize,
    /// One entry per channel, or empty for the defaults on every channel.
    pub channels: Vec<ChannelTuning>,
    pub calibration_ms: u64,
    /// Consecutive samples above the upper level before a channel activates.
    pub activate_samples: u32,
    /// Consecutive samples below the lower level before a channel releases.
    pub release_samples: u32,
    pub baseline_refresh_ms: u64,
    pub baseline_alpha: f32,
    pub vote_history: usize,
    pub debounce_ms: u64,
    pub inactivity_ms: u64,
    /// Minimum candidate confidence (0..=100) for a macro state change.
    pub acceptance: u8,
    /// Magnitude above baseline at which a channel counts as fully driven.
    pub full_scale: f32,
}
impl Default for StabilizerSettings {
    fn default() -> Self {
        Self {
            envelope_len: 50,
            channels: Vec::new(),
            calibration_ms: 1000,
            activate_samples: 30,
            release_samples: 150,
            baseline_refresh_ms: 3000,
            baseline_alpha: 0.1,
            vote_history: 7,
            debounce_ms: 200,
            inactivity_ms: 2000,
            acceptance: 75,
            full_scale: 400.0,
        }
    }
}
impl StabilizerSettings {
    pub fn validate(&self, num_channels: usize) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::InvalidStabilizer(msg));
        if self.envelope_len == 0 {
            return fail("envelope_len must be at least 1".into());
        }
        if !self.channels.is_empty() && self.channels.len() != num_channels {
            return fail(format!(
                "{} channel tunings for {num_channels} channels",
                self.channels.len()
            ));
        }
        if self.channels.iter().any(|c| c.margin < 0.0 || c.hysteresis < 0.0) {
            return fail("margin and hysteresis must be non-negative".into());
        }
        if self.activate_samples == 0 || self.release_samples == 0 {
            return fail("activation and release counts must be at least 1".into());
        }
        if self.vote_history == 0 {
            return fail("vote_history must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.baseline_alpha) {
            return fail(format!("baseline_alpha {} outside 0..=1", self.baseline_alpha));
        }
        if self.acceptance > 100 || self.full_scale <= 0.0 {
            return fail("acceptance must be <= 100 and full_scale positive".into());
        }
        Ok(())
    }
    fn tuning(&self, channel: usize) -> ChannelTuning {
        self.channels.get(channel).copied().unwrap_or_default()
    }
}
/// Running mean of the last `len` raw readings.
#[derive(Clone, Debug)]
pub struct MovingAverage {
    ring: RingBuffer<u16>,
    sum: u64,
}
impl MovingAverage {
    pub fn new(len: usize) -> Self {
        Self {
            ring: RingBuffer::with_capacity(len),
            sum: 0,
        }
    }
    pub fn push(&mut self, value: u16) -> f32 {
        if let Some(old) = self.ring.push(value) {
            self.sum -= u64::from(old);
        }
        self.sum += u64::from(value);
        self.value()
    }
    pub fn value(&self) -> f32 {
        if self.ring.is_empty() {
            0.0
        } else {
            (self.sum as f64 / self.ring.len() as f64) as f32
        }
    }
    pub fn clear(&mut self) {
        self.ring.clear();
        self.sum = 0;
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationState {
    Idle,
    Activating,
    Active,
    Deactivating,
}
/// Hysteresis state machine over one channel's envelope.
#[derive(Clone, Debug)]
pub struct ChannelActivation {
    tuning: ChannelTuning,
    activate_samples: u32,
    release_samples: u32,
    state: ActivationState,
    counter: u32,
    baseline: Option<f32>,
    idle_sum: f64,
    idle_count: u64,
}
impl ChannelActivation {
    pub fn new(tuning: ChannelTuning, activate_samples: u32, release_samples: u32) -> Self {
        Self {
            tuning,
            activate_samples,
            release_samples,
            state: ActivationState::Idle,
            counter: 0,
            baseline: tuning.initial_baseline,
            idle_sum: 0.0,
            idle_count: 0,
        }
    }
    pub fn state(&self) -> ActivationState {
        self.state
    }
    /// Active or on its way out; a deactivating channel is still engaged.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ActivationState::Active | ActivationState::Deactivating
        )
    }
    pub fn baseline(&self) -> Option<f32> {
        self.baseline
    }
    pub fn threshold(&self) -> Option<f32> {
        self.baseline.map(|b| b + self.tuning.margin)
    }
    pub fn magnitude(&self, envelope: f32) -> f32 {
        self.baseline.map(|b| (envelope - b).max(0.0)).unwrap_or(0.0)
    }
    /// Feeds one envelope value. Returns the new activity when it flips.
    pub fn update(&mut self, envelope: f32) -> Option<bool> {
        let threshold = self.threshold()?;
        let above = envelope > threshold + self.tuning.hysteresis;
        let below = envelope < threshold - self.tuning.hysteresis;
        let was_active = self.is_active();
        match self.state {
            ActivationState::Idle | ActivationState::Activating => {
                if above {
                    self.counter += 1;
                    self.state = if self.counter >= self.activate_samples {
                        self.counter = 0;
                        ActivationState::Active
                    } else {
                        ActivationState::Activating
                    };
                } else {
                    self.counter = 0;
                    self.state = ActivationState::Idle;
                }
            }
            ActivationState::Active | ActivationState::Deactivating => {
                if below {
                    self.counter += 1;
                    self.state = if self.counter >= self.release_samples {
                        self.counter = 0;
                        ActivationState::Idle
                    } else {
                        ActivationState::Deactivating
                    };
                } else {
                    self.counter = 0;
                    self.state = ActivationState::Active;
                }
            }
        }
        if self.state == ActivationState::Idle {
            self.idle_sum += f64::from(envelope);
            self.idle_count += 1;
        }
        (self.is_active() != was_active).then(|| self.is_active())
    }
    pub fn set_baseline(&mut self, baseline: f32) {
        self.baseline = Some(baseline);
        self.idle_sum = 0.0;
        self.idle_count = 0;
    }
    /// Moves the baseline toward the mean envelope seen while idle since the last refresh.
    fn refresh_baseline(&mut self, alpha: f32) {
        if self.state == ActivationState::Idle && self.idle_count > 0 {
            if let Some(baseline) = self.baseline {
                let idle_mean = (self.idle_sum / self.idle_count as f64) as f32;
                self.baseline = Some(baseline + alpha * (idle_mean - baseline));
            }
        }
        self.idle_sum = 0.0;
        self.idle_count = 0;
    }
    fn reset(&mut self) {
        *self = Self::new(self.tuning, self.activate_samples, self.release_samples);
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelBounds {
    pub channel: usize,
    pub min: f32,
    pub max: f32,
}
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dominance {
    pub dominant: usize,
    pub secondary: usize,
    pub ratio: f32,
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValiditySettings {
    /// Bounds on the ADC magnitude implied by MAV (MAV x `mav_scale`).
    pub bounds: Vec<ChannelBounds>,
    pub mav_scale: f32,
    pub dominance: Option<Dominance>,
}
impl Default for ValiditySettings {
    fn default() -> Self {
        Self {
            bounds: Vec::new(),
            mav_scale: 1.5,
            dominance: None,
        }
    }
}
/// Rejects physiologically implausible windows before classification.
pub struct ValidityGate {
    bounds: Vec<(usize, f32, f32)>, // feature index, min, max
    mav_scale: f32,
    dominance: Option<(usize, usize, f32)>,
}
impl ValidityGate {
    pub fn new(
        settings: &ValiditySettings,
        extractor: &FeatureExtractor,
    ) -> Result<Self, PipelineError> {
        let mav = |channel: usize| {
            if channel >= extractor.num_channels() {
                return Err(PipelineError::InvalidStabilizer(format!(
                    "validity rule references channel {channel}"
                )));
            }
            extractor
                .index_of(channel, FeatureKind::Mav)
                .ok_or(PipelineError::MissingFeature("MAV"))
        };
        let bounds = settings
            .bounds
            .iter()
            .map(|b| Ok((mav(b.channel)?, b.min, b.max)))
            .collect::<Result<Vec<_>, PipelineError>>()?;
        let dominance = match settings.dominance {
            Some(d) => Some((mav(d.dominant)?, mav(d.secondary)?, d.ratio)),
            None => None,
        };
        Ok(Self {
            bounds,
            mav_scale: settings.mav_scale,
            dominance,
        })
    }
    pub fn check(&self, features: &FeatureVector) -> bool {
        if !features.is_finite() {
            return false;
        }
        let f = features.as_slice();
        let in_bounds = self.bounds.iter().all(|&(idx, min, max)| {
            let implied = f.get(idx).copied().unwrap_or(0.0) * self.mav_scale;
            (min..=max).contains(&implied)
        });
        let dominant = self.dominance.map_or(true, |(d, s, ratio)| {
            f.get(d).copied().unwrap_or(0.0) >= ratio * f.get(s).copied().unwrap_or(0.0)
        });
        in_bounds && dominant
    }
}
/// Holds a value and only lets it change once per dwell interval.
#[derive(Clone, Debug)]
pub struct Debouncer<T> {
    current: T,
    dwell_ms: u64,
    last_change_ms: Option<u64>,
}
impl<T: Copy + PartialEq> Debouncer<T> {
    pub fn new(initial: T, dwell_ms: u64) -> Self {
        Self {
            current: initial,
            dwell_ms,
            last_change_ms: None,
        }
    }
    pub fn current(&self) -> T {
        self.current
    }
    /// Returns the previous value when `candidate` is adopted.
    pub fn propose(&mut self, candidate: T, now_ms: u64) -> Option<T> {
        if candidate == self.current {
            return None;
        }
        let settled = self
            .last_change_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.dwell_ms);
        if !settled {
            return None;
        }
        self.force(candidate, now_ms)
    }
    /// Adopts `value` regardless of dwell.
    pub fn force(&mut self, value: T, now_ms: u64) -> Option<T> {
        if value == self.current {
            return None;
        }
        let old = std::mem::replace(&mut self.current, value);
        self.last_change_ms = Some(now_ms);
        Some(old)
    }
    pub fn reset(&mut self, value: T) {
        self.current = value;
        self.last_change_ms = None;
    }
}
/// Channel-driven macro state used by confidence fusion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacroChannel {
    pub state: MacroState,
    pub channel: usize,
}
pub struct GestureStabilizer {
    settings: StabilizerSettings,
    envelopes: Vec<MovingAverage>,
    channels: Vec<ChannelActivation>,
    macro_channels: Vec<MacroChannel>,
    votes: RingBuffer<GestureLabel>,
    vote_counts: [usize; GestureLabel::ALL.len()],
    gesture: Debouncer<GestureLabel>,
    macro_state: Debouncer<MacroState>,
    scores: Vec<CandidateScore>,
    levels: Vec<f32>,
    calibration_end_ms: u64,
    calibration_sum: Vec<f64>,
    calibration_count: u64,
    next_refresh_ms: u64,
    last_active_ms: u64,
}
impl GestureStabilizer {
    pub fn new(
        settings: &StabilizerSettings,
        num_channels: usize,
        macro_channels: Vec<MacroChannel>,
    ) -> Result<Self, PipelineError> {
        settings.validate(num_channels)?;
        if let Some(m) = macro_channels.iter().find(|m| m.channel >= num_channels) {
            return Err(PipelineError::InvalidStabilizer(format!(
                "{} bound to channel {} of {num_channels}",
                m.state, m.channel
            )));
        }
        let channels = (0..num_channels)
            .map(|ch| {
                ChannelActivation::new(
                    settings.tuning(ch),
                    settings.activate_samples,
                    settings.release_samples,
                )
            })
            .collect();
        Ok(Self {
            envelopes: (0..num_channels)
                .map(|_| MovingAverage::new(settings.envelope_len))
                .collect(),
            channels,
            macro_channels,
            votes: RingBuffer::with_capacity(settings.vote_history),
            vote_counts: [0; GestureLabel::ALL.len()],
            gesture: Debouncer::new(GestureLabel::Rest, settings.debounce_ms),
            macro_state: Debouncer::new(MacroState::Rest, settings.debounce_ms),
            scores: Vec::new(),
            levels: vec![0.0; num_channels],
            calibration_end_ms: settings.calibration_ms,
            calibration_sum: vec![0.0; num_channels],
            calibration_count: 0,
            next_refresh_ms: settings.calibration_ms + settings.baseline_refresh_ms,
            last_active_ms: 0,
            settings: settings.clone(),
        })
    }
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
    pub fn channel(&self, idx: usize) -> Option<&ChannelActivation> {
        self.channels.get(idx)
    }
    pub fn envelope(&self, idx: usize) -> f32 {
        self.envelopes.get(idx).map(|e| e.value()).unwrap_or(0.0)
    }
    pub fn gesture(&self) -> GestureLabel {
        self.gesture.current()
    }
    pub fn macro_state(&self) -> MacroState {
        self.macro_state.current()
    }
    /// Candidate confidences from the last fusion pass.
    pub fn scores(&self) -> &[CandidateScore] {
        &self.scores
    }
    /// Per-channel drive in 0..=1; zero unless the channel is engaged.
    pub fn drive_levels(&self) -> &[f32] {
        &self.levels
    }
    pub fn any_active(&self) -> bool {
        self.channels.iter().any(ChannelActivation::is_active)
    }
    pub fn calibrated(&self) -> bool {
        self.channels.iter().all(|c| c.baseline().is_some())
    }
    /// Per-sample bookkeeping: envelope, calibration, activation, baseline refresh.
    pub fn observe_sample(&mut self, values: &[u16], now_ms: u64) {
        for (ch, &value) in values.iter().enumerate().take(self.channels.len()) {
            let envelope = self.envelopes[ch].push(value);
            self.calibration_sum[ch] += f64::from(envelope);
            if let Some(active) = self.channels[ch].update(envelope) {
                debug!(
                    "channel {ch} {} at {now_ms} ms (envelope {envelope:.1})",
                    if active { "engaged" } else { "released" }
                );
            }
            let magnitude = self.channels[ch].magnitude(envelope);
            self.levels[ch] = if self.channels[ch].is_active() {
                (magnitude / self.settings.full_scale).min(1.0)
            } else {
                0.0
            };
        }
        self.calibration_count += 1;
        if !self.calibrated() && now_ms >= self.calibration_end_ms {
            self.finish_calibration();
        }
        if self.any_active() {
            self.last_active_ms = now_ms;
        }
        if now_ms >= self.next_refresh_ms {
            for channel in &mut self.channels {
                channel.refresh_baseline(self.settings.baseline_alpha);
            }
            self.next_refresh_ms = now_ms + self.settings.baseline_refresh_ms.max(1);
        }
    }
    fn finish_calibration(&mut self) {
        let count = self.calibration_count.max(1) as f64;
        for (ch, channel) in self.channels.iter_mut().enumerate() {
            if channel.baseline().is_none() {
                let baseline = (self.calibration_sum[ch] / count) as f32;
                channel.set_baseline(baseline);
                info!("channel {ch} calibrated: baseline {baseline:.1}");
            }
        }
    }
    pub fn inactive(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_active_ms) >= self.settings.inactivity_ms
    }
    /// Feeds one raw per-window classification through vote history and debounce.
    pub fn submit_gesture(&mut self, raw: GestureLabel, now_ms: u64) -> Option<StateChangeEvent> {
        if let Some(evicted) = self.votes.push(raw) {
            self.vote_counts[evicted.index()] -= 1;
        }
        self.vote_counts[raw.index()] += 1;
        let old = if self.inactive(now_ms) {
            self.gesture.force(GestureLabel::Rest, now_ms)
        } else {
            // most votes wins, lowest index on ties; needs a strict majority of the full history
            let mut best = GestureLabel::Rest;
            for label in GestureLabel::ALL {
                if self.vote_counts[label.index()] > self.vote_counts[best.index()] {
                    best = label;
                }
            }
            if self.vote_counts[best.index()] * 2 > self.settings.vote_history {
                self.gesture.propose(best, now_ms)
            } else {
                None
            }
        };
        old.map(|old| {
            let event = StateChangeEvent {
                at_ms: now_ms,
                old: Decision::Gesture(old),
                new: Decision::Gesture(self.gesture.current()),
                scores: Vec::new(),
            };
            info!("{event}");
            event
        })
    }
    /// A window outside the physiological bounds: drops the vote history and
    /// forces REST regardless of dwell.
    pub fn reject_window(&mut self, now_ms: u64) -> Option<StateChangeEvent> {
        self.votes.clear();
        self.vote_counts = [0; GestureLabel::ALL.len()];
        let old = self.gesture.force(GestureLabel::Rest, now_ms)?;
        let event = StateChangeEvent {
            at_ms: now_ms,
            old: Decision::Gesture(old),
            new: Decision::Gesture(GestureLabel::Rest),
            scores: Vec::new(),
        };
        info!("{event} (invalid window)");
        Some(event)
    }
    /// Scores every macro candidate from channel activity and adopts the winner.
    pub fn update_macro(&mut self, now_ms: u64) -> Option<StateChangeEvent> {
        self.score_candidates();
        let old = if self.inactive(now_ms) {
            self.macro_state.force(MacroState::Rest, now_ms)
        } else {
            let mut best = self.scores[0];
            for score in &self.scores[1..] {
                if score.confidence > best.confidence
                    || (score.confidence == best.confidence && score.state < best.state)
                {
                    best = *score;
                }
            }
            if best.confidence >= self.settings.acceptance {
                self.macro_state.propose(best.state, now_ms)
            } else {
                None
            }
        };
        old.map(|old| {
            let event = StateChangeEvent {
                at_ms: now_ms,
                old: Decision::Macro(old),
                new: Decision::Macro(self.macro_state.current()),
                scores: self.scores.clone(),
            };
            info!("{event}");
            event
        })
    }
    fn score_candidates(&mut self) {
        let magnitudes: Vec<f32> = (0..self.channels.len())
            .map(|ch| {
                if self.channels[ch].is_active() {
                    self.channels[ch].magnitude(self.envelope(ch))
                } else {
                    0.0
                }
            })
            .collect();
        let total: f32 = magnitudes.iter().sum();
        let active = self.channels.iter().filter(|c| c.is_active()).count();
        self.scores.clear();
        self.scores.push(CandidateScore {
            state: MacroState::Rest,
            confidence: if active == 0 { 100 } else { 0 },
        });
        for binding in &self.macro_channels {
            let magnitude = magnitudes[binding.channel];
            let confidence = if self.channels[binding.channel].is_active() && total > 0.0 {
                let dominance = magnitude / total;
                let strength = (magnitude / self.settings.full_scale).min(1.0);
                60.0 * dominance + 40.0 * strength
            } else {
                0.0
            };
            self.scores.push(CandidateScore {
                state: binding.state,
                confidence: confidence.round().clamp(0.0, 100.0) as u8,
            });
        }
        let mut sorted = magnitudes.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));
        let hold = if active >= 2 && sorted[0] > 0.0 {
            100.0 * sorted[1] / sorted[0]
        } else {
            0.0
        };
        self.scores.push(CandidateScore {
            state: MacroState::Hold,
            confidence: hold.round().clamp(0.0, 100.0) as u8,
        });
    }
    /// Clears vote history and activation, restarting calibration from `now_ms`.
    pub fn reset(&mut self, now_ms: u64) {
        for envelope in &mut self.envelopes {
            envelope.clear();
        }
        for channel in &mut self.channels {
            channel.reset();
        }
        self.votes.clear();
        self.vote_counts = [0; GestureLabel::ALL.len()];
        self.gesture.reset(GestureLabel::Rest);
        self.macro_state.reset(MacroState::Rest);
        self.scores.clear();
        self.levels.iter_mut().for_each(|l| *l = 0.0);
        self.calibration_end_ms = now_ms + self.settings.calibration_ms;
        self.calibration_sum.iter_mut().for_each(|s| *s = 0.0);
        self.calibration_count = 0;
        self.next_refresh_ms = self.calibration_end_ms + self.settings.baseline_refresh_ms;
        self.last_active_ms = now_ms;
        debug!("stabilizer reset at {now_ms} ms");
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::FeatureSettings;
    fn tuning(baseline: f32) -> ChannelTuning {
        ChannelTuning {
            initial_baseline: Some(baseline),
            margin: 100.0,
            hysteresis: 20.0,
        }
    }
    #[test]
    fn activation_needs_exactly_m_samples() {
        let m = 5;
        let mut ch = ChannelActivation::new(tuning(500.0), m, 8);
        for _ in 0..m - 1 {
            assert_eq!(ch.update(700.0), None);
        }
        assert!(!ch.is_active());
        assert_eq!(ch.state(), ActivationState::Activating);
        // a dip resets the count
        ch.update(500.0);
        assert_eq!(ch.state(), ActivationState::Idle);
        for _ in 0..m - 1 {
            ch.update(700.0);
        }
        assert!(!ch.is_active());
        assert_eq!(ch.update(700.0), Some(true));
        assert!(ch.is_active());
    }
    #[test]
    fn boundaries_are_strict() {
        let mut ch = ChannelActivation::new(tuning(500.0), 1, 1);
        // threshold 600, upper 620, lower 580
        assert_eq!(ch.update(620.0), None);
        assert_eq!(ch.update(620.5), Some(true));
        assert_eq!(ch.update(580.0), None);
        assert_eq!(ch.update(579.5), Some(false));
    }
    #[test]
    fn release_is_sticky() {
        let mut ch = ChannelActivation::new(tuning(500.0), 1, 4);
        ch.update(700.0);
        for _ in 0..3 {
            ch.update(500.0);
            assert!(ch.is_active());
        }
        ch.update(700.0);
        assert_eq!(ch.state(), ActivationState::Active);
        for _ in 0..3 {
            ch.update(500.0);
        }
        assert_eq!(ch.update(500.0), Some(false));
    }
    #[test]
    fn uncalibrated_channel_never_activates() {
        let mut ch = ChannelActivation::new(ChannelTuning::default(), 1, 1);
        assert_eq!(ch.update(4000.0), None);
        assert!(!ch.is_active());
    }
    #[test]
    fn baseline_refresh_tracks_idle_level_only() {
        let mut ch = ChannelActivation::new(tuning(500.0), 1, 1);
        for _ in 0..10 {
            ch.update(520.0);
        }
        ch.refresh_baseline(0.5);
        assert_eq!(ch.baseline(), Some(510.0));
        ch.update(900.0);
        assert!(ch.is_active());
        ch.refresh_baseline(0.5);
        assert_eq!(ch.baseline(), Some(510.0));
    }
    #[test]
    fn moving_average_follows_last_len_samples() {
        let mut ma = MovingAverage::new(4);
        for v in [4u16, 8, 12, 16] {
            ma.push(v);
        }
        assert_eq!(ma.value(), 10.0);
        assert_eq!(ma.push(20), 14.0);
    }
    #[test]
    fn debounce_keeps_first_change_and_delays_second() {
        let mut d = Debouncer::new(GestureLabel::Rest, 200);
        assert_eq!(d.propose(GestureLabel::Rock, 1000), Some(GestureLabel::Rest));
        assert_eq!(d.propose(GestureLabel::Paper, 1100), None);
        assert_eq!(d.current(), GestureLabel::Rock);
        assert_eq!(d.propose(GestureLabel::Paper, 1199), None);
        assert_eq!(d.propose(GestureLabel::Paper, 1200), Some(GestureLabel::Rock));
        assert_eq!(d.current(), GestureLabel::Paper);
    }
    #[test]
    fn validity_gate_checks_bounds_and_dominance() {
        let fx = FeatureExtractor::new(
            FeatureSettings {
                layout: vec![FeatureKind::Mav],
                ..FeatureSettings::default()
            },
            2,
        );
        let settings = ValiditySettings {
            bounds: vec![ChannelBounds {
                channel: 0,
                min: 500.0,
                max: 1200.0,
            }],
            mav_scale: 1.5,
            dominance: Some(Dominance {
                dominant: 0,
                secondary: 1,
                ratio: 2.0,
            }),
        };
        let gate = ValidityGate::new(&settings, &fx).unwrap();
        let fv = |a: f32, b: f32| FeatureVector::from_values(vec![a, b]);
        assert!(gate.check(&fv(400.0, 200.0)));
        assert!(!gate.check(&fv(300.0, 100.0))); // 450 below bounds
        assert!(!gate.check(&fv(900.0, 100.0))); // 1350 above bounds
        assert!(!gate.check(&fv(400.0, 201.0))); // not dominant
        assert!(!gate.check(&fv(f32::NAN, 0.0)));
    }
    fn stabilizer(inactivity_ms: u64) -> GestureStabilizer {
        let settings = StabilizerSettings {
            channels: vec![tuning(500.0), tuning(500.0), tuning(500.0)],
            envelope_len: 1,
            activate_samples: 1,
            release_samples: 1,
            vote_history: 3,
            inactivity_ms,
            ..StabilizerSettings::default()
        };
        let bindings = vec![
            MacroChannel {
                state: MacroState::Close,
                channel: 0,
            },
            MacroChannel {
                state: MacroState::Thumb,
                channel: 1,
            },
            MacroChannel {
                state: MacroState::Open,
                channel: 2,
            },
        ];
        GestureStabilizer::new(&settings, 3, bindings).unwrap()
    }
    #[test]
    fn votes_need_a_majority() {
        let mut s = stabilizer(u64::MAX);
        assert!(s.submit_gesture(GestureLabel::Rock, 0).is_none());
        let event = s.submit_gesture(GestureLabel::Rock, 10).unwrap();
        assert_eq!(event.old, Decision::Gesture(GestureLabel::Rest));
        assert_eq!(event.new, Decision::Gesture(GestureLabel::Rock));
        // ROCK, ROCK, PAPER still favours ROCK
        assert!(s.submit_gesture(GestureLabel::Paper, 300).is_none());
        assert_eq!(s.gesture(), GestureLabel::Rock);
        assert!(s.submit_gesture(GestureLabel::Paper, 330).is_some());
        assert_eq!(s.gesture(), GestureLabel::Paper);
    }
    #[test]
    fn single_window_cannot_flip_an_empty_history() {
        let settings = StabilizerSettings::default();
        let mut s = GestureStabilizer::new(&settings, 3, Vec::new()).unwrap();
        s.observe_sample(&[800, 800, 800], 0);
        assert!(s.submit_gesture(GestureLabel::Rock, 200).is_none());
        assert_eq!(s.gesture(), GestureLabel::Rest);
        // 4 of 7 is the first strict majority
        assert!(s.submit_gesture(GestureLabel::Rock, 230).is_none());
        assert!(s.submit_gesture(GestureLabel::Rock, 260).is_none());
        let event = s.submit_gesture(GestureLabel::Rock, 290).unwrap();
        assert_eq!(event.new, Decision::Gesture(GestureLabel::Rock));
        s.reset(300);
        assert!(s.submit_gesture(GestureLabel::Paper, 600).is_none());
        assert_eq!(s.gesture(), GestureLabel::Rest);
    }
    #[test]
    fn inactivity_forces_rest_past_debounce() {
        let mut s = stabilizer(2000);
        s.observe_sample(&[900, 500, 500], 0);
        s.submit_gesture(GestureLabel::Rock, 10);
        s.submit_gesture(GestureLabel::Rock, 20);
        assert_eq!(s.gesture(), GestureLabel::Rock);
        s.observe_sample(&[500, 500, 500], 30);
        s.submit_gesture(GestureLabel::Rock, 1500);
        assert_eq!(s.gesture(), GestureLabel::Rock);
        let event = s.submit_gesture(GestureLabel::Rock, 2030).unwrap();
        assert_eq!(event.new, Decision::Gesture(GestureLabel::Rest));
    }
    #[test]
    fn rejected_window_forces_rest_inside_debounce() {
        let mut s = stabilizer(u64::MAX);
        s.submit_gesture(GestureLabel::Rock, 0);
        s.submit_gesture(GestureLabel::Rock, 10);
        assert_eq!(s.gesture(), GestureLabel::Rock);
        let event = s.reject_window(50).unwrap();
        assert_eq!(event.old, Decision::Gesture(GestureLabel::Rock));
        assert_eq!(s.gesture(), GestureLabel::Rest);
        assert!(s.reject_window(80).is_none());
        // history starts over: one ROCK vote is not enough
        assert!(s.submit_gesture(GestureLabel::Rock, 400).is_none());
    }
    #[test]
    fn single_strong_channel_selects_its_macro_state() {
        let mut s = stabilizer(u64::MAX);
        s.observe_sample(&[800, 500, 500], 0);
        let event = s.update_macro(0).unwrap();
        assert_eq!(event.new, Decision::Macro(MacroState::Close));
        let close = s.scores().iter().find(|c| c.state == MacroState::Close).unwrap();
        // 60 * 1.0 + 40 * 300/400
        assert_eq!(close.confidence, 90);
        assert!((s.drive_levels()[0] - 0.75).abs() < 1e-6);
    }
    #[test]
    fn weak_activation_stays_below_acceptance() {
        let mut s = stabilizer(u64::MAX);
        // magnitude 130: 60 + 40 * 0.325 = 73
        s.observe_sample(&[630, 500, 500], 0);
        assert!(s.channel(0).unwrap().is_active());
        assert!(s.update_macro(0).is_none());
        assert_eq!(s.macro_state(), MacroState::Rest);
    }
    #[test]
    fn co_contraction_prefers_hold() {
        let mut s = stabilizer(u64::MAX);
        s.observe_sample(&[900, 880, 500], 0);
        s.update_macro(0);
        assert_eq!(s.macro_state(), MacroState::Hold);
    }
    #[test]
    fn calibration_sets_missing_baselines() {
        let settings = StabilizerSettings {
            envelope_len: 1,
            calibration_ms: 100,
            ..StabilizerSettings::default()
        };
        let mut s = GestureStabilizer::new(&settings, 1, Vec::new()).unwrap();
        for ms in 0..100u64 {
            s.observe_sample(&[if ms % 2 == 0 { 790 } else { 810 }], ms);
            assert!(!s.calibrated());
        }
        s.observe_sample(&[800], 100);
        assert!(s.calibrated());
        assert!((s.channel(0).unwrap().baseline().unwrap() - 800.0).abs() < 0.5);
    }
    #[test]
    fn baseline_refreshes_on_schedule_and_only_while_idle() {
        let settings = StabilizerSettings {
            envelope_len: 1,
            channels: vec![ChannelTuning {
                initial_baseline: None,
                margin: 100.0,
                hysteresis: 20.0,
            }],
            calibration_ms: 100,
            activate_samples: 1,
            release_samples: 1,
            baseline_refresh_ms: 300,
            baseline_alpha: 0.5,
            ..StabilizerSettings::default()
        };
        let mut s = GestureStabilizer::new(&settings, 1, Vec::new()).unwrap();
        let baseline = |s: &GestureStabilizer| s.channel(0).unwrap().baseline();
        for ms in 0..=100u64 {
            s.observe_sample(&[800], ms);
        }
        assert_eq!(baseline(&s), Some(800.0));
        // drifts upward but stays under the release level of 880
        for ms in 101..400u64 {
            s.observe_sample(&[840], ms);
        }
        assert_eq!(baseline(&s), Some(800.0));
        s.observe_sample(&[840], 400);
        assert_eq!(baseline(&s), Some(820.0));
        for ms in 401..=700u64 {
            s.observe_sample(&[1000], ms);
        }
        assert!(s.channel(0).unwrap().is_active());
        assert_eq!(baseline(&s), Some(820.0));
    }
    #[test]
    fn tuning_count_must_match_channels() {
        let settings = StabilizerSettings {
            channels: vec![ChannelTuning::default()],
            ..StabilizerSettings::default()
        };
        assert!(GestureStabilizer::new(&settings, 3, Vec::new()).is_err());
    }
}
