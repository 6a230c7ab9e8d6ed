use std::fmt;

use serde::{Deserialize, Serialize};

use crate::drivers::SampleWindow;
/// Time-domain statistics computed per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Mav,
    Rms,
    Var,
    Wl,
    Zc,
    Ssc,
}
impl FeatureKind {
    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::Mav => "MAV",
            FeatureKind::Rms => "RMS",
            FeatureKind::Var => "VAR",
            FeatureKind::Wl => "WL",
            FeatureKind::Zc => "ZC",
            FeatureKind::Ssc => "SSC",
        }
    }
}
impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
/// How MAV treats the sample values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MavConvention {
    /// Mean of the values as they are; suits DC-biased raw ADC input.
    #[default]
    Raw,
    /// Mean of absolute values; suits signed, zero-centered input.
    Absolute,
}
/// Level that zero-crossings are counted against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingReference {
    Zero,
    #[default]
    WindowMean,
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Per-channel order. Part of every classifier's parameter contract.
    pub layout: Vec<FeatureKind>,
    pub mav: MavConvention,
    pub crossing_reference: CrossingReference,
    /// Minimum |x[i] - x[i+1]| for a sign change to count as a zero-crossing.
    pub zero_crossing_threshold: f32,
}
impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            layout: vec![
                FeatureKind::Mav,
                FeatureKind::Rms,
                FeatureKind::Var,
                FeatureKind::Wl,
                FeatureKind::Zc,
                FeatureKind::Ssc,
            ],
            mav: MavConvention::Raw,
            crossing_reference: CrossingReference::WindowMean,
            zero_crossing_threshold: 10.0,
        }
    }
}
/// Channel-major feature values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
}
impl FeatureVector {
    pub fn from_values(values: Vec<f32>) -> Self {
        Self { values }
    }
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ChannelStats {
    mav: f32,
    rms: f32,
    var: f32,
    wl: f32,
    zc: f32,
    ssc: f32,
}
impl ChannelStats {
    fn get(&self, kind: FeatureKind) -> f32 {
        match kind {
            FeatureKind::Mav => self.mav,
            FeatureKind::Rms => self.rms,
            FeatureKind::Var => self.var,
            FeatureKind::Wl => self.wl,
            FeatureKind::Zc => self.zc,
            FeatureKind::Ssc => self.ssc,
        }
    }
}
/// Stateless windowed feature computation.
pub struct FeatureExtractor {
    settings: FeatureSettings,
    num_channels: usize,
}
impl FeatureExtractor {
    pub fn new(settings: FeatureSettings, num_channels: usize) -> Self {
        Self {
            settings,
            num_channels,
        }
    }
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }
    pub fn layout(&self) -> &[FeatureKind] {
        &self.settings.layout
    }
    pub fn features_per_channel(&self) -> usize {
        self.settings.layout.len()
    }
    pub fn feature_count(&self) -> usize {
        self.num_channels * self.features_per_channel()
    }
    /// Position of `kind` for `channel` inside the flat vector.
    pub fn index_of(&self, channel: usize, kind: FeatureKind) -> Option<usize> {
        if channel >= self.num_channels {
            return None;
        }
        let pos = self.settings.layout.iter().position(|k| *k == kind)?;
        Some(channel * self.features_per_channel() + pos)
    }
    pub fn extract(&self, window: &SampleWindow) -> FeatureVector {
        let mut out = FeatureVector::default();
        self.extract_into(window, &mut out);
        out
    }
    /// Fills `out` in place; once its capacity is reached no further allocation happens.
    pub fn extract_into(&self, window: &SampleWindow, out: &mut FeatureVector) {
        out.values.clear();
        for ch in 0..self.num_channels {
            let stats = self.channel_stats(window.channel(ch));
            out.values
                .extend(self.settings.layout.iter().map(|kind| stats.get(*kind)));
        }
    }
    fn channel_stats(&self, x: &[f32]) -> ChannelStats {
        let n = x.len();
        if n == 0 {
            return ChannelStats::default();
        }
        let nf = n as f32;
        let mut sum = 0.0f32;
        let mut sum_abs = 0.0f32;
        let mut sum_sq = 0.0f32;
        let mut wl = 0.0f32;
        for (i, &v) in x.iter().enumerate() {
            sum += v;
            sum_abs += v.abs();
            sum_sq += v * v;
            if i > 0 {
                wl += (v - x[i - 1]).abs();
            }
        }
        let mean = sum / nf;
        let reference = match self.settings.crossing_reference {
            CrossingReference::Zero => 0.0,
            CrossingReference::WindowMean => mean,
        };
        let mut dev_sq = 0.0f32;
        let mut zc = 0u32;
        let mut ssc = 0u32;
        for i in 0..n {
            let d = x[i] - mean;
            dev_sq += d * d;
            if i + 1 < n {
                let a = x[i] - reference;
                let b = x[i + 1] - reference;
                if a * b < 0.0 && (x[i] - x[i + 1]).abs() > self.settings.zero_crossing_threshold {
                    zc += 1;
                }
                if i > 0 && (x[i] - x[i - 1]) * (x[i] - x[i + 1]) > 0.0 {
                    ssc += 1;
                }
            }
        }
        ChannelStats {
            mav: match self.settings.mav {
                MavConvention::Raw => mean,
                MavConvention::Absolute => sum_abs / nf,
            },
            rms: (sum_sq / nf).sqrt(),
            var: if n > 1 { dev_sq / nf } else { 0.0 },
            wl,
            zc: zc as f32,
            ssc: ssc as f32,
        }
    }
}
