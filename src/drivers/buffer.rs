use crate::drivers::PipelineError;
use crate::types::{RawSample, MAX_CHANNELS};
/// Fixed-capacity circular store. Pushing into a full buffer overwrites the oldest entry.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    data: Vec<T>,
    head: usize, // next write slot
    len: usize,
}
impl<T: Copy + Default> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity.max(1)],
            head: 0,
            len: 0,
        }
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }
    /// Returns the evicted value when the buffer was already full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = self.is_full().then(|| self.data[self.head]);
        self.data[self.head] = value;
        self.head = (self.head + 1) % self.data.len();
        if !self.is_full() {
            self.len += 1;
        }
        evicted
    }
    pub fn newest(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let idx = (self.head + self.data.len() - 1) % self.data.len();
        Some(self.data[idx])
    }
    /// Last `n` values (clamped to the stored count), oldest first.
    pub fn iter_last(&self, n: usize) -> impl Iterator<Item = T> + '_ {
        let n = n.min(self.len);
        let cap = self.data.len();
        let start = (self.head + cap - n) % cap;
        (0..n).map(move |i| self.data[(start + i) % cap])
    }
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
/// Last N samples per channel, oldest first, as floating point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleWindow {
    channels: Vec<Vec<f32>>, // channel -> samples
}
impl SampleWindow {
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Self {
        Self { channels }
    }
    pub fn with_shape(num_channels: usize, len: usize) -> Self {
        Self {
            channels: (0..num_channels).map(|_| Vec::with_capacity(len)).collect(),
        }
    }
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
    pub fn len(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn channel(&self, idx: usize) -> &[f32] {
        self.channels.get(idx).map(|c| c.as_slice()).unwrap_or(&[])
    }
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }
}
/// Per-channel ring buffers fed once per sampling tick.
pub struct SampleRing {
    per_channel: Vec<RingBuffer<u16>>,
    window_len: usize,
    step: usize,
    adc_max: u16,
    since_reset: u64,
    since_window: usize,
    latest: Option<RawSample>,
}
impl SampleRing {
    /// `history_len` lets the buffers keep more than one window; it is raised to at least `window_len`.
    pub fn new(
        num_channels: usize,
        window_len: usize,
        step: usize,
        history_len: usize,
        adc_bits: u8,
    ) -> Result<Self, PipelineError> {
        if num_channels == 0 || num_channels > MAX_CHANNELS {
            return Err(PipelineError::UnsupportedChannelCount(num_channels));
        }
        if window_len < 2 || step == 0 || step > window_len {
            return Err(PipelineError::InvalidWindow {
                window: window_len,
                step,
            });
        }
        let capacity = history_len.max(window_len);
        Ok(Self {
            per_channel: (0..num_channels)
                .map(|_| RingBuffer::with_capacity(capacity))
                .collect(),
            window_len,
            step,
            adc_max: adc_max(adc_bits),
            since_reset: 0,
            since_window: 0,
            latest: None,
        })
    }
    pub fn num_channels(&self) -> usize {
        self.per_channel.len()
    }
    pub fn window_len(&self) -> usize {
        self.window_len
    }
    /// Rejects the whole tick if the channel count is wrong or any value is outside the ADC range.
    pub fn push_sample(&mut self, values: &[u16]) -> Result<(), PipelineError> {
        if values.len() != self.per_channel.len() {
            return Err(PipelineError::ChannelMismatch {
                expected: self.per_channel.len(),
                actual: values.len(),
            });
        }
        if let Some((channel, &value)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| **v > self.adc_max)
        {
            return Err(PipelineError::SampleOutOfRange {
                channel,
                value,
                max: self.adc_max,
            });
        }
        for (ring, &value) in self.per_channel.iter_mut().zip(values) {
            ring.push(value);
        }
        self.since_reset += 1;
        self.since_window = self.since_window.saturating_add(1);
        self.latest = Some(RawSample::from_slice(values));
        Ok(())
    }
    pub fn has_full_window(&self) -> bool {
        self.since_reset >= self.window_len as u64
    }
    /// True once a full window exists and `step` samples arrived since the last window was taken.
    pub fn window_due(&self) -> bool {
        self.has_full_window() && self.since_window >= self.step
    }
    pub fn snapshot_window(&self) -> Option<SampleWindow> {
        let mut window = SampleWindow::with_shape(self.per_channel.len(), self.window_len);
        self.snapshot_into(&mut window).then_some(window)
    }
    /// Copies the last window into `window`, reusing its allocations.
    pub fn snapshot_into(&self, window: &mut SampleWindow) -> bool {
        if !self.has_full_window() {
            return false;
        }
        window.channels.resize_with(self.per_channel.len(), Vec::new);
        for (dst, ring) in window.channels.iter_mut().zip(&self.per_channel) {
            dst.clear();
            dst.extend(ring.iter_last(self.window_len).map(f32::from));
        }
        true
    }
    /// Snapshot that also restarts the step counter; returns false when no window is due.
    pub fn take_window(&mut self, window: &mut SampleWindow) -> bool {
        if !self.window_due() {
            return false;
        }
        self.since_window = 0;
        self.snapshot_into(window)
    }
    pub fn latest(&self) -> Option<&RawSample> {
        self.latest.as_ref()
    }
    pub fn samples_since_reset(&self) -> u64 {
        self.since_reset
    }
    pub fn reset(&mut self) {
        for ring in &mut self.per_channel {
            ring.clear();
        }
        self.since_reset = 0;
        self.since_window = 0;
        self.latest = None;
    }
}
pub fn adc_max(adc_bits: u8) -> u16 {
    if adc_bits >= 16 {
        u16::MAX
    } else {
        (1u16 << adc_bits) - 1
    }
}
