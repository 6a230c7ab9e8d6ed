use std::sync::Arc;

use rustfft::{num_complex::Complex32, Fft, FftPlanner};
/// Power-spectrum summary of one channel window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpectralSummary {
    pub mean_hz: f32,
    pub median_hz: f32,
}
/// Mean/median power frequency over a fixed FFT size, reusing its plan and buffers.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    sample_rate_hz: f32,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
    power: Vec<f32>,
}
impl SpectrumAnalyzer {
    pub fn new(fft_size: usize, sample_rate_hz: f32) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex32::ZERO; fft.get_inplace_scratch_len()];
        Self {
            fft,
            fft_size,
            sample_rate_hz,
            buffer: vec![Complex32::ZERO; fft_size],
            scratch,
            power: Vec::with_capacity(fft_size / 2),
        }
    }
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate_hz / self.fft_size as f32
    }
    /// Uses the most recent `fft_size` samples (zero-padded when shorter), DC removed.
    pub fn summarize(&mut self, samples: &[f32]) -> SpectralSummary {
        let tail = &samples[samples.len().saturating_sub(self.fft_size)..];
        if tail.is_empty() {
            return SpectralSummary::default();
        }
        let mean = tail.iter().sum::<f32>() / tail.len() as f32;
        for (dst, v) in self.buffer.iter_mut().zip(tail.iter().chain(std::iter::repeat(&mean))) {
            *dst = Complex32::new(v - mean, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        self.power.clear();
        self.power
            .extend(self.buffer[..self.fft_size / 2].iter().map(|c| c.norm_sqr()));
        self.power[0] = 0.0;
        let total: f32 = self.power.iter().sum();
        if total <= f32::EPSILON {
            return SpectralSummary::default();
        }
        let bin_hz = self.bin_hz();
        let weighted: f32 = self
            .power
            .iter()
            .enumerate()
            .map(|(k, p)| k as f32 * bin_hz * p)
            .sum();
        let mut cumulative = 0.0;
        let mut median_bin = 0;
        for (k, p) in self.power.iter().enumerate() {
            cumulative += p;
            if cumulative >= total / 2.0 {
                median_bin = k;
                break;
            }
        }
        SpectralSummary {
            mean_hz: weighted / total,
            median_hz: median_bin as f32 * bin_hz,
        }
    }
}
