use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::drivers::buffer::adc_max;
use crate::drivers::PipelineError;
use crate::types::{RawSample, MAX_CHANNELS};
/// Anything that can yield blocks of consecutive samples on demand.
/// `Ok(None)` is end of stream; an empty block means nothing arrived yet.
pub trait SampleSource {
    fn next_block(&mut self) -> Result<Option<Vec<RawSample>>, PipelineError>;
}
/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Vec<RawSample>>,
}
impl ManualSource {
    pub fn new(blocks: impl IntoIterator<Item = Vec<RawSample>>) -> Self {
        Self {
            queue: blocks.into_iter().collect(),
        }
    }
    /// Splits a flat run of ticks into blocks of `block_len`.
    pub fn from_ticks(ticks: &[Vec<u16>], block_len: usize) -> Self {
        Self::new(
            ticks
                .chunks(block_len.max(1))
                .map(|chunk| chunk.iter().map(|t| RawSample::from_slice(t)).collect()),
        )
    }
}
impl SampleSource for ManualSource {
    fn next_block(&mut self) -> Result<Option<Vec<RawSample>>, PipelineError> {
        Ok(self.queue.pop_front())
    }
}
/// Constant offset added to one channel for a time span.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Burst {
    pub channel: usize,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub amplitude: f32,
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub rest_level: f32,
    /// Peak uniform noise around the rest level.
    pub noise: f32,
    /// Relative random jitter applied to burst amplitude per sample.
    pub burst_jitter: f32,
    pub bursts: Vec<Burst>,
    pub block_ms: u64,
    /// Sleep between blocks so samples arrive at the nominal rate.
    pub realtime: bool,
    pub seed: u64,
    /// Ends the stream after this long.
    pub duration_ms: Option<u64>,
}
impl Default for SimulationSettings {
    fn default() -> Self {
        let burst = |channel, start_ms, amplitude| Burst {
            channel,
            start_ms,
            duration_ms: 1500,
            amplitude,
        };
        Self {
            rest_level: 800.0,
            noise: 20.0,
            burst_jitter: 0.1,
            bursts: vec![burst(0, 2000, 320.0), burst(2, 5000, 320.0), burst(1, 8000, 300.0)],
            block_ms: 10,
            realtime: true,
            seed: 7,
            duration_ms: None,
        }
    }
}
/// Rest-level noise with scripted per-channel bursts.
pub struct SimulatedSource {
    settings: SimulationSettings,
    rate_hz: u32,
    num_channels: usize,
    adc_max: u16,
    tick: u64,
    rng: StdRng,
}
impl SimulatedSource {
    pub fn new(
        settings: SimulationSettings,
        rate_hz: u32,
        num_channels: usize,
        adc_bits: u8,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            rate_hz: rate_hz.max(1),
            num_channels: num_channels.min(MAX_CHANNELS),
            adc_max: adc_max(adc_bits),
            tick: 0,
        }
    }
    fn now_ms(&self) -> u64 {
        self.tick * 1000 / u64::from(self.rate_hz)
    }
    fn sample(&mut self) -> RawSample {
        let now = self.now_ms();
        let mut values = [0u16; MAX_CHANNELS];
        for (ch, slot) in values.iter_mut().enumerate().take(self.num_channels) {
            let mut level = self.settings.rest_level;
            if self.settings.noise > 0.0 {
                level += self.rng.gen_range(-self.settings.noise..=self.settings.noise);
            }
            for burst in &self.settings.bursts {
                let span = burst.start_ms..burst.start_ms + burst.duration_ms;
                if burst.channel == ch && span.contains(&now) {
                    let jitter = if self.settings.burst_jitter > 0.0 {
                        let j = self.settings.burst_jitter;
                        self.rng.gen_range(-j..=j)
                    } else {
                        0.0
                    };
                    level += burst.amplitude * (1.0 + jitter);
                }
            }
            *slot = level.round().clamp(0.0, f32::from(self.adc_max)) as u16;
        }
        self.tick += 1;
        RawSample::from_slice(&values[..self.num_channels])
    }
}
impl SampleSource for SimulatedSource {
    fn next_block(&mut self) -> Result<Option<Vec<RawSample>>, PipelineError> {
        if let Some(limit) = self.settings.duration_ms {
            if self.now_ms() >= limit {
                return Ok(None);
            }
        }
        let block_len = (u64::from(self.rate_hz) * self.settings.block_ms.max(1) / 1000).max(1);
        let block = (0..block_len).map(|_| self.sample()).collect();
        if self.settings.realtime {
            thread::sleep(Duration::from_millis(self.settings.block_ms.max(1)));
        }
        Ok(Some(block))
    }
}
/// Parses `>CH1:a,CH2:b,...` plotter lines and `DATA,ts,a,b,...[,label]` capture lines.
pub fn parse_line(line: &str, num_channels: usize) -> Option<RawSample> {
    let line = line.trim();
    let num_channels = num_channels.min(MAX_CHANNELS);
    let mut values = [0u16; MAX_CHANNELS];
    if let Some(body) = line.strip_prefix('>') {
        let mut seen = 0;
        for field in body.split(',') {
            let (key, value) = field.split_once(':')?;
            let Some(idx) = key.trim().strip_prefix("CH").and_then(|n| n.parse::<usize>().ok())
            else {
                // envelope/angle fields ride along on the same line
                continue;
            };
            if idx == 0 || idx > num_channels {
                continue;
            }
            values[idx - 1] = value.trim().parse().ok()?;
            seen += 1;
        }
        return (seen == num_channels).then(|| RawSample::from_slice(&values[..num_channels]));
    }
    if let Some(body) = line.strip_prefix("DATA,") {
        let mut fields = body.split(',');
        fields.next()?; // timestamp
        for slot in values.iter_mut().take(num_channels) {
            *slot = fields.next()?.trim().parse().ok()?;
        }
        return Some(RawSample::from_slice(&values[..num_channels]));
    }
    None
}
/// Line-oriented sample stream from a microcontroller.
pub struct SerialSource<R> {
    reader: R,
    num_channels: usize,
    block_len: usize,
    line: String,
}
impl SerialSource<BufReader<Box<dyn serialport::SerialPort>>> {
    pub fn open(path: &str, baud: u32, num_channels: usize) -> Result<Self, PipelineError> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(100))
            .open()?;
        info!("opened {path} at {baud} baud");
        Ok(Self::from_reader(BufReader::new(port), num_channels))
    }
}
impl<R: BufRead> SerialSource<R> {
    pub fn from_reader(reader: R, num_channels: usize) -> Self {
        Self {
            reader,
            num_channels,
            block_len: 32,
            line: String::new(),
        }
    }
}
impl<R: BufRead> SerialSource<R> {
    /// Parses and clears the buffered line.
    fn take_line(&mut self, block: &mut Vec<RawSample>) {
        match parse_line(&self.line, self.num_channels) {
            Some(sample) => block.push(sample),
            None => debug!("skipping line {:?}", self.line.trim_end()),
        }
        self.line.clear();
    }
}
impl<R: BufRead> SampleSource for SerialSource<R> {
    /// A line cut short by a read timeout stays buffered and is completed by the next call.
    fn next_block(&mut self) -> Result<Option<Vec<RawSample>>, PipelineError> {
        let mut block = Vec::with_capacity(self.block_len);
        while block.len() < self.block_len {
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    if !self.line.is_empty() {
                        self.take_line(&mut block);
                    }
                    if block.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
                // no newline means end of stream; the next read returns 0
                Ok(_) if !self.line.ends_with('\n') => {}
                Ok(_) => self.take_line(&mut block),
                Err(err) if err.kind() == ErrorKind::TimedOut => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Some(block))
    }
}
struct Slot {
    block: Vec<RawSample>,
    ready: bool,
}
/// Single-slot exchange between the sampling thread and the control loop.
pub struct SampleHandoff {
    slot: Mutex<Slot>,
    signal: Condvar,
    closed: AtomicBool,
    overruns: AtomicU64,
}
impl Default for SampleHandoff {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                block: Vec::new(),
                ready: false,
            }),
            signal: Condvar::new(),
            closed: AtomicBool::new(false),
            overruns: AtomicU64::new(0),
        }
    }
}
impl SampleHandoff {
    pub fn new() -> Self {
        Self::default()
    }
    /// Returns true when an undrained block was overwritten.
    pub fn publish(&self, block: &[RawSample]) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let overrun = slot.ready;
        if overrun {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        slot.block.clear();
        slot.block.extend_from_slice(block);
        slot.ready = true;
        self.signal.notify_one();
        overrun
    }
    /// Drains the slot into `out` and clears the ready flag under one lock.
    pub fn take_into(&self, out: &mut Vec<RawSample>) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        Self::drain(&mut slot, out)
    }
    /// Like `take_into`, waiting up to `timeout` for a block.
    pub fn wait_take_into(&self, out: &mut Vec<RawSample>, timeout: Duration) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut slot, _) = self
            .signal
            .wait_timeout_while(slot, timeout, |s| !s.ready && !self.is_closed())
            .unwrap_or_else(PoisonError::into_inner);
        Self::drain(&mut slot, out)
    }
    fn drain(slot: &mut Slot, out: &mut Vec<RawSample>) -> bool {
        if !slot.ready {
            return false;
        }
        out.clear();
        std::mem::swap(&mut slot.block, out);
        slot.ready = false;
        true
    }
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.signal.notify_all();
    }
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}
