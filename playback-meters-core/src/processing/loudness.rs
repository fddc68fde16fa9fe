//! Level estimators: stateless peak/RMS over a block and a streaming
//! LUFS-style loudness meter.
//!
//! The loudness meter follows the BS.1770 block structure (100 ms blocks,
//! 400 ms momentary and 3 s short-term windows, −0.691 offset) but squares the
//! raw signal: no K-weighting pre-filter and only the absolute −70 gate.

use std::collections::VecDeque;

use crate::processing::fft::{MIN_DB, NOISE_FLOOR};

/// Blocks per momentary window (400 ms).
pub const MOMENTARY_BLOCKS: usize = 4;
/// Blocks per short-term window (3 s).
pub const SHORT_TERM_BLOCKS: usize = 30;
/// Absolute gate for the integrated measurement.
pub const ABSOLUTE_GATE_LUFS: f32 = -70.0;

const LOUDNESS_OFFSET: f64 = -0.691;

/// Largest absolute sample value.
pub fn calculate_peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

pub fn calculate_peak_db(samples: &[f32]) -> f32 {
    amplitude_to_db(calculate_peak(samples))
}

/// Root mean square; 0.0 for an empty block.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

pub fn calculate_rms_db(samples: &[f32]) -> f32 {
    amplitude_to_db(calculate_rms(samples))
}

/// `20 * log10(amplitude)`, floored at −100 dB.
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude < NOISE_FLOOR {
        return MIN_DB;
    }
    (20.0 * amplitude.log10()).max(MIN_DB)
}

fn mean_square_to_lufs(mean_square: f64) -> f32 {
    (LOUDNESS_OFFSET + 10.0 * mean_square.log10()) as f32
}

fn window_loudness(window: &VecDeque<f64>) -> f32 {
    if window.is_empty() {
        return MIN_DB;
    }
    let avg = window.iter().sum::<f64>() / window.len() as f64;
    if avg > NOISE_FLOOR as f64 {
        mean_square_to_lufs(avg)
    } else {
        MIN_DB
    }
}

/// Streaming momentary / short-term / integrated loudness.
#[derive(Debug, Clone)]
pub struct LufsMeter {
    sample_rate: u32,
    block_frames: usize,

    momentary_window: VecDeque<f64>,
    short_term_window: VecDeque<f64>,
    integrated_sum: f64,
    integrated_count: u64,

    momentary: f32,
    short_term: f32,
    integrated: f32,

    block_len: usize,
    block_sum_left: f64,
    block_sum_right: f64,
}

impl LufsMeter {
    pub fn new(sample_rate: u32) -> Self {
        let mut meter = Self {
            sample_rate,
            block_frames: Self::block_frames_for(sample_rate),
            momentary_window: VecDeque::with_capacity(MOMENTARY_BLOCKS + 1),
            short_term_window: VecDeque::with_capacity(SHORT_TERM_BLOCKS + 1),
            integrated_sum: 0.0,
            integrated_count: 0,
            momentary: MIN_DB,
            short_term: MIN_DB,
            integrated: MIN_DB,
            block_len: 0,
            block_sum_left: 0.0,
            block_sum_right: 0.0,
        };
        meter.reset();
        meter
    }

    /// Changing the rate restarts the measurement.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.block_frames = Self::block_frames_for(sample_rate);
        self.reset();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Back to the silence state: empty windows, −100 on every reading.
    pub fn reset(&mut self) {
        self.momentary_window.clear();
        self.short_term_window.clear();
        self.integrated_sum = 0.0;
        self.integrated_count = 0;
        self.momentary = MIN_DB;
        self.short_term = MIN_DB;
        self.integrated = MIN_DB;
        self.block_len = 0;
        self.block_sum_left = 0.0;
        self.block_sum_right = 0.0;
    }

    /// Feeds interleaved stereo `[L0, R0, L1, R1, ...]`.
    pub fn process(&mut self, stereo: &[f32]) {
        self.process_interleaved(stereo, 2);
    }

    /// Feeds interleaved frames of any width. Only the first two channels are
    /// measured; a mono stream counts as identical left and right.
    pub fn process_interleaved(&mut self, samples: &[f32], channels: usize) {
        if channels == 0 {
            return;
        }

        for frame in samples.chunks_exact(channels) {
            let left = frame[0] as f64;
            let right = if channels >= 2 { frame[1] as f64 } else { left };

            self.block_sum_left += left * left;
            self.block_sum_right += right * right;
            self.block_len += 1;

            if self.block_len >= self.block_frames {
                self.finish_block();
            }
        }
    }

    /// 400 ms window.
    pub fn momentary(&self) -> f32 {
        self.momentary
    }

    /// 3 s window.
    pub fn short_term(&self) -> f32 {
        self.short_term
    }

    /// Everything since the last reset, gated at −70.
    pub fn integrated(&self) -> f32 {
        self.integrated
    }

    fn block_frames_for(sample_rate: u32) -> usize {
        (sample_rate as usize / 10).max(1)
    }

    fn finish_block(&mut self) {
        let mean_square =
            (self.block_sum_left + self.block_sum_right) / (2.0 * self.block_len as f64);

        push_capped(&mut self.momentary_window, mean_square, MOMENTARY_BLOCKS);
        push_capped(&mut self.short_term_window, mean_square, SHORT_TERM_BLOCKS);

        self.momentary = window_loudness(&self.momentary_window);
        self.short_term = window_loudness(&self.short_term_window);

        let block_loudness = mean_square_to_lufs(mean_square + NOISE_FLOOR as f64);
        if block_loudness > ABSOLUTE_GATE_LUFS {
            self.integrated_sum += mean_square;
            self.integrated_count += 1;
            self.integrated =
                mean_square_to_lufs(self.integrated_sum / self.integrated_count as f64);
        }

        self.block_len = 0;
        self.block_sum_left = 0.0;
        self.block_sum_right = 0.0;
    }
}

impl Default for LufsMeter {
    fn default() -> Self {
        Self::new(48_000)
    }
}

fn push_capped(window: &mut VecDeque<f64>, value: f64, cap: usize) {
    window.push_back(value);
    while window.len() > cap {
        window.pop_front();
    }
}
