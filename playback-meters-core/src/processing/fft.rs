//! Windowed FFT spectrum analysis with temporal smoothing.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

/// Magnitude below which a bin reads as the dB floor.
pub const NOISE_FLOOR: f32 = 1e-10;
/// dB value reported for silent bins.
pub const MIN_DB: f32 = -100.0;

pub const DEFAULT_FFT_SIZE: usize = 4096;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Analysis window applied to the input block before transforming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    None,
    #[default]
    Hann,
    Hamming,
    Blackman,
}

impl WindowType {
    /// Coefficient at normalized position `x = i / (N - 1)`.
    pub fn coefficient(self, x: f32) -> f32 {
        match self {
            Self::None => 1.0,
            Self::Hann => 0.5 * (1.0 - (2.0 * PI * x).cos()),
            Self::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
            Self::Blackman => 0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos(),
        }
    }
}

/// Pull-based spectrum analyzer.
///
/// Each [`process`](Self::process) call transforms one block and blends the
/// new magnitudes into the previous ones. Not meant for concurrent use; every
/// consumer owns its own instance.
pub struct FftProcessor {
    fft_size: usize,
    sample_rate: u32,
    window_type: WindowType,
    smoothing: f32,
    plan: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    magnitudes_db: Vec<f32>,
}

impl FftProcessor {
    /// Sizes that are not a power of two round up to the next one.
    pub fn new(fft_size: usize) -> Self {
        let mut processor = Self {
            fft_size: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            window_type: WindowType::Hann,
            smoothing: 0.8,
            plan: FftPlanner::new().plan_fft_forward(1),
            window: Vec::new(),
            spectrum: Vec::new(),
            scratch: Vec::new(),
            magnitudes: Vec::new(),
            magnitudes_db: Vec::new(),
        };
        processor.set_fft_size(fft_size);
        processor
    }

    /// Re-plans the transform and reallocates every derived buffer. Previous
    /// magnitudes are discarded.
    ///
    /// The size is rounded up to a power of two (at least 2).
    pub fn set_fft_size(&mut self, requested: usize) {
        let fft_size = requested.max(2).next_power_of_two();
        if fft_size != requested {
            log::debug!("fft size {} rounded up to {}", requested, fft_size);
        }

        self.fft_size = fft_size;
        self.plan = FftPlanner::new().plan_fft_forward(fft_size);
        self.spectrum = vec![Complex::new(0.0, 0.0); fft_size];
        self.scratch = vec![Complex::new(0.0, 0.0); self.plan.get_inplace_scratch_len()];
        self.magnitudes = vec![0.0; fft_size / 2];
        self.magnitudes_db = vec![MIN_DB; fft_size / 2];
        self.compute_window();
    }

    /// Recomputes window coefficients only.
    pub fn set_window_type(&mut self, window_type: WindowType) {
        self.window_type = window_type;
        self.compute_window();
    }

    /// 0.0 = no smoothing, 1.0 = frozen spectrum.
    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 1.0);
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    /// Transforms the first `fft_size` samples of `samples` (zero-padding a
    /// short block) and updates the smoothed magnitude and dB spectra.
    pub fn process(&mut self, samples: &[f32]) {
        let copy_count = samples.len().min(self.fft_size);

        for (i, bin) in self.spectrum.iter_mut().enumerate() {
            let value = if i < copy_count {
                samples[i] * self.window[i]
            } else {
                0.0
            };
            *bin = Complex::new(value, 0.0);
        }

        self.plan
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let scale = 2.0 / self.fft_size as f32;
        let smoothing = self.smoothing;

        for ((bin, mag), db) in self
            .spectrum
            .iter()
            .zip(self.magnitudes.iter_mut())
            .zip(self.magnitudes_db.iter_mut())
        {
            let fresh = bin.norm() * scale;
            let smoothed = *mag * smoothing + fresh * (1.0 - smoothing);
            *mag = smoothed;
            *db = magnitude_to_db(smoothed);
        }
    }

    /// Smoothed linear magnitude; 0.0 outside the bin range.
    pub fn magnitude(&self, bin: usize) -> f32 {
        self.magnitudes.get(bin).copied().unwrap_or(0.0)
    }

    /// Smoothed magnitude in dB; the floor outside the bin range.
    pub fn magnitude_db(&self, bin: usize) -> f32 {
        self.magnitudes_db.get(bin).copied().unwrap_or(MIN_DB)
    }

    /// Center frequency of `bin` in Hz.
    pub fn frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.fft_size as f32
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    pub fn magnitudes_db(&self) -> &[f32] {
        &self.magnitudes_db
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    /// Power-averaged magnitude of the bins covering `[freq_start, freq_end)`,
    /// in dB. A range narrower than one bin reads the bin it starts in.
    pub fn band_magnitude_db(&self, freq_start: f32, freq_end: f32) -> f32 {
        let bin_count = self.bin_count();
        let bin_width = self.sample_rate as f32 / self.fft_size as f32;

        let start = ((freq_start.max(0.0) / bin_width) as usize).min(bin_count - 1);
        let end = ((freq_end.max(0.0) / bin_width) as usize)
            .min(bin_count)
            .max(start + 1);

        let power: f32 = self.magnitudes[start..end].iter().map(|mag| mag * mag).sum();
        magnitude_to_db((power / (end - start) as f32).sqrt())
    }

    /// Index of the loudest bin, skipping DC.
    pub fn peak_bin(&self) -> Option<usize> {
        self.magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .filter(|&(_, &mag)| mag > NOISE_FLOOR)
            .map(|(bin, _)| bin)
    }

    fn compute_window(&mut self) {
        let denom = (self.fft_size - 1) as f32;
        let window_type = self.window_type;
        self.window = (0..self.fft_size)
            .map(|i| window_type.coefficient(i as f32 / denom))
            .collect();
    }
}

impl Default for FftProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}

fn magnitude_to_db(magnitude: f32) -> f32 {
    if magnitude > NOISE_FLOOR {
        (20.0 * magnitude.log10()).max(MIN_DB)
    } else {
        MIN_DB
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn silence_stays_at_floor() {
        let mut fft = FftProcessor::new(1024);
        fft.process(&vec![0.0; 1024]);

        assert!(fft.magnitudes_db().iter().all(|&db| db == MIN_DB));
        assert!(fft.magnitudes().iter().all(|&m| m == 0.0));
        assert_eq!(fft.peak_bin(), None);
    }

    #[test]
    fn sine_peaks_within_one_bin() {
        for &(size, freq) in &[(1024usize, 1000.0f32), (2048, 440.0), (4096, 5_000.0)] {
            let mut fft = FftProcessor::new(size);
            fft.set_sample_rate(48_000);
            fft.set_window_type(WindowType::Hann);
            fft.set_smoothing(0.0);
            fft.process(&sine(freq, 48_000, size, 1.0));

            let peak = fft.peak_bin().unwrap();
            let bin_width = fft.frequency(1);
            assert!(
                (fft.frequency(peak) - freq).abs() <= bin_width,
                "size {size}: peak at {} Hz, expected {freq} Hz",
                fft.frequency(peak)
            );
        }
    }

    #[test]
    fn unwindowed_bin_centered_sine_has_unit_magnitude() {
        let mut fft = FftProcessor::new(1024);
        fft.set_window_type(WindowType::None);
        fft.set_smoothing(0.0);
        // Exactly bin 32 at 48 kHz.
        let freq = fft.frequency(32);
        fft.process(&sine(freq, 48_000, 1024, 1.0));

        assert_abs_diff_eq!(fft.magnitude(32), 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(fft.magnitude_db(32), 0.0, epsilon = 0.01);
    }

    #[test]
    fn smoothing_blends_with_previous_frame() {
        let mut fft = FftProcessor::new(1024);
        fft.set_window_type(WindowType::None);
        fft.set_smoothing(0.5);
        let block = sine(fft.frequency(16), 48_000, 1024, 1.0);

        fft.process(&block);
        let first = fft.magnitude(16);
        fft.process(&block);
        let second = fft.magnitude(16);

        assert_abs_diff_eq!(first, 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(second, 0.75, epsilon = 1e-3);
    }

    #[test]
    fn short_block_is_zero_padded() {
        let mut fft = FftProcessor::new(1024);
        fft.process(&[0.0; 10]);
        assert!(fft.magnitudes_db().iter().all(|&db| db == MIN_DB));
    }

    #[test]
    fn resize_reallocates_bins() {
        let mut fft = FftProcessor::new(1024);
        fft.set_fft_size(2048);
        assert_eq!(fft.bin_count(), 1024);
        assert_eq!(fft.magnitudes().len(), 1024);
        assert_eq!(fft.magnitudes_db().len(), 1024);
    }

    #[test]
    fn odd_sizes_round_up_to_a_power_of_two() {
        let mut fft = FftProcessor::new(1000);
        assert_eq!(fft.fft_size(), 1024);

        fft.set_fft_size(3000);
        assert_eq!(fft.fft_size(), 4096);
        assert_eq!(fft.bin_count(), 2048);

        fft.set_fft_size(0);
        assert_eq!(fft.fft_size(), 2);
        fft.process(&[0.5, 0.5, 0.5]);
    }

    #[test]
    fn band_magnitude_covers_the_tone() {
        let mut fft = FftProcessor::new(4096);
        fft.set_smoothing(0.0);
        fft.process(&sine(1_000.0, 48_000, 4096, 1.0));

        assert!(fft.band_magnitude_db(900.0, 1_100.0) > fft.band_magnitude_db(8_000.0, 9_000.0) + 40.0);
        assert!(fft.band_magnitude_db(1_000.0, 1_000.0) > MIN_DB);
        assert_abs_diff_eq!(
            fft.band_magnitude_db(30_000.0, 40_000.0),
            fft.magnitude_db(fft.bin_count() - 1),
            epsilon = 1e-3
        );
    }

    #[test]
    fn out_of_range_bins_read_as_floor() {
        let fft = FftProcessor::new(1024);
        assert_eq!(fft.magnitude(10_000), 0.0);
        assert_eq!(fft.magnitude_db(10_000), MIN_DB);
    }

    #[test]
    fn frequency_of_bin() {
        let mut fft = FftProcessor::new(4096);
        fft.set_sample_rate(48_000);
        assert_abs_diff_eq!(fft.frequency(1), 11.71875);
        assert_abs_diff_eq!(fft.frequency(2048), 24_000.0);
    }

    #[test]
    fn window_endpoints() {
        assert_abs_diff_eq!(WindowType::Hann.coefficient(0.0), 0.0);
        assert_abs_diff_eq!(WindowType::Hann.coefficient(0.5), 1.0);
        assert_abs_diff_eq!(WindowType::Hamming.coefficient(0.0), 0.08, epsilon = 1e-6);
        assert_abs_diff_eq!(WindowType::Blackman.coefficient(0.0), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(WindowType::None.coefficient(0.3), 1.0);
    }
}
