use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::meters::slide_window;
use crate::models::config::EngineConfig;
use crate::processing::fft::{FftProcessor, WindowType};
use crate::processing::notes::freq_to_note_string;
use crate::traits::meter::Meter;

/// Lowest frequency on the display axis.
pub const MIN_DISPLAY_HZ: f32 = 20.0;
/// Highest frequency on the display axis.
pub const MAX_DISPLAY_HZ: f32 = 20_000.0;

/// Signal the spectrum is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumChannel {
    #[default]
    Left,
    Right,
    /// (L + R) / 2
    Mid,
    /// (L − R) / 2
    Side,
}

impl SpectrumChannel {
    /// The selected signal for one left/right pair.
    pub fn select(self, left: f32, right: f32) -> f32 {
        match self {
            SpectrumChannel::Left => left,
            SpectrumChannel::Right => right,
            SpectrumChannel::Mid => (left + right) * 0.5,
            SpectrumChannel::Side => (left - right) * 0.5,
        }
    }
}

/// Mapping between a normalized axis position and frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumScale {
    Linear,
    #[default]
    Logarithmic,
    Mel,
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

impl SpectrumScale {
    /// Frequency at `pos` in [0, 1] along the 20 Hz–20 kHz axis.
    pub fn position_to_freq(self, pos: f32) -> f32 {
        let pos = pos.clamp(0.0, 1.0);
        match self {
            SpectrumScale::Linear => MIN_DISPLAY_HZ + pos * (MAX_DISPLAY_HZ - MIN_DISPLAY_HZ),
            SpectrumScale::Logarithmic => {
                MIN_DISPLAY_HZ * (MAX_DISPLAY_HZ / MIN_DISPLAY_HZ).powf(pos)
            }
            SpectrumScale::Mel => {
                let (lo, hi) = (hz_to_mel(MIN_DISPLAY_HZ), hz_to_mel(MAX_DISPLAY_HZ));
                mel_to_hz(lo + pos * (hi - lo))
            }
        }
    }

    /// Inverse of [`position_to_freq`](Self::position_to_freq); frequencies
    /// outside the axis clamp to its ends.
    pub fn freq_to_position(self, freq: f32) -> f32 {
        let freq = freq.clamp(MIN_DISPLAY_HZ, MAX_DISPLAY_HZ);
        match self {
            SpectrumScale::Linear => (freq - MIN_DISPLAY_HZ) / (MAX_DISPLAY_HZ - MIN_DISPLAY_HZ),
            SpectrumScale::Logarithmic => {
                (freq / MIN_DISPLAY_HZ).ln() / (MAX_DISPLAY_HZ / MIN_DISPLAY_HZ).ln()
            }
            SpectrumScale::Mel => {
                let (lo, hi) = (hz_to_mel(MIN_DISPLAY_HZ), hz_to_mel(MAX_DISPLAY_HZ));
                (hz_to_mel(freq) - lo) / (hi - lo)
            }
        }
    }
}

/// Loudest bin above DC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumPeak {
    pub frequency: f32,
    pub db: f32,
}

/// FFT spectrum of one channel selection.
///
/// Each update transforms the newest `fft_size` samples, so short tick blocks
/// slide through the analysis window instead of being zero-padded.
pub struct SpectrumMeter {
    fft: FftProcessor,
    channel: SpectrumChannel,
    scale: SpectrumScale,
    input: Vec<f32>,
}

impl SpectrumMeter {
    pub fn new(fft_size: usize, sample_rate: u32) -> Self {
        let mut fft = FftProcessor::new(fft_size);
        fft.set_sample_rate(sample_rate);
        let input = vec![0.0; fft.fft_size()];
        Self {
            fft,
            channel: SpectrumChannel::default(),
            scale: SpectrumScale::default(),
            input,
        }
    }

    /// Size, window and smoothing from the engine configuration.
    pub fn from_config(config: &EngineConfig, sample_rate: u32) -> Self {
        let mut meter = Self::new(config.fft_size, sample_rate);
        meter.fft.set_window_type(config.fft_window);
        meter.fft.set_smoothing(config.fft_smoothing);
        meter
    }

    pub fn set_fft_size(&mut self, fft_size: usize) {
        self.fft.set_fft_size(fft_size);
        self.input = vec![0.0; self.fft.fft_size()];
    }

    pub fn set_window_type(&mut self, window_type: WindowType) {
        self.fft.set_window_type(window_type);
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.fft.set_smoothing(smoothing);
    }

    pub fn channel(&self) -> SpectrumChannel {
        self.channel
    }

    pub fn set_channel(&mut self, channel: SpectrumChannel) {
        self.channel = channel;
    }

    pub fn scale(&self) -> SpectrumScale {
        self.scale
    }

    pub fn set_scale(&mut self, scale: SpectrumScale) {
        self.scale = scale;
    }

    pub fn fft(&self) -> &FftProcessor {
        &self.fft
    }

    pub fn position_to_freq(&self, pos: f32) -> f32 {
        self.scale.position_to_freq(pos)
    }

    pub fn freq_to_position(&self, freq: f32) -> f32 {
        self.scale.freq_to_position(freq)
    }

    /// Power-averaged magnitude of the bins covering `[freq_start, freq_end)`,
    /// in dB.
    pub fn band_magnitude_db(&self, freq_start: f32, freq_end: f32) -> f32 {
        self.fft.band_magnitude_db(freq_start, freq_end)
    }

    pub fn peak(&self) -> Option<SpectrumPeak> {
        self.fft.peak_bin().map(|bin| SpectrumPeak {
            frequency: self.fft.frequency(bin),
            db: self.fft.magnitude_db(bin),
        })
    }

    pub fn dominant_frequency(&self) -> Option<f32> {
        self.peak().map(|p| p.frequency)
    }

    /// Note name of the dominant frequency, e.g. "A4 + 12 Cents"; empty when
    /// there is no usable peak.
    pub fn note_label(&self) -> String {
        self.dominant_frequency()
            .map(freq_to_note_string)
            .unwrap_or_default()
    }
}

impl Meter for SpectrumMeter {
    fn name(&self) -> &str {
        "Spectrum"
    }

    fn update(&mut self, samples: &[f32], frames: usize, channels: u16) {
        let channels = usize::from(channels);
        if channels == 0 {
            return;
        }
        let frames = frames.min(samples.len() / channels);
        if frames == 0 {
            return;
        }

        let selection = self.channel;
        let incoming = samples.chunks_exact(channels).take(frames).map(|frame| {
            let l = frame[0];
            let r = if channels >= 2 { frame[1] } else { l };
            selection.select(l, r)
        });
        slide_window(&mut self.input, incoming);

        self.fft.process(&self.input);
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.fft.set_sample_rate(sample_rate);
    }

    fn reset(&mut self) {
        let size = self.fft.fft_size();
        self.fft.set_fft_size(size);
        self.input.fill(0.0);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::fft::MIN_DB;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::TAU;

    const RATE: u32 = 48_000;

    fn stereo_sines(frames: usize, left_hz: f32, right_hz: f32) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let t = i as f32 / RATE as f32;
                [(TAU * left_hz * t).sin(), (TAU * right_hz * t).sin()]
            })
            .collect()
    }

    fn unsmoothed(channel: SpectrumChannel) -> SpectrumMeter {
        let mut meter = SpectrumMeter::new(4096, RATE);
        meter.set_smoothing(0.0);
        meter.set_channel(channel);
        meter
    }

    #[test]
    fn scales_round_trip_and_hit_axis_ends() {
        for scale in [SpectrumScale::Linear, SpectrumScale::Logarithmic, SpectrumScale::Mel] {
            assert_abs_diff_eq!(scale.position_to_freq(0.0), MIN_DISPLAY_HZ, epsilon = 1e-2);
            assert_abs_diff_eq!(scale.position_to_freq(1.0), MAX_DISPLAY_HZ, epsilon = 1.0);
            assert_abs_diff_eq!(
                scale.freq_to_position(scale.position_to_freq(0.37)),
                0.37,
                epsilon = 1e-4
            );
            assert_eq!(scale.freq_to_position(5.0), 0.0);
            assert_eq!(scale.position_to_freq(2.0), scale.position_to_freq(1.0));
        }
    }

    #[test]
    fn log_scale_puts_decades_evenly() {
        let scale = SpectrumScale::Logarithmic;
        let step = scale.freq_to_position(200.0) - scale.freq_to_position(20.0);
        assert_abs_diff_eq!(scale.freq_to_position(2_000.0) - scale.freq_to_position(200.0), step, epsilon = 1e-5);
    }

    #[test]
    fn channel_selection_picks_the_right_tone() {
        let block = stereo_sines(4096, 1_000.0, 5_000.0);

        let mut left = unsmoothed(SpectrumChannel::Left);
        left.update(&block, 4096, 2);
        assert_abs_diff_eq!(left.dominant_frequency().unwrap(), 1_000.0, epsilon = 12.0);

        let mut right = unsmoothed(SpectrumChannel::Right);
        right.update(&block, 4096, 2);
        assert_abs_diff_eq!(right.dominant_frequency().unwrap(), 5_000.0, epsilon = 12.0);
    }

    #[test]
    fn side_of_identical_channels_is_silent() {
        let block = stereo_sines(4096, 1_000.0, 1_000.0);
        let mut side = unsmoothed(SpectrumChannel::Side);
        side.update(&block, 4096, 2);

        assert!(side.peak().is_none());
        assert_eq!(side.note_label(), "");

        let mut mid = unsmoothed(SpectrumChannel::Mid);
        mid.update(&block, 4096, 2);
        assert!(mid.peak().is_some());
    }

    #[test]
    fn band_magnitude_tracks_tone() {
        let block = stereo_sines(4096, 1_000.0, 1_000.0);
        let mut meter = unsmoothed(SpectrumChannel::Left);
        meter.update(&block, 4096, 2);

        let around_tone = meter.band_magnitude_db(900.0, 1_100.0);
        let far_away = meter.band_magnitude_db(8_000.0, 9_000.0);
        assert!(around_tone > far_away + 40.0);
        // A zero-width band still reads one bin.
        assert!(meter.band_magnitude_db(1_000.0, 1_000.0) > MIN_DB);
    }

    #[test]
    fn note_label_names_the_tone() {
        // 440 Hz lands between bins; the label still names A4.
        let block = stereo_sines(4096, 440.0, 440.0);
        let mut meter = unsmoothed(SpectrumChannel::Mid);
        meter.update(&block, 4096, 2);

        assert!(meter.note_label().starts_with("A4"));
    }

    #[test]
    fn short_blocks_slide_through_the_window() {
        let block = stereo_sines(4096, 440.0, 440.0);
        let mut meter = unsmoothed(SpectrumChannel::Mid);
        for chunk in block.chunks(512) {
            meter.update(chunk, 256, 2);
        }

        let bin_width = meter.fft().frequency(1);
        assert_abs_diff_eq!(meter.dominant_frequency().unwrap(), 440.0, epsilon = bin_width);
    }

    #[test]
    fn odd_fft_size_rounds_up() {
        let mut meter = unsmoothed(SpectrumChannel::Left);
        meter.set_fft_size(3000);
        assert_eq!(meter.fft().fft_size(), 4096);

        meter.update(&stereo_sines(4096, 1_000.0, 1_000.0), 4096, 2);
        assert_abs_diff_eq!(meter.dominant_frequency().unwrap(), 1_000.0, epsilon = 12.0);
    }

    #[test]
    fn reset_clears_spectrum() {
        let block = stereo_sines(4096, 1_000.0, 1_000.0);
        let mut meter = unsmoothed(SpectrumChannel::Left);
        meter.update(&block, 4096, 2);
        meter.reset();

        assert!(meter.peak().is_none());
        assert!(meter.fft().magnitudes_db().iter().all(|&db| db == MIN_DB));
    }

    #[test]
    fn from_config_applies_settings() {
        let config = EngineConfig {
            fft_size: 1024,
            fft_window: WindowType::Blackman,
            ..EngineConfig::default()
        };
        let meter = SpectrumMeter::from_config(&config, 44_100);

        assert_eq!(meter.fft().fft_size(), 1024);
        assert_eq!(meter.fft().window_type(), WindowType::Blackman);
        assert_eq!(meter.fft().sample_rate(), 44_100);
    }
}
