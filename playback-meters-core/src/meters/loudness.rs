use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::meters::stereo_stats;
use crate::processing::fft::{MIN_DB, NOISE_FLOOR};
use crate::processing::loudness::{amplitude_to_db, LufsMeter};
use crate::traits::meter::Meter;

/// Ticks the peak hold stays put before it starts falling (~1 s at 60 Hz).
pub const PEAK_HOLD_TICKS: u32 = 60;
/// Peak hold fall rate once the hold expires.
pub const PEAK_HOLD_DECAY_DB: f32 = 0.5;
/// Blocks averaged for the fast RMS reading (~0.3 s of 1024-frame blocks at 48 kHz).
pub const RMS_FAST_BLOCKS: u32 = 14;
/// Blocks averaged for the slow RMS reading (~1 s).
pub const RMS_SLOW_BLOCKS: u32 = 46;

/// Which reading [`LoudnessMeter::display_value`] shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoudnessMode {
    /// 400 ms window.
    #[default]
    LufsMomentary,
    /// 3 s window.
    LufsShort,
    RmsFast,
    RmsSlow,
}

impl LoudnessMode {
    pub fn label(self) -> &'static str {
        match self {
            LoudnessMode::LufsMomentary => "LUFS M",
            LoudnessMode::LufsShort => "LUFS S",
            LoudnessMode::RmsFast => "RMS Fast",
            LoudnessMode::RmsSlow => "RMS Slow",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            LoudnessMode::LufsMomentary | LoudnessMode::LufsShort => "LUFS",
            LoudnessMode::RmsFast | LoudnessMode::RmsSlow => "dB",
        }
    }
}

/// Block-averaged RMS window: reports once every `blocks` updates.
#[derive(Debug, Clone)]
struct RmsWindow {
    blocks: u32,
    sum: f32,
    count: u32,
    value: f32,
}

impl RmsWindow {
    fn new(blocks: u32) -> Self {
        Self {
            blocks,
            sum: 0.0,
            count: 0,
            value: MIN_DB,
        }
    }

    fn add(&mut self, mean_square: f32) {
        self.sum += mean_square;
        self.count += 1;
        if self.count >= self.blocks {
            let avg = self.sum / self.count as f32;
            self.value = if avg > NOISE_FLOOR * NOISE_FLOOR {
                10.0 * avg.log10()
            } else {
                MIN_DB
            };
            self.sum = 0.0;
            self.count = 0;
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.blocks);
    }
}

/// Peak, RMS and LUFS readings with peak hold.
#[derive(Debug, Clone)]
pub struct LoudnessMeter {
    mode: LoudnessMode,
    lufs: LufsMeter,

    peak_db: [f32; 2],
    rms_db: [f32; 2],

    peak_hold: f32,
    peak_hold_timer: u32,

    rms_fast: RmsWindow,
    rms_slow: RmsWindow,
}

impl LoudnessMeter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mode: LoudnessMode::default(),
            lufs: LufsMeter::new(sample_rate),
            peak_db: [MIN_DB; 2],
            rms_db: [MIN_DB; 2],
            peak_hold: MIN_DB,
            peak_hold_timer: 0,
            rms_fast: RmsWindow::new(RMS_FAST_BLOCKS),
            rms_slow: RmsWindow::new(RMS_SLOW_BLOCKS),
        }
    }

    pub fn mode(&self) -> LoudnessMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: LoudnessMode) {
        self.mode = mode;
    }

    /// Reading for the selected mode.
    pub fn display_value(&self) -> f32 {
        match self.mode {
            LoudnessMode::LufsMomentary => self.lufs.momentary(),
            LoudnessMode::LufsShort => self.lufs.short_term(),
            LoudnessMode::RmsFast => self.rms_fast.value,
            LoudnessMode::RmsSlow => self.rms_slow.value,
        }
    }

    pub fn mode_label(&self) -> &'static str {
        self.mode.label()
    }

    /// Last block's peak per channel, dBFS.
    pub fn peak_db(&self) -> (f32, f32) {
        (self.peak_db[0], self.peak_db[1])
    }

    /// Last block's RMS per channel, dBFS.
    pub fn rms_db(&self) -> (f32, f32) {
        (self.rms_db[0], self.rms_db[1])
    }

    pub fn peak_hold_db(&self) -> f32 {
        self.peak_hold
    }

    pub fn rms_fast_db(&self) -> f32 {
        self.rms_fast.value
    }

    pub fn rms_slow_db(&self) -> f32 {
        self.rms_slow.value
    }

    pub fn lufs(&self) -> &LufsMeter {
        &self.lufs
    }

    fn update_peak_hold(&mut self, peak: f32) {
        if peak > self.peak_hold {
            self.peak_hold = peak;
            self.peak_hold_timer = PEAK_HOLD_TICKS;
        }

        if self.peak_hold_timer > 0 {
            self.peak_hold_timer -= 1;
        } else {
            self.peak_hold = (self.peak_hold - PEAK_HOLD_DECAY_DB).max(peak);
        }
    }
}

impl Meter for LoudnessMeter {
    fn name(&self) -> &str {
        "Loudness"
    }

    fn update(&mut self, samples: &[f32], frames: usize, channels: u16) {
        let Some(stats) = stereo_stats(samples, frames, channels) else {
            return;
        };

        for (side, s) in stats.iter().enumerate() {
            self.peak_db[side] = amplitude_to_db(s.peak);
            self.rms_db[side] = amplitude_to_db(s.rms());
        }
        self.update_peak_hold(self.peak_db[0].max(self.peak_db[1]));

        let combined = (stats[0].rms() + stats[1].rms()) * 0.5;
        self.rms_fast.add(combined * combined);
        self.rms_slow.add(combined * combined);

        let len = (frames * usize::from(channels)).min(samples.len());
        self.lufs.process_interleaved(&samples[..len], usize::from(channels));
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.lufs.set_sample_rate(sample_rate);
    }

    fn reset(&mut self) {
        self.lufs.reset();
        self.peak_db = [MIN_DB; 2];
        self.rms_db = [MIN_DB; 2];
        self.peak_hold = MIN_DB;
        self.peak_hold_timer = 0;
        self.rms_fast.reset();
        self.rms_slow.reset();
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
    use approx::assert_abs_diff_eq;

    fn constant(level: f32, frames: usize) -> Vec<f32> {
        vec![level; frames * 2]
    }

    #[test]
    fn starts_silent() {
        let meter = LoudnessMeter::new(48_000);
        assert_eq!(meter.display_value(), MIN_DB);
        assert_eq!(meter.peak_hold_db(), MIN_DB);
        assert_eq!(meter.mode_label(), "LUFS M");
    }

    #[test]
    fn per_channel_levels() {
        let mut meter = LoudnessMeter::new(48_000);
        let block: Vec<f32> = (0..256).flat_map(|_| [0.5f32, 0.25]).collect();
        meter.update(&block, 256, 2);

        let (peak_l, peak_r) = meter.peak_db();
        assert_abs_diff_eq!(peak_l, -6.0206, epsilon = 1e-3);
        assert_abs_diff_eq!(peak_r, -12.0412, epsilon = 1e-3);
        let (rms_l, rms_r) = meter.rms_db();
        assert_abs_diff_eq!(rms_l, peak_l, epsilon = 1e-3);
        assert_abs_diff_eq!(rms_r, peak_r, epsilon = 1e-3);
    }

    #[test]
    fn peak_hold_holds_then_decays() {
        let mut meter = LoudnessMeter::new(48_000);
        meter.update(&constant(1.0, 64), 64, 2);
        assert_abs_diff_eq!(meter.peak_hold_db(), 0.0, epsilon = 1e-4);

        let quiet = constant(0.01, 64);
        for _ in 0..PEAK_HOLD_TICKS - 1 {
            meter.update(&quiet, 64, 2);
        }
        assert_abs_diff_eq!(meter.peak_hold_db(), 0.0, epsilon = 1e-4);

        meter.update(&quiet, 64, 2);
        assert_abs_diff_eq!(meter.peak_hold_db(), -PEAK_HOLD_DECAY_DB, epsilon = 1e-4);

        for _ in 0..200 {
            meter.update(&quiet, 64, 2);
        }
        // Never falls below the live peak.
        assert_abs_diff_eq!(meter.peak_hold_db(), -40.0, epsilon = 1e-3);
    }

    #[test]
    fn rms_windows_report_on_their_own_cadence() {
        let mut meter = LoudnessMeter::new(48_000);
        let block = constant(0.5, 128);

        for _ in 0..RMS_FAST_BLOCKS {
            meter.update(&block, 128, 2);
        }
        assert_abs_diff_eq!(meter.rms_fast_db(), -6.0206, epsilon = 1e-3);
        assert_eq!(meter.rms_slow_db(), MIN_DB);

        for _ in RMS_FAST_BLOCKS..RMS_SLOW_BLOCKS {
            meter.update(&block, 128, 2);
        }
        assert_abs_diff_eq!(meter.rms_slow_db(), -6.0206, epsilon = 1e-3);

        meter.set_mode(LoudnessMode::RmsSlow);
        assert_eq!(meter.display_value(), meter.rms_slow_db());
        assert_eq!(meter.mode_label(), "RMS Slow");
        assert_eq!(meter.mode().unit(), "dB");
    }

    #[test]
    fn display_follows_lufs() {
        let mut meter = LoudnessMeter::new(48_000);
        let block = constant(0.5, 4800);
        for _ in 0..4 {
            meter.update(&block, 4800, 2);
        }

        assert_abs_diff_eq!(meter.display_value(), meter.lufs().momentary());
        assert!(meter.display_value() > MIN_DB);

        meter.set_mode(LoudnessMode::LufsShort);
        assert_abs_diff_eq!(meter.display_value(), meter.lufs().short_term());
    }

    #[test]
    fn reset_clears_everything() {
        let mut meter = LoudnessMeter::new(48_000);
        let block = constant(0.5, 4800);
        for _ in 0..RMS_SLOW_BLOCKS {
            meter.update(&block, 4800, 2);
        }
        meter.reset();

        assert_eq!(meter.peak_hold_db(), MIN_DB);
        assert_eq!(meter.rms_fast_db(), MIN_DB);
        assert_eq!(meter.rms_slow_db(), MIN_DB);
        assert_eq!(meter.lufs().integrated(), MIN_DB);
    }
}
