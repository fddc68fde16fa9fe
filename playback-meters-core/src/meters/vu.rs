use std::any::Any;

use crate::meters::stereo_stats;
use crate::processing::fft::NOISE_FLOOR;
use crate::traits::meter::Meter;

/// Floor of every VU reading.
pub const VU_FLOOR_DB: f32 = -60.0;
/// Needle integration time.
pub const VU_INTEGRATION_SECS: f32 = 0.3;
/// Update rate the ballistics are tuned for.
pub const VU_TICK_HZ: f32 = 60.0;
/// Peak fall per tick (~18 dB/s at 60 Hz).
pub const VU_PEAK_DECAY_DB: f32 = 0.3;

const INITIAL_DB: f32 = -40.0;

fn to_db(amplitude: f32) -> f32 {
    if amplitude > NOISE_FLOOR {
        20.0 * amplitude.log10()
    } else {
        VU_FLOOR_DB
    }
}

/// Classic VU ballistics: a slow RMS needle plus a fast-attack, slow-decay
/// peak indicator per channel.
#[derive(Debug, Clone)]
pub struct VuMeter {
    integration_coeff: f32,
    calibration_db: f32,
    vu: [f32; 2],
    peak: [f32; 2],
}

impl VuMeter {
    pub fn new() -> Self {
        Self {
            integration_coeff: 1.0 - (-1.0 / (VU_INTEGRATION_SECS * VU_TICK_HZ)).exp(),
            calibration_db: 0.0,
            vu: [INITIAL_DB; 2],
            peak: [INITIAL_DB; 2],
        }
    }

    /// Offset added to the needle so that 0 VU lands on a chosen dBFS level.
    pub fn set_calibration(&mut self, db: f32) {
        self.calibration_db = db;
    }

    pub fn calibration(&self) -> f32 {
        self.calibration_db
    }

    /// Integrated needle level per channel in dBFS, calibration not applied.
    pub fn levels_db(&self) -> (f32, f32) {
        (self.vu[0], self.vu[1])
    }

    /// Needle position per channel in VU: level plus calibration.
    pub fn needle_vu(&self) -> (f32, f32) {
        (self.vu[0] + self.calibration_db, self.vu[1] + self.calibration_db)
    }

    pub fn peaks_db(&self) -> (f32, f32) {
        (self.peak[0], self.peak[1])
    }
}

impl Default for VuMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter for VuMeter {
    fn name(&self) -> &str {
        "VU Meter"
    }

    fn update(&mut self, samples: &[f32], frames: usize, channels: u16) {
        let Some(stats) = stereo_stats(samples, frames, channels) else {
            return;
        };

        for (side, s) in stats.iter().enumerate() {
            let rms_db = to_db(s.rms());
            self.vu[side] += (rms_db - self.vu[side]) * self.integration_coeff;

            let peak_db = to_db(s.peak);
            self.peak[side] = if peak_db > self.peak[side] {
                peak_db
            } else {
                (self.peak[side] - VU_PEAK_DECAY_DB).max(VU_FLOOR_DB)
            };
        }
    }

    fn reset(&mut self) {
        self.vu = [INITIAL_DB; 2];
        self.peak = [INITIAL_DB; 2];
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
