use serde::{Deserialize, Serialize};

use crate::models::error::MeterError;
use crate::processing::fft::WindowType;

/// Configuration for the audio engine and the capture session it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds of audio the sample ring holds at the negotiated format (default: 10).
    pub ring_buffer_seconds: f32,

    /// Size of the engine-owned staging buffer pulled per tick, in samples (default: 4096).
    pub staging_samples: usize,

    /// Bounded wait on the endpoint notification, in milliseconds (default: 100).
    pub wait_timeout_ms: u64,

    /// OS-side buffering window requested from the endpoint (default: 1000 ms).
    pub buffer_duration_ms: u32,

    /// Consecutive wait timeouts after which the device is treated as lost (default: 20).
    pub stall_timeouts: u32,

    /// Start loopback capture of the default output device on initialize (default: true).
    pub auto_start_loopback: bool,

    /// FFT size for spectrum consumers; must be a power of two (default: 4096).
    pub fft_size: usize,

    /// Analysis window applied before the FFT (default: Hann).
    pub fft_window: WindowType,

    /// Temporal magnitude smoothing in [0, 1] (default: 0.8).
    pub fft_smoothing: f32,

    /// Per-callback decay of the peak level tracker in (0, 1] (default: 0.95).
    pub peak_decay: f32,
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, MeterError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MeterError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MeterError> {
        if !(self.ring_buffer_seconds > 0.0) {
            return Err(MeterError::InvalidConfig(
                "ring buffer duration must be positive".into(),
            ));
        }
        if self.staging_samples == 0 {
            return Err(MeterError::InvalidConfig(
                "staging buffer must hold at least one sample".into(),
            ));
        }
        if self.wait_timeout_ms == 0 {
            return Err(MeterError::InvalidConfig("wait timeout must be non-zero".into()));
        }
        if self.buffer_duration_ms == 0 {
            return Err(MeterError::InvalidConfig(
                "endpoint buffer duration must be non-zero".into(),
            ));
        }
        if self.fft_size < 2 || !self.fft_size.is_power_of_two() {
            return Err(MeterError::InvalidConfig(format!(
                "fft size must be a power of two: {}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.fft_smoothing) {
            return Err(MeterError::InvalidConfig(format!(
                "fft smoothing out of range: {}",
                self.fft_smoothing
            )));
        }
        if !(self.peak_decay > 0.0 && self.peak_decay <= 1.0) {
            return Err(MeterError::InvalidConfig(format!(
                "peak decay out of range: {}",
                self.peak_decay
            )));
        }
        Ok(())
    }

    /// Ring capacity in samples for a given format, rounded to whole frames.
    pub fn ring_capacity(&self, sample_rate: u32, channels: u16) -> usize {
        let channels = channels.max(1) as usize;
        let frames = (sample_rate as f32 * self.ring_buffer_seconds).ceil() as usize;
        frames.max(1) * channels
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_seconds: 10.0,
            staging_samples: 4096,
            wait_timeout_ms: 100,
            buffer_duration_ms: 1000,
            stall_timeouts: 20,
            auto_start_loopback: true,
            fft_size: 4096,
            fft_window: WindowType::Hann,
            fft_smoothing: 0.8,
            peak_decay: 0.95,
        }
    }
}
