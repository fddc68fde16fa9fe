//! # playback-meters-core
//!
//! Platform-agnostic core of the playback meters: capture session, sample
//! ring, DSP and render-agnostic meters. Platform backends (Windows WASAPI)
//! implement the `AudioHost` trait and plug into the generic `CaptureSession`
//! and `AudioEngine`.
//!
//! ## Architecture
//!
//! ```text
//! playback-meters-core (this crate)
//! ├── traits/       ← AudioHost, EndpointCatalog, CaptureEndpoint, Meter
//! ├── models/       ← MeterError, CaptureState, EngineConfig, device and format models
//! ├── processing/   ← RingBuffer, FftProcessor, LufsMeter, StereoCorrelation, notes
//! ├── meters/       ← Loudness, VU, Spectrum, Spectrogram, Stereometer, Waveform, Oscilloscope
//! ├── session/      ← CaptureSession, DeviceEnumerator, AudioEngine
//! └── hosts/        ← SyntheticHost (signal generator, no hardware)
//! ```
//!
//! ## Data flow
//!
//! ```text
//! [endpoint] → capture thread → [RingBuffer] → AudioEngine::tick() → meters
//!                            └→ callback → LevelTracker
//! ```

pub mod hosts;
pub mod meters;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use hosts::synthetic::SyntheticHost;
pub use meters::loudness::{LoudnessMeter, LoudnessMode};
pub use meters::oscilloscope::{Oscilloscope, ScopeMode};
pub use meters::spectrogram::SpectrogramMeter;
pub use meters::spectrum::{SpectrumChannel, SpectrumMeter, SpectrumScale};
pub use meters::stereometer::Stereometer;
pub use meters::vu::VuMeter;
pub use meters::waveform::{WaveformColumn, WaveformMeter};
pub use models::audio_models::{
    AudioDeviceInfo, CaptureDiagnostics, DeviceDirection, EndpointRequest, PeakLevels, StreamFormat,
};
pub use models::config::EngineConfig;
pub use models::error::MeterError;
pub use models::state::CaptureState;
pub use processing::fft::{FftProcessor, WindowType};
pub use processing::loudness::{calculate_peak, calculate_peak_db, calculate_rms, calculate_rms_db, LufsMeter};
pub use processing::ring_buffer::RingBuffer;
pub use processing::stereo::{BandCorrelation, StereoCorrelation};
pub use session::capture::CaptureSession;
pub use session::devices::DeviceEnumerator;
pub use session::engine::{AudioEngine, LevelTracker};
pub use traits::audio_host::{AudioHost, EndpointCatalog, EndpointEntry};
pub use traits::capture_endpoint::{AudioBufferCallback, CaptureEndpoint, EndpointWaker, Packet, WaitOutcome};
pub use traits::meter::Meter;
