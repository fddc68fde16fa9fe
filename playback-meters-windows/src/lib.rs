//! # playback-meters-windows
//!
//! Windows WASAPI backend for playback-meters.
//!
//! Provides:
//! - `WasapiHost` - `AudioHost` over the MMDevice API and shared-mode `IAudioClient`
//! - `WasapiCatalog` - active capture and render endpoints with friendly names
//! - `WasapiCaptureEndpoint` - event-driven capture, or loopback of a render endpoint
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063) for event-driven loopback
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use playback_meters_core::{AudioEngine, EngineConfig, LoudnessMeter};
//! use playback_meters_windows::WasapiHost;
//!
//! let mut engine = AudioEngine::new(WasapiHost::new(), EngineConfig::default())?;
//! engine.register_meter(Box::new(LoudnessMeter::new(48_000)));
//! engine.initialize()?; // starts loopback of the default output
//! loop {
//!     engine.tick();
//!     let levels = engine.peak_levels();
//!     let lufs = engine.meter::<LoudnessMeter>().map(|m| m.display_value());
//! }
//! ```

#[cfg(target_os = "windows")]
pub mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod host;
#[cfg(target_os = "windows")]
pub mod wasapi_capture;

#[cfg(target_os = "windows")]
pub use device_enumerator::WasapiCatalog;
#[cfg(target_os = "windows")]
pub use host::WasapiHost;
#[cfg(target_os = "windows")]
pub use wasapi_capture::WasapiCaptureEndpoint;
