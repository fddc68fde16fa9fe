use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::models::audio_models::{PeakLevels, StreamFormat};
use crate::models::config::EngineConfig;
use crate::models::error::MeterError;
use crate::session::capture::CaptureSession;
use crate::session::devices::DeviceEnumerator;
use crate::traits::audio_host::AudioHost;
use crate::traits::meter::Meter;

/// Decaying per-channel peak fed from the capture callback.
///
/// Values are f32 bit patterns in atomics so the capture thread never takes a
/// lock. A mono stream drives both sides.
pub struct LevelTracker {
    left: AtomicU32,
    right: AtomicU32,
    decay: f32,
}

impl LevelTracker {
    pub fn new(decay: f32) -> Self {
        Self {
            left: AtomicU32::new(0.0f32.to_bits()),
            right: AtomicU32::new(0.0f32.to_bits()),
            decay,
        }
    }

    /// `peak = max(peak * decay, max |sample|)` per channel.
    pub fn update(&self, samples: &[f32], frames: usize, channels: u16) {
        let channels = usize::from(channels);
        if channels == 0 {
            return;
        }

        let mut max_l = 0.0f32;
        let mut max_r = 0.0f32;
        for frame in samples.chunks_exact(channels).take(frames) {
            max_l = max_l.max(frame[0].abs());
            max_r = max_r.max(frame.get(1).unwrap_or(&frame[0]).abs());
        }

        Self::decay_into(&self.left, max_l, self.decay);
        Self::decay_into(&self.right, max_r, self.decay);
    }

    pub fn levels(&self) -> PeakLevels {
        PeakLevels {
            left: f32::from_bits(self.left.load(Ordering::Relaxed)),
            right: f32::from_bits(self.right.load(Ordering::Relaxed)),
        }
    }

    pub fn reset(&self) {
        self.left.store(0.0f32.to_bits(), Ordering::Relaxed);
        self.right.store(0.0f32.to_bits(), Ordering::Relaxed);
    }

    // Single writer (the capture thread), so load-then-store is enough.
    fn decay_into(slot: &AtomicU32, block_peak: f32, decay: f32) {
        let previous = f32::from_bits(slot.load(Ordering::Relaxed));
        slot.store((previous * decay).max(block_peak).to_bits(), Ordering::Relaxed);
    }
}

/// Owns the device enumerator, the capture session and the registered meters,
/// and drives them once per UI tick.
///
/// ```text
/// initialize() → enumerate devices → start loopback on the default output
/// tick()       → pull staging block from the ring → Meter::update() each
/// ```
pub struct AudioEngine<H: AudioHost> {
    config: EngineConfig,
    host: Arc<H>,
    devices: DeviceEnumerator,
    capture: CaptureSession<H>,
    levels: Arc<LevelTracker>,
    meters: Vec<Box<dyn Meter>>,
    staging: Vec<f32>,
    meter_rate: Option<u32>,
    initialized: bool,
    recovering: bool,
}

impl<H: AudioHost> AudioEngine<H> {
    pub fn new(host: H, config: EngineConfig) -> Result<Self, MeterError> {
        config.validate()?;

        let host = Arc::new(host);
        let levels = Arc::new(LevelTracker::new(config.peak_decay));
        let mut capture = CaptureSession::with_config(Arc::clone(&host), config.clone());

        let tracker = Arc::clone(&levels);
        capture.set_callback(Arc::new(move |samples: &[f32], frames: usize, channels: u16| {
            tracker.update(samples, frames, channels);
        }));

        Ok(Self {
            staging: vec![0.0; config.staging_samples],
            config,
            host,
            devices: DeviceEnumerator::new(),
            capture,
            levels,
            meters: Vec::new(),
            meter_rate: None,
            initialized: false,
            recovering: false,
        })
    }

    /// Acquire device enumeration and, when configured, start loopback
    /// capture of the default output.
    ///
    /// Only an unavailable enumeration service fails; a loopback start
    /// failure is logged and the engine runs without capture.
    pub fn initialize(&mut self) -> Result<(), MeterError> {
        if self.initialized {
            return Ok(());
        }

        self.devices.initialize(self.host.as_ref())?;
        self.initialized = true;

        if self.config.auto_start_loopback {
            if let Err(e) = self.start_capture("", true) {
                log::warn!("loopback auto-start failed, continuing without capture: {}", e);
            }
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn start_capture(&mut self, device_id: &str, is_loopback: bool) -> Result<StreamFormat, MeterError> {
        self.recovering = false;
        self.levels.reset();
        let format = self.capture.start(device_id, is_loopback)?;
        self.adopt_format(format);
        Ok(format)
    }

    pub fn stop_capture(&mut self) {
        self.recovering = false;
        self.capture.stop();
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_capturing()
    }

    pub fn peak_levels(&self) -> PeakLevels {
        self.levels.levels()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn devices(&self) -> &DeviceEnumerator {
        &self.devices
    }

    pub fn capture(&self) -> &CaptureSession<H> {
        &self.capture
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add a meter to the tick fan-out. It is told the current sample rate
    /// if capture is already running.
    pub fn register_meter(&mut self, mut meter: Box<dyn Meter>) {
        if let Some(rate) = self.meter_rate {
            meter.set_sample_rate(rate);
        }
        log::debug!("meter registered: {}", meter.name());
        self.meters.push(meter);
    }

    pub fn meters(&self) -> &[Box<dyn Meter>] {
        &self.meters
    }

    pub fn meters_mut(&mut self) -> &mut [Box<dyn Meter>] {
        &mut self.meters
    }

    /// First registered meter of type `M`.
    pub fn meter<M: Meter>(&self) -> Option<&M> {
        self.meters.iter().find_map(|meter| meter.as_any().downcast_ref::<M>())
    }

    pub fn meter_mut<M: Meter>(&mut self) -> Option<&mut M> {
        self.meters
            .iter_mut()
            .find_map(|meter| meter.as_any_mut().downcast_mut::<M>())
    }

    /// Pull up to one staging buffer of whole frames and hand it to every
    /// meter. Returns the number of frames processed.
    pub fn tick(&mut self) -> usize {
        let Some(format) = self.capture.format() else {
            return 0;
        };
        let channels = usize::from(format.channels);
        if channels == 0 {
            return 0;
        }

        let whole = self.staging.len() / channels * channels;
        let wanted = self.capture.samples_available().min(whole) / channels * channels;
        if wanted == 0 {
            return 0;
        }

        let pulled = self.capture.get_samples(&mut self.staging[..wanted]);
        let frames = pulled / channels;
        let block = &self.staging[..frames * channels];
        for meter in &mut self.meters {
            meter.update(block, frames, format.channels);
        }
        frames
    }

    /// Restart capture with the last request when the device has stopped
    /// signaling for `stall_timeouts` consecutive waits.
    ///
    /// A failed restart is retried on every later call until one succeeds or
    /// capture is started or stopped explicitly. Returns whether a restart
    /// happened.
    pub fn check_health(&mut self) -> Result<bool, MeterError> {
        if self.capture.is_stalled(self.config.stall_timeouts) {
            log::warn!(
                "capture stalled after {} silent waits, restarting",
                self.config.stall_timeouts
            );
        } else if self.recovering && !self.capture.is_capturing() {
            log::debug!("retrying capture restart");
        } else {
            return Ok(false);
        }

        self.devices.refresh();
        self.levels.reset();
        match self.capture.restart() {
            Ok(format) => {
                self.recovering = false;
                self.adopt_format(format);
                Ok(true)
            }
            Err(e) => {
                self.recovering = true;
                Err(e)
            }
        }
    }

    /// Stop capture and release device enumeration.
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.recovering = false;
        self.capture.stop();
        self.devices.shutdown();
        self.initialized = false;
    }

    fn adopt_format(&mut self, format: StreamFormat) {
        // Room for at least one whole frame of the new format.
        let frame = usize::from(format.channels);
        if self.staging.len() < frame {
            self.staging.resize(frame, 0.0);
        }

        if self.meter_rate == Some(format.sample_rate) {
            return;
        }
        for meter in &mut self.meters {
            meter.set_sample_rate(format.sample_rate);
        }
        self.meter_rate = Some(format.sample_rate);
    }
}

impl<H: AudioHost> Drop for AudioEngine<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::synthetic::SyntheticHost;
    use crate::meters::loudness::LoudnessMeter;
    use crate::meters::spectrum::SpectrumMeter;
    use crate::meters::vu::VuMeter;
    use crate::models::audio_models::DeviceDirection;
    use crate::traits::audio_host::EndpointEntry;
    use approx::assert_abs_diff_eq;
    use parking_lot::Mutex;
    use std::any::Any;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Records what the engine hands it.
    struct Recorder {
        frames: Arc<Mutex<Vec<usize>>>,
        rate: Arc<Mutex<Option<u32>>>,
    }

    impl Meter for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn update(&mut self, samples: &[f32], frames: usize, channels: u16) {
            assert_eq!(samples.len(), frames * channels as usize);
            self.frames.lock().push(frames);
        }

        fn set_sample_rate(&mut self, sample_rate: u32) {
            *self.rate.lock() = Some(sample_rate);
        }

        fn reset(&mut self) {}

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn engine(host: SyntheticHost, config: EngineConfig) -> AudioEngine<SyntheticHost> {
        AudioEngine::new(host, config).unwrap()
    }

    fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn level_tracker_decays() {
        let tracker = LevelTracker::new(0.95);
        tracker.update(&[0.8, -0.4], 1, 2);
        assert_eq!(tracker.levels(), PeakLevels { left: 0.8, right: 0.4 });

        tracker.update(&[0.0, 0.0], 1, 2);
        let levels = tracker.levels();
        assert_abs_diff_eq!(levels.left, 0.76, epsilon = 1e-6);
        assert_abs_diff_eq!(levels.right, 0.38, epsilon = 1e-6);

        tracker.update(&[0.9, 0.1], 1, 2);
        assert_abs_diff_eq!(tracker.levels().left, 0.9, epsilon = 1e-6);
    }

    #[test]
    fn level_tracker_mirrors_mono() {
        let tracker = LevelTracker::new(0.95);
        tracker.update(&[0.1, -0.6, 0.3], 3, 1);
        assert_eq!(tracker.levels(), PeakLevels { left: 0.6, right: 0.6 });
    }

    #[test]
    fn initialize_auto_starts_loopback() {
        let mut engine = engine(SyntheticHost::new(), EngineConfig::default());
        engine.initialize().unwrap();

        assert!(engine.is_capturing());
        assert!(engine.capture().request().unwrap().is_loopback);
        assert!(engine.devices().default_output_device().is_some());

        assert!(wait_for(Duration::from_secs(2), || engine.peak_levels().left > 0.5));
        engine.shutdown();
        assert!(!engine.is_capturing());
    }

    #[test]
    fn failed_auto_start_leaves_engine_running_without_capture() {
        let host = SyntheticHost::new().with_devices(DeviceDirection::Output, Vec::new(), None);
        let mut engine = engine(host, EngineConfig::default());

        engine.initialize().unwrap();
        assert!(engine.is_initialized());
        assert!(!engine.is_capturing());
        assert_eq!(engine.tick(), 0);
    }

    #[test]
    fn unavailable_enumeration_fails_initialize() {
        let mut engine = engine(SyntheticHost::new().with_enumeration_unavailable(), EngineConfig::default());
        assert_eq!(engine.initialize(), Err(MeterError::EnumerationUnavailable));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            fft_size: 1000,
            ..EngineConfig::default()
        };
        assert!(matches!(
            AudioEngine::new(SyntheticHost::new(), config),
            Err(MeterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn tick_fans_out_whole_frames() {
        let host = SyntheticHost::new().with_devices(
            DeviceDirection::Input,
            vec![EndpointEntry::new("mic", "Mic")],
            Some("mic"),
        );
        let config = EngineConfig {
            auto_start_loopback: false,
            staging_samples: 1001,
            ..EngineConfig::default()
        };
        let mut engine = engine(host, config);
        engine.initialize().unwrap();
        assert!(!engine.is_capturing());

        let frames = Arc::new(Mutex::new(Vec::new()));
        let rate = Arc::new(Mutex::new(None));
        engine.register_meter(Box::new(Recorder {
            frames: Arc::clone(&frames),
            rate: Arc::clone(&rate),
        }));
        engine.register_meter(Box::new(VuMeter::new()));

        engine.start_capture("mic", false).unwrap();
        assert_eq!(*rate.lock(), Some(48_000));

        assert!(wait_for(Duration::from_secs(2), || engine.capture().samples_available() >= 1000));
        assert_eq!(engine.tick(), 500);
        engine.stop_capture();

        assert_eq!(frames.lock().as_slice(), &[500]);
        assert_eq!(engine.meters().len(), 2);
        assert_eq!(engine.meters()[1].name(), "VU Meter");
    }

    #[test]
    fn meter_registered_late_learns_rate() {
        let host = SyntheticHost::new().with_format(StreamFormat::new(96_000, 2));
        let mut engine = engine(host, EngineConfig::default());
        engine.initialize().unwrap();

        let rate = Arc::new(Mutex::new(None));
        engine.register_meter(Box::new(Recorder {
            frames: Arc::new(Mutex::new(Vec::new())),
            rate: Arc::clone(&rate),
        }));
        assert_eq!(*rate.lock(), Some(96_000));
    }

    #[test]
    fn healthy_capture_is_left_alone() {
        let mut engine = engine(SyntheticHost::new(), EngineConfig::default());
        engine.initialize().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.check_health(), Ok(false));
    }

    #[test]
    fn loudness_meter_reads_the_sine() {
        let mut engine = engine(SyntheticHost::new().with_sine(1_000.0, 0.5), EngineConfig::default());
        engine.register_meter(Box::new(LoudnessMeter::new(48_000)));
        engine.initialize().unwrap();

        // Half a second: five 100 ms loudness blocks.
        let mut processed = 0;
        let deadline = Instant::now() + Duration::from_secs(3);
        while processed < 24_000 && Instant::now() < deadline {
            processed += engine.tick();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(processed >= 24_000);
        assert!(engine.peak_levels().left > 0.45);

        // Mean square 0.125 with no K-weighting: -0.691 + 10 log10(0.125).
        let meter = engine.meter::<LoudnessMeter>().unwrap();
        assert_abs_diff_eq!(meter.lufs().momentary(), -9.722, epsilon = 0.1);
        assert_abs_diff_eq!(meter.lufs().integrated(), -9.722, epsilon = 0.1);
        assert_abs_diff_eq!(meter.peak_db().0, -6.02, epsilon = 0.1);
    }

    #[test]
    fn meters_are_found_by_type() {
        let mut engine = engine(SyntheticHost::new(), EngineConfig::default());
        engine.register_meter(Box::new(VuMeter::new()));
        engine.register_meter(Box::new(LoudnessMeter::new(48_000)));

        assert_eq!(engine.meter::<LoudnessMeter>().unwrap().name(), "Loudness");
        assert!(engine.meter::<SpectrumMeter>().is_none());

        engine.meter_mut::<VuMeter>().unwrap().set_calibration(-18.0);
        assert_eq!(engine.meter::<VuMeter>().unwrap().calibration(), -18.0);
    }

    #[test]
    fn single_sample_staging_still_pulls_whole_frames() {
        let config = EngineConfig {
            staging_samples: 1,
            ..EngineConfig::default()
        };
        let mut engine = engine(SyntheticHost::new().with_format(StreamFormat::new(48_000, 2)), config);
        engine.initialize().unwrap();

        assert!(wait_for(Duration::from_secs(2), || engine.capture().samples_available() >= 2));
        assert_eq!(engine.tick(), 1);
    }

    #[test]
    fn stalled_capture_is_restarted() {
        let config = EngineConfig {
            wait_timeout_ms: 5,
            stall_timeouts: 3,
            ..EngineConfig::default()
        };
        let host = SyntheticHost::new().with_stalled_stream();
        let mut engine = engine(host, config);
        engine.initialize().unwrap();

        assert!(wait_for(Duration::from_secs(2), || engine.capture().is_stalled(3)));
        assert_eq!(engine.check_health(), Ok(true));
        assert!(engine.is_capturing());
        assert!(engine.capture().request().unwrap().is_loopback);
    }

    #[test]
    fn failed_restart_is_retried_until_the_device_returns() {
        let config = EngineConfig {
            wait_timeout_ms: 5,
            stall_timeouts: 3,
            ..EngineConfig::default()
        };
        let mut engine = engine(SyntheticHost::new().with_stalled_stream(), config);
        engine.initialize().unwrap();
        assert!(wait_for(Duration::from_secs(2), || engine.capture().is_stalled(3)));

        engine.host().set_default(DeviceDirection::Output, None);
        assert_eq!(engine.check_health(), Err(MeterError::DeviceNotAvailable));
        assert!(!engine.is_capturing());
        assert_eq!(engine.check_health(), Err(MeterError::DeviceNotAvailable));

        engine.host().set_default(DeviceDirection::Output, Some("synthetic-out"));
        assert_eq!(engine.check_health(), Ok(true));
        assert!(engine.is_capturing());
        assert_eq!(engine.host().open_count(), 2);
    }

    #[test]
    fn explicit_stop_ends_recovery() {
        let config = EngineConfig {
            wait_timeout_ms: 5,
            stall_timeouts: 3,
            ..EngineConfig::default()
        };
        let mut engine = engine(SyntheticHost::new().with_stalled_stream(), config);
        engine.initialize().unwrap();
        assert!(wait_for(Duration::from_secs(2), || engine.capture().is_stalled(3)));

        engine.host().set_default(DeviceDirection::Output, None);
        assert!(engine.check_health().is_err());
        engine.stop_capture();

        engine.host().set_default(DeviceDirection::Output, Some("synthetic-out"));
        assert_eq!(engine.check_health(), Ok(false));
        assert!(!engine.is_capturing());
    }
}
