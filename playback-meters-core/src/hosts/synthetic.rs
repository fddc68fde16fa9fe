use std::f64::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::models::audio_models::{DeviceDirection, EndpointRequest, StreamFormat};
use crate::models::error::MeterError;
use crate::traits::audio_host::{AudioHost, EndpointCatalog, EndpointEntry};
use crate::traits::capture_endpoint::{CaptureEndpoint, EndpointWaker, Packet, WaitOutcome};

const DEFAULT_BLOCK_FRAMES: usize = 1024;
const DEFAULT_SINE_HZ: f64 = 1_000.0;

#[derive(Debug, Clone, Default)]
struct Catalog {
    inputs: Vec<EndpointEntry>,
    outputs: Vec<EndpointEntry>,
    default_input: Option<String>,
    default_output: Option<String>,
}

impl Catalog {
    fn standard() -> Self {
        Self {
            inputs: vec![EndpointEntry::new("synthetic-in", "Synthetic Input")],
            outputs: vec![EndpointEntry::new("synthetic-out", "Synthetic Output")],
            default_input: Some("synthetic-in".into()),
            default_output: Some("synthetic-out".into()),
        }
    }

    fn entries(&self, direction: DeviceDirection) -> &[EndpointEntry] {
        match direction {
            DeviceDirection::Input => &self.inputs,
            DeviceDirection::Output => &self.outputs,
        }
    }

    fn default_id(&self, direction: DeviceDirection) -> Option<&String> {
        match direction {
            DeviceDirection::Input => self.default_input.as_ref(),
            DeviceDirection::Output => self.default_output.as_ref(),
        }
    }
}

/// Signal produced by every endpoint the host opens.
#[derive(Debug, Clone, Copy)]
struct Signal {
    format: StreamFormat,
    block_frames: usize,
    frequency: f64,
    amplitude: f32,
    silent_every: Option<u64>,
    fetch_failure_every: Option<u64>,
    stalled: bool,
}

/// Hardware-free [`AudioHost`]: every endpoint is a real-time paced sine
/// generator delivering fixed-size interleaved blocks.
///
/// Blocks are due on a wall-clock schedule starting when the stream starts;
/// the first is due immediately. A drain delivers every block that has come
/// due, so a late consumer catches up instead of losing time.
pub struct SyntheticHost {
    catalog: Arc<RwLock<Catalog>>,
    signal: Signal,
    open_failure: Option<MeterError>,
    enumeration_unavailable: bool,
    opened: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl SyntheticHost {
    /// 48 kHz stereo, 1024-frame blocks of a full-scale 1 kHz sine.
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(RwLock::new(Catalog::standard())),
            signal: Signal {
                format: StreamFormat::default(),
                block_frames: DEFAULT_BLOCK_FRAMES,
                frequency: DEFAULT_SINE_HZ,
                amplitude: 1.0,
                silent_every: None,
                fetch_failure_every: None,
                stalled: false,
            },
            open_failure: None,
            enumeration_unavailable: false,
            opened: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_format(mut self, format: StreamFormat) -> Self {
        self.signal.format = format;
        self
    }

    pub fn with_block_frames(mut self, frames: usize) -> Self {
        self.signal.block_frames = frames.max(1);
        self
    }

    pub fn with_sine(mut self, frequency: f64, amplitude: f32) -> Self {
        self.signal.frequency = frequency;
        self.signal.amplitude = amplitude;
        self
    }

    /// Mark every `n`th block as silent.
    pub fn with_silent_every(mut self, n: u64) -> Self {
        self.signal.silent_every = (n > 0).then_some(n);
        self
    }

    /// Fail the fetch of every `n`th block; that block is lost.
    pub fn with_fetch_failure_every(mut self, n: u64) -> Self {
        self.signal.fetch_failure_every = (n > 0).then_some(n);
        self
    }

    /// The stream starts but never signals, like a device that vanished.
    pub fn with_stalled_stream(mut self) -> Self {
        self.signal.stalled = true;
        self
    }

    /// Every `open_endpoint` call fails with `error`.
    pub fn with_open_failure(mut self, error: MeterError) -> Self {
        self.open_failure = Some(error);
        self
    }

    pub fn with_enumeration_unavailable(mut self) -> Self {
        self.enumeration_unavailable = true;
        self
    }

    /// Replace the catalog for one direction.
    pub fn with_devices(
        self,
        direction: DeviceDirection,
        entries: Vec<EndpointEntry>,
        default_id: Option<&str>,
    ) -> Self {
        {
            let mut catalog = self.catalog.write();
            match direction {
                DeviceDirection::Input => catalog.inputs = entries,
                DeviceDirection::Output => catalog.outputs = entries,
            }
        }
        self.set_default(direction, default_id);
        self
    }

    /// Change the platform default, as a user switching output would.
    pub fn set_default(&self, direction: DeviceDirection, default_id: Option<&str>) {
        let mut catalog = self.catalog.write();
        let id = default_id.map(str::to_owned);
        match direction {
            DeviceDirection::Input => catalog.default_input = id,
            DeviceDirection::Output => catalog.default_output = id,
        }
    }

    /// Endpoints opened successfully so far.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Endpoints currently alive.
    pub fn live_endpoints(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn resolve(&self, request: &EndpointRequest) -> Result<String, MeterError> {
        let catalog = self.catalog.read();
        let direction = request.direction();
        if request.uses_default_device() {
            return catalog
                .default_id(direction)
                .cloned()
                .ok_or(MeterError::DeviceNotAvailable);
        }
        catalog
            .entries(direction)
            .iter()
            .find(|entry| entry.id == request.device_id)
            .map(|entry| entry.id.clone())
            .ok_or(MeterError::DeviceNotAvailable)
    }
}

impl Default for SyntheticHost {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHost for SyntheticHost {
    fn enumeration(&self) -> Result<Box<dyn EndpointCatalog>, MeterError> {
        if self.enumeration_unavailable {
            return Err(MeterError::EnumerationUnavailable);
        }
        Ok(Box::new(SyntheticCatalog {
            catalog: Arc::clone(&self.catalog),
        }))
    }

    fn open_endpoint(&self, request: &EndpointRequest) -> Result<Box<dyn CaptureEndpoint>, MeterError> {
        if let Some(error) = &self.open_failure {
            return Err(error.clone());
        }
        let device_id = self.resolve(request)?;
        log::debug!("opening synthetic endpoint {}", device_id);

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticEndpoint::new(self.signal, Arc::clone(&self.live))))
    }
}

struct SyntheticCatalog {
    catalog: Arc<RwLock<Catalog>>,
}

impl EndpointCatalog for SyntheticCatalog {
    fn list(&self, direction: DeviceDirection) -> Result<Vec<EndpointEntry>, MeterError> {
        Ok(self.catalog.read().entries(direction).to_vec())
    }

    fn default_id(&self, direction: DeviceDirection) -> Option<String> {
        self.catalog.read().default_id(direction).cloned()
    }
}

/// Condition-variable stand-in for an OS event.
#[derive(Default)]
struct Notifier {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl EndpointWaker for Notifier {
    fn wake(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }
}

struct SyntheticEndpoint {
    signal: Signal,
    notifier: Arc<Notifier>,
    block_period: Duration,
    started: Option<Instant>,
    blocks_emitted: u64,
    frame_cursor: u64,
    block: Vec<f32>,
    live: Arc<AtomicUsize>,
}

impl SyntheticEndpoint {
    fn new(signal: Signal, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        let rate = f64::from(signal.format.sample_rate.max(1));
        Self {
            signal,
            notifier: Arc::new(Notifier::default()),
            block_period: Duration::from_secs_f64(signal.block_frames as f64 / rate),
            started: None,
            blocks_emitted: 0,
            frame_cursor: 0,
            block: vec![0.0; signal.block_frames * usize::from(signal.format.channels)],
            live,
        }
    }

    /// Blocks due by `now`, counting the one due at start.
    fn blocks_due(&self, now: Instant) -> u64 {
        match self.started {
            Some(started) if !self.signal.stalled => {
                let elapsed = now.saturating_duration_since(started);
                (elapsed.as_nanos() / self.block_period.as_nanos().max(1)) as u64 + 1
            }
            _ => 0,
        }
    }

    fn next_due(&self) -> Option<Instant> {
        let started = self.started.filter(|_| !self.signal.stalled)?;
        let period = self.block_period.checked_mul(u32::try_from(self.blocks_emitted).ok()?)?;
        Some(started + period)
    }

    fn fill_block(&mut self, silent: bool) {
        let channels = usize::from(self.signal.format.channels);
        if silent {
            self.block.fill(0.0);
        } else {
            let step = TAU * self.signal.frequency / f64::from(self.signal.format.sample_rate);
            for (i, frame) in self.block.chunks_exact_mut(channels).enumerate() {
                let phase = step * (self.frame_cursor + i as u64) as f64;
                frame.fill(self.signal.amplitude * phase.sin() as f32);
            }
        }
        self.frame_cursor += self.signal.block_frames as u64;
    }

    fn every(n: Option<u64>, index: u64) -> bool {
        n.is_some_and(|n| (index + 1) % n == 0)
    }
}

impl CaptureEndpoint for SyntheticEndpoint {
    fn format(&self) -> StreamFormat {
        self.signal.format
    }

    fn start(&mut self) -> Result<(), MeterError> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MeterError> {
        self.started = None;
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, MeterError> {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.notifier.signaled.lock();
        loop {
            if *signaled {
                *signaled = false;
                return Ok(WaitOutcome::Ready);
            }
            let now = Instant::now();
            if self.blocks_due(now) > self.blocks_emitted {
                return Ok(WaitOutcome::Ready);
            }
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            let wake_at = self.next_due().map_or(deadline, |due| due.min(deadline));
            self.notifier.cond.wait_until(&mut signaled, wake_at);
        }
    }

    fn drain(&mut self, on_packet: &mut dyn FnMut(Packet<'_>)) -> Result<usize, MeterError> {
        let due = self.blocks_due(Instant::now());
        let mut delivered = 0;
        while self.blocks_emitted < due {
            let index = self.blocks_emitted;
            self.blocks_emitted += 1;

            if Self::every(self.signal.fetch_failure_every, index) {
                self.frame_cursor += self.signal.block_frames as u64;
                return Err(MeterError::BufferFetch(format!("synthetic fetch failure at block {}", index)));
            }

            let silent = Self::every(self.signal.silent_every, index);
            self.fill_block(silent);
            on_packet(Packet {
                samples: &self.block,
                frames: self.signal.block_frames,
                channels: self.signal.format.channels,
                silent,
            });
            delivered += 1;
        }
        Ok(delivered)
    }

    fn waker(&self) -> Arc<dyn EndpointWaker> {
        self.notifier.clone()
    }
}

impl Drop for SyntheticEndpoint {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::loudness::calculate_rms_db;
    use approx::assert_abs_diff_eq;

    fn open(host: &SyntheticHost) -> Box<dyn CaptureEndpoint> {
        let mut endpoint = host.open_endpoint(&EndpointRequest::new("", true)).unwrap();
        endpoint.start().unwrap();
        endpoint
    }

    fn collect(endpoint: &mut dyn CaptureEndpoint) -> (Vec<f32>, Vec<bool>) {
        let mut samples = Vec::new();
        let mut silent = Vec::new();
        endpoint
            .drain(&mut |packet| {
                samples.extend_from_slice(packet.samples);
                silent.push(packet.silent);
            })
            .unwrap();
        (samples, silent)
    }

    #[test]
    fn first_block_is_due_at_start() {
        let host = SyntheticHost::new();
        let mut endpoint = open(&host);

        assert_eq!(endpoint.wait(Duration::from_millis(1)).unwrap(), WaitOutcome::Ready);
        let (samples, _) = collect(endpoint.as_mut());
        assert!(samples.len() >= 1024 * 2);
        assert_eq!(samples.len() % (1024 * 2), 0);
    }

    #[test]
    fn generates_full_scale_sine() {
        let host = SyntheticHost::new().with_block_frames(4800);
        let mut endpoint = open(&host);
        let (samples, _) = collect(endpoint.as_mut());

        assert_abs_diff_eq!(calculate_rms_db(&samples), -3.0103, epsilon = 0.05);
        // Channels carry the same signal.
        assert!(samples.chunks_exact(2).all(|f| f[0] == f[1]));
    }

    #[test]
    fn catches_up_on_late_drain() {
        let host = SyntheticHost::new().with_block_frames(48);
        let mut endpoint = open(&host);
        std::thread::sleep(Duration::from_millis(20));

        let (samples, _) = collect(endpoint.as_mut());
        // 1 ms blocks: at least the 20 that came due while sleeping.
        assert!(samples.len() >= 20 * 48 * 2);
    }

    #[test]
    fn stalled_stream_times_out() {
        let host = SyntheticHost::new().with_stalled_stream();
        let mut endpoint = open(&host);

        assert_eq!(endpoint.wait(Duration::from_millis(5)).unwrap(), WaitOutcome::TimedOut);
        let (samples, _) = collect(endpoint.as_mut());
        assert!(samples.is_empty());
    }

    #[test]
    fn waker_releases_wait() {
        let host = SyntheticHost::new().with_stalled_stream();
        let mut endpoint = open(&host);
        endpoint.waker().wake();

        assert_eq!(endpoint.wait(Duration::from_secs(5)).unwrap(), WaitOutcome::Ready);
    }

    #[test]
    fn marks_silent_blocks() {
        let host = SyntheticHost::new().with_block_frames(48).with_silent_every(2);
        let mut endpoint = open(&host);
        std::thread::sleep(Duration::from_millis(10));

        let (_, silent) = collect(endpoint.as_mut());
        assert!(silent.len() >= 4);
        assert!(!silent[0]);
        assert!(silent[1]);
    }

    #[test]
    fn fetch_failure_ends_drain() {
        let host = SyntheticHost::new().with_block_frames(48).with_fetch_failure_every(2);
        let mut endpoint = open(&host);
        std::thread::sleep(Duration::from_millis(10));

        let mut delivered = 0;
        let result = endpoint.drain(&mut |_| delivered += 1);
        assert!(matches!(result, Err(MeterError::BufferFetch(_))));
        assert_eq!(delivered, 1);
    }

    #[test]
    fn default_resolves_per_direction() {
        let host = SyntheticHost::new().with_devices(DeviceDirection::Input, Vec::new(), None);

        assert!(host.open_endpoint(&EndpointRequest::new("", true)).is_ok());
        assert_eq!(
            host.open_endpoint(&EndpointRequest::new("", false)).err(),
            Some(MeterError::DeviceNotAvailable)
        );
    }

    #[test]
    fn tracks_live_endpoints() {
        let host = SyntheticHost::new();
        let endpoint = open(&host);
        assert_eq!(host.live_endpoints(), 1);
        drop(endpoint);
        assert_eq!(host.live_endpoints(), 0);
        assert_eq!(host.open_count(), 1);
    }
}
