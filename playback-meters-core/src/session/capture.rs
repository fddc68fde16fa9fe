use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::models::audio_models::{CaptureDiagnostics, EndpointRequest, StreamFormat};
use crate::models::config::EngineConfig;
use crate::models::error::MeterError;
use crate::models::state::CaptureState;
use crate::processing::ring_buffer::RingBuffer;
use crate::traits::audio_host::AudioHost;
use crate::traits::capture_endpoint::{
    AudioBufferCallback, CaptureEndpoint, EndpointWaker, Packet, WaitOutcome,
};

const CAPTURE_THREAD_NAME: &str = "playback-meters-capture";

/// Counters shared between the capture thread and the session.
#[derive(Default)]
struct CaptureCounters {
    packets: AtomicU64,
    silent_packets: AtomicU64,
    fetch_errors: AtomicU64,
    wait_timeouts: AtomicU64,
    consecutive_timeouts: AtomicU32,
}

/// What the capture thread hands back once the endpoint is open and started.
struct ReadyState {
    format: StreamFormat,
    ring: Arc<RingBuffer>,
    waker: Arc<dyn EndpointWaker>,
}

/// Everything the capture thread owns for its lifetime.
struct CaptureLoop {
    ring: Arc<RingBuffer>,
    callback: Option<AudioBufferCallback>,
    running: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    wait_timeout: Duration,
}

/// One connection to one OS audio endpoint plus its capture thread.
///
/// Data flow:
/// ```text
/// [endpoint] → capture thread ─┬→ [RingBuffer] → get_samples() (consumer tick)
///                              └→ AudioBufferCallback (level tracking)
/// ```
///
/// The session is the only producer of its ring; exactly one consumer may
/// call [`get_samples`](Self::get_samples) at a time.
pub struct CaptureSession<H: AudioHost> {
    host: Arc<H>,
    config: EngineConfig,
    state: CaptureState,
    format: Option<StreamFormat>,
    request: Option<EndpointRequest>,
    ring: Option<Arc<RingBuffer>>,
    callback: Option<AudioBufferCallback>,
    running: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    waker: Option<Arc<dyn EndpointWaker>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl<H: AudioHost> CaptureSession<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self::with_config(host, EngineConfig::default())
    }

    pub fn with_config(host: Arc<H>, config: EngineConfig) -> Self {
        Self {
            host,
            config,
            state: CaptureState::Idle,
            format: None,
            request: None,
            ring: None,
            callback: None,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CaptureCounters::default()),
            waker: None,
            handle: None,
        }
    }

    /// Register the streaming callback.
    ///
    /// The capture thread takes a snapshot at [`start`](Self::start); a
    /// callback set while running applies from the next start.
    pub fn set_callback(&mut self, callback: AudioBufferCallback) {
        self.callback = Some(callback);
    }

    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    /// Open `device_id` (empty selects the platform default for the
    /// direction), adopt its native mix format and spawn the capture thread.
    ///
    /// A running session is stopped first. On failure the session is left
    /// idle with nothing acquired.
    pub fn start(&mut self, device_id: &str, is_loopback: bool) -> Result<StreamFormat, MeterError> {
        let mut request = EndpointRequest::new(device_id, is_loopback);
        request.buffer_duration_ms = self.config.buffer_duration_ms;
        self.start_request(request)
    }

    /// Start again with the last request that succeeded.
    pub fn restart(&mut self) -> Result<StreamFormat, MeterError> {
        let request = self.request.clone().ok_or(MeterError::DeviceNotAvailable)?;
        self.start_request(request)
    }

    fn start_request(&mut self, request: EndpointRequest) -> Result<StreamFormat, MeterError> {
        self.stop();
        self.state = CaptureState::Starting;
        self.format = None;
        self.ring = None;

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(CaptureCounters::default());
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<ReadyState, MeterError>>(1);

        let host = Arc::clone(&self.host);
        let config = self.config.clone();
        let callback = self.callback.clone();
        let thread_running = Arc::clone(&running);
        let thread_counters = Arc::clone(&counters);
        let thread_request = request.clone();

        let spawned = thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.into())
            .spawn(move || {
                let mut endpoint = match open_and_start(host.as_ref(), &thread_request) {
                    Ok(endpoint) => endpoint,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let format = endpoint.format();
                let ring = Arc::new(RingBuffer::new(
                    config.ring_capacity(format.sample_rate, format.channels),
                ));
                let ready = ReadyState {
                    format,
                    ring: Arc::clone(&ring),
                    waker: endpoint.waker(),
                };
                if ready_tx.send(Ok(ready)).is_err() {
                    release_endpoint(endpoint.as_mut());
                    return;
                }
                drop(ready_tx);

                endpoint.raise_priority();
                let capture = CaptureLoop {
                    ring,
                    callback,
                    running: thread_running,
                    counters: thread_counters,
                    wait_timeout: Duration::from_millis(config.wait_timeout_ms),
                };
                capture.run(endpoint.as_mut());
                release_endpoint(endpoint.as_mut());
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.state = CaptureState::Idle;
                return Err(MeterError::Thread(format!("failed to spawn capture thread: {}", e)));
            }
        };

        let ready = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                let _ = handle.join();
                self.state = CaptureState::Idle;
                log::warn!("capture start failed for {:?}: {}", request, e);
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                self.state = CaptureState::Idle;
                return Err(MeterError::Thread("capture thread exited during startup".into()));
            }
        };

        log::info!(
            "capture started: device={:?} loopback={} rate={} channels={} ring={} samples",
            if request.uses_default_device() { "<default>" } else { request.device_id.as_str() },
            request.is_loopback,
            ready.format.sample_rate,
            ready.format.channels,
            ready.ring.capacity()
        );

        self.format = Some(ready.format);
        self.ring = Some(ready.ring);
        self.waker = Some(ready.waker);
        self.running = running;
        self.counters = counters;
        self.handle = Some(handle);
        self.request = Some(request);
        self.state = CaptureState::Running;
        Ok(ready.format)
    }

    /// Wake and join the capture thread, then release the endpoint.
    ///
    /// No-op when idle. Samples already in the ring stay readable until the
    /// next [`start`](Self::start).
    pub fn stop(&mut self) {
        if self.state.is_idle() && self.handle.is_none() {
            return;
        }
        self.state = CaptureState::Stopping;

        self.running.store(false, Ordering::Release);
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }

        self.state = CaptureState::Idle;
        log::info!("capture stopped");
    }

    /// Pop up to `dest.len()` samples from the ring. Returns how many were
    /// written.
    pub fn get_samples(&self, dest: &mut [f32]) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.pop(dest))
    }

    pub fn samples_available(&self) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.available())
    }

    /// Copy the most recent samples into `dest` without consuming them.
    pub fn peek_recent(&self, dest: &mut [f32]) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.peek_recent(dest))
    }

    /// Ring size in samples for the current format; zero before the first start.
    pub fn ring_capacity(&self) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.capacity())
    }

    /// Samples the producer overwrote before the consumer read them.
    pub fn overwritten_samples(&self) -> u64 {
        self.ring.as_ref().map_or(0, |ring| ring.overwritten())
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state.is_running()
    }

    /// Format negotiated by the last successful start.
    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    pub fn request(&self) -> Option<&EndpointRequest> {
        self.request.as_ref()
    }

    /// Whether the endpoint has gone `limit` consecutive waits without
    /// signaling while the session is running.
    pub fn is_stalled(&self, limit: u32) -> bool {
        self.is_capturing() && self.counters.consecutive_timeouts.load(Ordering::Relaxed) >= limit
    }

    pub fn diagnostics(&self) -> CaptureDiagnostics {
        CaptureDiagnostics {
            packets_captured: self.counters.packets.load(Ordering::Relaxed),
            silent_packets: self.counters.silent_packets.load(Ordering::Relaxed),
            fetch_errors: self.counters.fetch_errors.load(Ordering::Relaxed),
            wait_timeouts: self.counters.wait_timeouts.load(Ordering::Relaxed),
            samples_overwritten: self.overwritten_samples(),
        }
    }
}

impl<H: AudioHost> Drop for CaptureSession<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_and_start(
    host: &dyn AudioHost,
    request: &EndpointRequest,
) -> Result<Box<dyn CaptureEndpoint>, MeterError> {
    let mut endpoint = host.open_endpoint(request)?;
    let format = endpoint.format();
    if format.sample_rate == 0 || format.channels == 0 {
        return Err(MeterError::FormatNegotiation(format!(
            "endpoint reported an unusable mix format: {} Hz, {} channel(s)",
            format.sample_rate, format.channels
        )));
    }
    endpoint.start()?;
    Ok(endpoint)
}

/// Stop the stream before the endpoint is dropped. Returns whether the
/// platform accepted the stop.
fn release_endpoint(endpoint: &mut dyn CaptureEndpoint) -> bool {
    match endpoint.stop() {
        Ok(()) => true,
        Err(e) => {
            log::warn!("failed to stop audio client: {}", e);
            false
        }
    }
}

impl CaptureLoop {
    /// Wait, drain, repeat until the running flag drops.
    fn run(&self, endpoint: &mut dyn CaptureEndpoint) {
        while self.running.load(Ordering::Acquire) {
            match endpoint.wait(self.wait_timeout) {
                Ok(WaitOutcome::Ready) => {
                    self.counters.consecutive_timeouts.store(0, Ordering::Relaxed);
                }
                Ok(WaitOutcome::TimedOut) => {
                    self.note_timeout();
                    continue;
                }
                Err(e) => {
                    log::trace!("capture wait failed: {}", e);
                    self.note_timeout();
                    thread::sleep(self.wait_timeout);
                    continue;
                }
            }

            if !self.running.load(Ordering::Acquire) {
                break;
            }

            if let Err(e) = endpoint.drain(&mut |packet| self.deliver(packet)) {
                self.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                log::trace!("capture buffer fetch failed: {}", e);
            }
        }
    }

    fn note_timeout(&self) {
        self.counters.wait_timeouts.fetch_add(1, Ordering::Relaxed);
        self.counters.consecutive_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn deliver(&self, packet: Packet<'_>) {
        self.counters.packets.fetch_add(1, Ordering::Relaxed);
        if packet.silent {
            self.counters.silent_packets.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let len = (packet.frames * packet.channels as usize).min(packet.samples.len());
        let samples = &packet.samples[..len];
        self.ring.push(samples);
        if let Some(callback) = &self.callback {
            callback(samples, packet.frames, packet.channels);
        }
    }
}
