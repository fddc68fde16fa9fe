use std::sync::Arc;
use std::time::Duration;

use crate::models::audio_models::StreamFormat;
use crate::models::error::MeterError;

/// Callback invoked on the capture thread for every non-silent packet.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples, `frames * channels` long.
/// - `frames`: Number of frames in the packet.
/// - `channels`: Channel count of the negotiated format.
///
/// Runs synchronously on the real-time thread: no blocking, no allocation,
/// no calls back into the session's sample ring.
pub type AudioBufferCallback = Arc<dyn Fn(&[f32], usize, u16) + Send + Sync + 'static>;

/// One hardware packet, borrowed from the endpoint until the drain callback
/// returns.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub samples: &'a [f32],
    pub frames: usize,
    pub channels: u16,
    /// The platform marked this packet as silence; `samples` carry no signal.
    pub silent: bool,
}

/// Result of waiting on the endpoint's notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Signaled: frames may be ready, or a waker fired.
    Ready,
    TimedOut,
}

/// Wakes a capture thread blocked in [`CaptureEndpoint::wait`] from any thread.
pub trait EndpointWaker: Send + Sync {
    fn wake(&self);
}

/// An opened, negotiated endpoint stream. Lives on the capture thread only;
/// dropping it stops the stream and releases every platform handle.
pub trait CaptureEndpoint {
    /// Native mix format adopted from the hardware.
    fn format(&self) -> StreamFormat;

    fn start(&mut self) -> Result<(), MeterError>;

    fn stop(&mut self) -> Result<(), MeterError>;

    /// Raise the calling thread's scheduling priority until the endpoint is
    /// dropped. Best effort.
    fn raise_priority(&mut self) {}

    /// Block until frames are ready, a waker fires, or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, MeterError>;

    /// Hand every ready packet to `on_packet`, in order, and return how many
    /// were drained. A failing fetch ends the drain with an error; packets
    /// delivered before it stay delivered.
    fn drain(&mut self, on_packet: &mut dyn FnMut(Packet<'_>)) -> Result<usize, MeterError>;

    fn waker(&self) -> Arc<dyn EndpointWaker>;
}
