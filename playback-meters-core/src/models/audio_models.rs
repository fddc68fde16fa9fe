use serde::{Deserialize, Serialize};

/// Direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    /// Capture endpoint (microphone, line in).
    Input,
    /// Render endpoint (speakers, headphones); captured through loopback.
    Output,
}

/// Snapshot of one audio endpoint.
///
/// `id` is an opaque platform token. Compare it, store it, hand it back to
/// `start`; never parse it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
}

/// Format negotiated with the endpoint: whatever the hardware mix format is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Which endpoint a capture session should open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointRequest {
    /// Empty selects the platform default for the requested direction.
    pub device_id: String,
    /// Capture the mix of a render endpoint instead of a capture endpoint.
    pub is_loopback: bool,
    /// Requested OS-side buffering window in milliseconds.
    pub buffer_duration_ms: u32,
}

impl EndpointRequest {
    pub fn new(device_id: impl Into<String>, is_loopback: bool) -> Self {
        Self {
            device_id: device_id.into(),
            is_loopback,
            buffer_duration_ms: 1000,
        }
    }

    /// Direction used when `device_id` is empty.
    pub fn direction(&self) -> DeviceDirection {
        if self.is_loopback {
            DeviceDirection::Output
        } else {
            DeviceDirection::Input
        }
    }

    pub fn uses_default_device(&self) -> bool {
        self.device_id.is_empty()
    }
}

/// Instantaneous per-channel peak levels (linear, 0.0–1.0 nominal).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PeakLevels {
    pub left: f32,
    pub right: f32,
}

/// Diagnostics for a running capture session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureDiagnostics {
    pub packets_captured: u64,
    pub silent_packets: u64,
    pub fetch_errors: u64,
    pub wait_timeouts: u64,
    pub samples_overwritten: u64,
}
