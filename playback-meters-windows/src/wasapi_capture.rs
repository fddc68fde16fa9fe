//! Event-driven WASAPI capture endpoint, for capture devices and for
//! loopback of render devices.
//!
//! Sequence on open (all on the capture thread):
//! 1. CoInitializeEx (MTA)
//! 2. Resolve the endpoint (explicit id or console default)
//! 3. Activate IAudioClient and read its shared-mode mix format
//! 4. Initialize shared mode with EVENTCALLBACK (plus LOOPBACK for render)
//! 5. SetEventHandle, GetService(IAudioCaptureClient)
//!
//! The mix format is adopted as-is; shared-mode engines deliver 32-bit float.

use std::sync::Arc;
use std::time::Duration;

use windows::core::GUID;
use windows::Win32::Foundation::{WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::CLSCTX_ALL;
use windows::Win32::System::Threading::WaitForSingleObject;

use playback_meters_core::models::audio_models::{EndpointRequest, StreamFormat};
use playback_meters_core::models::error::MeterError;
use playback_meters_core::traits::capture_endpoint::{CaptureEndpoint, EndpointWaker, Packet, WaitOutcome};

use crate::com::{CoTaskMem, CoUninitializeGuard, MmcssGuard, OwnedEvent};
use crate::device_enumerator::{create_enumerator, device_id, resolve_device};

const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;
const KSDATAFORMAT_SUBTYPE_IEEE_FLOAT: GUID = GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);

/// 100-nanosecond units per millisecond.
const REFTIMES_PER_MS: i64 = 10_000;

/// Check that the mix format carries 32-bit float samples.
///
/// # Safety
/// `format` must point at a valid `WAVEFORMATEX` (or `WAVEFORMATEXTENSIBLE`
/// when its tag says so).
unsafe fn is_float32(format: *const WAVEFORMATEX) -> bool {
    let tag = (*format).wFormatTag;
    let bits = (*format).wBitsPerSample;
    if bits != 32 {
        return false;
    }
    match tag {
        WAVE_FORMAT_IEEE_FLOAT => true,
        WAVE_FORMAT_EXTENSIBLE => {
            let extensible = format as *const WAVEFORMATEXTENSIBLE;
            let sub_format = std::ptr::addr_of!((*extensible).SubFormat).read_unaligned();
            sub_format == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT
        }
        _ => false,
    }
}

/// An opened, initialized WASAPI stream.
///
/// Field order is drop order: COM interfaces are released before the
/// apartment guard leaves the MTA.
pub struct WasapiCaptureEndpoint {
    capture_client: IAudioCaptureClient,
    audio_client: IAudioClient,
    event: Arc<OwnedEvent>,
    format: StreamFormat,
    started: bool,
    mmcss: Option<MmcssGuard>,
    _com: CoUninitializeGuard,
}

impl WasapiCaptureEndpoint {
    /// Open the endpoint `request` names on the calling thread.
    pub fn open(request: &EndpointRequest) -> Result<Self, MeterError> {
        let com = CoUninitializeGuard::enter_mta()?;

        unsafe {
            let enumerator = create_enumerator().map_err(|_| MeterError::DeviceNotAvailable)?;
            let device = resolve_device(&enumerator, &request.device_id, request.direction())?;

            let audio_client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| MeterError::FormatNegotiation(format!("Activate failed: {}", e)))?;

            let mix_format = CoTaskMem(
                audio_client
                    .GetMixFormat()
                    .map_err(|e| MeterError::FormatNegotiation(format!("GetMixFormat failed: {}", e)))?,
            );
            let mix = mix_format.as_ptr();
            if !is_float32(mix) {
                return Err(MeterError::FormatNegotiation(format!(
                    "unsupported mix format: tag {:#06x}, {} bits",
                    { (*mix).wFormatTag },
                    { (*mix).wBitsPerSample }
                )));
            }
            let format = StreamFormat::new((*mix).nSamplesPerSec, (*mix).nChannels);

            let mut stream_flags = AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_NOPERSIST;
            if request.is_loopback {
                stream_flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
            }
            let buffer_duration = i64::from(request.buffer_duration_ms) * REFTIMES_PER_MS;

            audio_client
                .Initialize(AUDCLNT_SHAREMODE_SHARED, stream_flags, buffer_duration, 0, mix, None)
                .map_err(|e| MeterError::FormatNegotiation(format!("IAudioClient::Initialize failed: {}", e)))?;

            let event = Arc::new(OwnedEvent::new()?);
            audio_client
                .SetEventHandle(event.raw())
                .map_err(|e| MeterError::ResourceExhausted(format!("SetEventHandle failed: {}", e)))?;

            let capture_client: IAudioCaptureClient = audio_client
                .GetService()
                .map_err(|e| MeterError::FormatNegotiation(format!("GetService failed: {}", e)))?;

            log::debug!(
                "opened {} endpoint {}: {} Hz, {} channel(s)",
                if request.is_loopback { "loopback" } else { "capture" },
                device_id(&device).unwrap_or_default(),
                format.sample_rate,
                format.channels
            );

            Ok(Self {
                capture_client,
                audio_client,
                event,
                format,
                started: false,
                mmcss: None,
                _com: com,
            })
        }
    }

    fn next_packet_size(&self) -> Result<u32, MeterError> {
        unsafe { self.capture_client.GetNextPacketSize() }
            .map_err(|e| MeterError::BufferFetch(format!("GetNextPacketSize failed: {}", e)))
    }
}

impl CaptureEndpoint for WasapiCaptureEndpoint {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn start(&mut self) -> Result<(), MeterError> {
        unsafe { self.audio_client.Start() }
            .map_err(|e| MeterError::Platform(format!("IAudioClient::Start failed: {}", e)))?;
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MeterError> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        unsafe { self.audio_client.Stop() }
            .map_err(|e| MeterError::Platform(format!("IAudioClient::Stop failed: {}", e)))
    }

    fn raise_priority(&mut self) {
        match MmcssGuard::pro_audio() {
            Ok(guard) => self.mmcss = Some(guard),
            Err(e) => log::debug!("capture thread keeps normal priority: {}", e),
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, MeterError> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let result = unsafe { WaitForSingleObject(self.event.raw(), millis) };
        if result == WAIT_OBJECT_0 {
            Ok(WaitOutcome::Ready)
        } else if result == WAIT_TIMEOUT {
            Ok(WaitOutcome::TimedOut)
        } else {
            Err(MeterError::Platform(format!("WaitForSingleObject returned {:#x}", result.0)))
        }
    }

    fn drain(&mut self, on_packet: &mut dyn FnMut(Packet<'_>)) -> Result<usize, MeterError> {
        let channels = self.format.channels;
        let mut drained = 0;

        while self.next_packet_size()? > 0 {
            let mut data: *mut u8 = std::ptr::null_mut();
            let mut frames: u32 = 0;
            let mut flags: u32 = 0;

            unsafe {
                self.capture_client
                    .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                    .map_err(|e| MeterError::BufferFetch(format!("GetBuffer failed: {}", e)))?;

                if frames > 0 && !data.is_null() {
                    let len = frames as usize * usize::from(channels);
                    on_packet(Packet {
                        samples: std::slice::from_raw_parts(data as *const f32, len),
                        frames: frames as usize,
                        channels,
                        silent: flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0,
                    });
                }

                self.capture_client
                    .ReleaseBuffer(frames)
                    .map_err(|e| MeterError::BufferFetch(format!("ReleaseBuffer failed: {}", e)))?;
            }
            drained += 1;
        }
        Ok(drained)
    }

    fn waker(&self) -> Arc<dyn EndpointWaker> {
        self.event.clone()
    }
}

impl Drop for WasapiCaptureEndpoint {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(tag: u16, bits: u16) -> WAVEFORMATEX {
        WAVEFORMATEX {
            wFormatTag: tag,
            nChannels: 2,
            nSamplesPerSec: 48_000,
            wBitsPerSample: bits,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_ieee_float_mix_format() {
        let format = plain(WAVE_FORMAT_IEEE_FLOAT, 32);
        assert!(unsafe { is_float32(&format) });
    }

    #[test]
    fn rejects_integer_pcm() {
        let format = plain(0x0001, 16);
        assert!(!unsafe { is_float32(&format) });
    }

    #[test]
    fn reads_extensible_sub_format() {
        let mut extensible = WAVEFORMATEXTENSIBLE {
            Format: plain(WAVE_FORMAT_EXTENSIBLE, 32),
            SubFormat: KSDATAFORMAT_SUBTYPE_IEEE_FLOAT,
            ..Default::default()
        };
        let ptr = std::ptr::addr_of!(extensible) as *const WAVEFORMATEX;
        assert!(unsafe { is_float32(ptr) });

        extensible.SubFormat = GUID::zeroed();
        let ptr = std::ptr::addr_of!(extensible) as *const WAVEFORMATEX;
        assert!(!unsafe { is_float32(ptr) });
    }
}
