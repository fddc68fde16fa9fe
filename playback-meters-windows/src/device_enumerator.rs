//! Windows audio device enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list active capture (microphone) and render
//! (speaker/headphone) endpoints with their friendly names.

use windows::core::PCWSTR;
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use playback_meters_core::models::audio_models::DeviceDirection;
use playback_meters_core::models::error::MeterError;
use playback_meters_core::traits::audio_host::{EndpointCatalog, EndpointEntry};

use crate::com::take_pwstr;

pub(crate) fn data_flow(direction: DeviceDirection) -> EDataFlow {
    match direction {
        DeviceDirection::Input => eCapture,
        DeviceDirection::Output => eRender,
    }
}

pub(crate) fn create_enumerator() -> Result<IMMDeviceEnumerator, MeterError> {
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }.map_err(|e| {
        log::error!("failed to create device enumerator: {}", e);
        MeterError::EnumerationUnavailable
    })
}

/// Resolve an endpoint id, or the console default for `direction` when the id
/// is empty.
pub(crate) fn resolve_device(
    enumerator: &IMMDeviceEnumerator,
    device_id: &str,
    direction: DeviceDirection,
) -> Result<IMMDevice, MeterError> {
    unsafe {
        if device_id.is_empty() {
            return enumerator
                .GetDefaultAudioEndpoint(data_flow(direction), eConsole)
                .map_err(|_| MeterError::DeviceNotAvailable);
        }

        let wide: Vec<u16> = device_id.encode_utf16().chain(std::iter::once(0)).collect();
        enumerator
            .GetDevice(PCWSTR(wide.as_ptr()))
            .map_err(|_| MeterError::DeviceNotAvailable)
    }
}

pub(crate) fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe { device.GetId().ok().and_then(take_pwstr) }
}

/// `IMMDeviceEnumerator`-backed endpoint catalog.
pub struct WasapiCatalog {
    enumerator: IMMDeviceEnumerator,
}

// SAFETY: the enumerator is created in the multithreaded apartment, whose
// objects may be called from any MTA thread.
unsafe impl Send for WasapiCatalog {}

impl WasapiCatalog {
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, MeterError> {
        Ok(Self {
            enumerator: create_enumerator()?,
        })
    }

    /// Read the PKEY_Device_FriendlyName property from a device.
    fn friendly_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let store = device.OpenPropertyStore(STGM_READ).ok()?;
            let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
            let name = value.to_string();
            (!name.is_empty()).then_some(name)
        }
    }
}

impl EndpointCatalog for WasapiCatalog {
    fn list(&self, direction: DeviceDirection) -> Result<Vec<EndpointEntry>, MeterError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow(direction), DEVICE_STATE_ACTIVE)
                .map_err(|e| MeterError::Platform(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| MeterError::Platform(format!("GetCount failed: {}", e)))?;

            let mut entries = Vec::with_capacity(count as usize);
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = device_id(&device) else {
                    continue;
                };
                let name = Self::friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));
                entries.push(EndpointEntry::new(id, name));
            }
            Ok(entries)
        }
    }

    fn default_id(&self, direction: DeviceDirection) -> Option<String> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(data_flow(direction), eConsole)
                .ok()
                .and_then(|device| device_id(&device))
        }
    }
}
