//! `AudioHost` implementation for Windows.

use playback_meters_core::models::audio_models::EndpointRequest;
use playback_meters_core::models::error::MeterError;
use playback_meters_core::traits::audio_host::{AudioHost, EndpointCatalog};
use playback_meters_core::traits::capture_endpoint::CaptureEndpoint;

use crate::com::ensure_thread_mta;
use crate::device_enumerator::WasapiCatalog;
use crate::wasapi_capture::WasapiCaptureEndpoint;

/// WASAPI shared-mode backend.
///
/// Enumeration joins the calling thread to the MTA for the rest of its life;
/// capture endpoints join and leave it on the capture thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiHost;

impl WasapiHost {
    pub fn new() -> Self {
        Self
    }
}

impl AudioHost for WasapiHost {
    fn enumeration(&self) -> Result<Box<dyn EndpointCatalog>, MeterError> {
        ensure_thread_mta().map_err(|e| {
            log::error!("COM unavailable for device enumeration: {}", e);
            MeterError::EnumerationUnavailable
        })?;
        Ok(Box::new(WasapiCatalog::new()?))
    }

    fn open_endpoint(&self, request: &EndpointRequest) -> Result<Box<dyn CaptureEndpoint>, MeterError> {
        Ok(Box::new(WasapiCaptureEndpoint::open(request)?))
    }
}
