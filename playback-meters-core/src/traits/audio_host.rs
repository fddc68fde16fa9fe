use crate::models::audio_models::{DeviceDirection, EndpointRequest};
use crate::models::error::MeterError;
use crate::traits::capture_endpoint::CaptureEndpoint;

/// An endpoint as reported by the platform: opaque id plus friendly name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointEntry {
    pub id: String,
    pub name: String,
}

impl EndpointEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Handle to the platform's device-enumeration service.
///
/// Dropping it releases the service.
pub trait EndpointCatalog: Send {
    /// Active endpoints for one direction.
    fn list(&self, direction: DeviceDirection) -> Result<Vec<EndpointEntry>, MeterError>;

    /// Id of the platform default endpoint for `direction`, if there is one.
    fn default_id(&self, direction: DeviceDirection) -> Option<String>;
}

/// A platform audio backend.
///
/// Implemented by:
/// - `WasapiHost` (Windows)
/// - `SyntheticHost` (signal generator, any platform)
pub trait AudioHost: Send + Sync + 'static {
    /// Acquire the enumeration service.
    ///
    /// Fails with [`MeterError::EnumerationUnavailable`] when the platform API
    /// cannot be reached.
    fn enumeration(&self) -> Result<Box<dyn EndpointCatalog>, MeterError>;

    /// Resolve `request` to an endpoint, negotiate its native mix format and
    /// prepare an event-driven stream.
    ///
    /// Called on the capture thread; the returned endpoint never leaves it.
    /// Anything acquired before a failing step is released before returning.
    fn open_endpoint(&self, request: &EndpointRequest) -> Result<Box<dyn CaptureEndpoint>, MeterError>;
}
