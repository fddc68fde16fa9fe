use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::models::audio_models::{AudioDeviceInfo, DeviceDirection};
use crate::models::error::MeterError;
use crate::traits::audio_host::{AudioHost, EndpointCatalog};

#[derive(Debug, Default)]
struct DeviceLists {
    inputs: Vec<AudioDeviceInfo>,
    outputs: Vec<AudioDeviceInfo>,
}

/// Cached view of the platform's input and output endpoints.
///
/// Used at UI-driven moments (menu open, device-change notification), never
/// from the capture thread. [`refresh`](Self::refresh) builds both lists
/// completely and swaps them in at once, so readers see either the old or
/// the new snapshot. Getters hand out copies.
pub struct DeviceEnumerator {
    catalog: Mutex<Option<Box<dyn EndpointCatalog>>>,
    lists: RwLock<Arc<DeviceLists>>,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self {
            catalog: Mutex::new(None),
            lists: RwLock::new(Arc::new(DeviceLists::default())),
        }
    }

    /// Acquire the enumeration service and populate the lists.
    pub fn initialize(&self, host: &dyn AudioHost) -> Result<(), MeterError> {
        let catalog = host.enumeration()?;
        *self.catalog.lock() = Some(catalog);
        self.refresh();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.catalog.lock().is_some()
    }

    /// Re-query both directions and swap the cached lists.
    ///
    /// A direction that fails to enumerate comes back empty.
    pub fn refresh(&self) {
        let fresh = {
            let catalog = self.catalog.lock();
            let Some(catalog) = catalog.as_deref() else {
                log::debug!("device refresh skipped: enumerator not initialized");
                return;
            };
            DeviceLists {
                inputs: Self::enumerate(catalog, DeviceDirection::Input),
                outputs: Self::enumerate(catalog, DeviceDirection::Output),
            }
        };

        log::info!(
            "audio devices refreshed: {} input(s), {} output(s)",
            fresh.inputs.len(),
            fresh.outputs.len()
        );
        *self.lists.write() = Arc::new(fresh);
    }

    /// Release the enumeration service and drop the cached lists.
    pub fn shutdown(&self) {
        self.catalog.lock().take();
        *self.lists.write() = Arc::new(DeviceLists::default());
    }

    pub fn input_devices(&self) -> Vec<AudioDeviceInfo> {
        self.snapshot().inputs.clone()
    }

    pub fn output_devices(&self) -> Vec<AudioDeviceInfo> {
        self.snapshot().outputs.clone()
    }

    /// Inputs first, then outputs.
    pub fn all_devices(&self) -> Vec<AudioDeviceInfo> {
        let lists = self.snapshot();
        lists
            .inputs
            .iter()
            .chain(lists.outputs.iter())
            .cloned()
            .collect()
    }

    pub fn default_input_device(&self) -> Option<AudioDeviceInfo> {
        self.snapshot().inputs.iter().find(|d| d.is_default).cloned()
    }

    pub fn default_output_device(&self) -> Option<AudioDeviceInfo> {
        self.snapshot().outputs.iter().find(|d| d.is_default).cloned()
    }

    fn snapshot(&self) -> Arc<DeviceLists> {
        Arc::clone(&self.lists.read())
    }

    fn enumerate(catalog: &dyn EndpointCatalog, direction: DeviceDirection) -> Vec<AudioDeviceInfo> {
        let entries = match catalog.list(direction) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("failed to enumerate {:?} devices: {}", direction, e);
                return Vec::new();
            }
        };
        let default_id = catalog.default_id(direction);

        entries
            .into_iter()
            .map(|entry| AudioDeviceInfo {
                is_default: default_id.as_deref() == Some(entry.id.as_str()),
                id: entry.id,
                name: entry.name,
                direction,
            })
            .collect()
    }
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        Self::new()
    }
}
