//! RAII wrappers for the COM and Win32 resources the WASAPI backend holds.

use std::cell::Cell;
use std::ffi::c_void;

use windows::core::{w, HRESULT, PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, RPC_E_CHANGED_MODE};
use windows::Win32::System::Com::{CoInitializeEx, CoTaskMemFree, CoUninitialize, COINIT_MULTITHREADED};
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW, CreateEventW, SetEvent,
};

use playback_meters_core::models::error::MeterError;
use playback_meters_core::traits::capture_endpoint::EndpointWaker;

/// Joins the calling thread to the multithreaded apartment; leaves it on drop.
///
/// A thread already in a single-threaded apartment is usable for MTA objects
/// through marshaling; in that case nothing is undone on drop.
pub struct CoUninitializeGuard {
    owned: bool,
}

impl CoUninitializeGuard {
    pub fn enter_mta() -> Result<Self, MeterError> {
        let hr: HRESULT = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { owned: false });
        }
        hr.ok()
            .map_err(|e| MeterError::Platform(format!("CoInitializeEx failed: {}", e)))?;
        Ok(Self { owned: true })
    }
}

impl Drop for CoUninitializeGuard {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

thread_local! {
    static THREAD_IN_MTA: Cell<bool> = const { Cell::new(false) };
}

/// Join the MTA once for the lifetime of the calling thread.
///
/// For threads that hand out enumeration objects and outlive them (the UI
/// thread); the capture thread uses [`CoUninitializeGuard`] instead.
pub fn ensure_thread_mta() -> Result<(), MeterError> {
    if THREAD_IN_MTA.with(Cell::get) {
        return Ok(());
    }
    let guard = CoUninitializeGuard::enter_mta()?;
    std::mem::forget(guard);
    THREAD_IN_MTA.with(|flag| flag.set(true));
    Ok(())
}

/// Memory returned by a COM call that the caller must free with `CoTaskMemFree`.
pub struct CoTaskMem<T>(pub *mut T);

impl<T> CoTaskMem<T> {
    pub fn as_ptr(&self) -> *mut T {
        self.0
    }
}

impl<T> Drop for CoTaskMem<T> {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CoTaskMemFree(Some(self.0 as *const c_void)) };
        }
    }
}

/// Copy a COM-allocated wide string and free it.
pub fn take_pwstr(value: PWSTR) -> Option<String> {
    let owned = CoTaskMem(value.0);
    if owned.as_ptr().is_null() {
        return None;
    }
    unsafe { value.to_string().ok() }
}

/// Auto-reset Win32 event. Closed when the last reference drops, so a waker
/// outliving the endpoint never signals a recycled handle.
pub struct OwnedEvent(HANDLE);

// SAFETY: event handles are process-wide kernel objects; SetEvent and
// WaitForSingleObject may be called from any thread.
unsafe impl Send for OwnedEvent {}
unsafe impl Sync for OwnedEvent {}

impl OwnedEvent {
    pub fn new() -> Result<Self, MeterError> {
        let handle = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map_err(|e| MeterError::ResourceExhausted(format!("CreateEventW failed: {}", e)))?;
        Ok(Self(handle))
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }
}

impl EndpointWaker for OwnedEvent {
    fn wake(&self) {
        if let Err(e) = unsafe { SetEvent(self.0) } {
            log::warn!("SetEvent failed: {}", e);
        }
    }
}

impl Drop for OwnedEvent {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// MMCSS "Pro Audio" registration for the calling thread; reverted on drop.
pub struct MmcssGuard(HANDLE);

impl MmcssGuard {
    pub fn pro_audio() -> Result<Self, MeterError> {
        let mut task_index: u32 = 0;
        let handle = unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) }
            .map_err(|e| MeterError::Platform(format!("AvSetMmThreadCharacteristicsW failed: {}", e)))?;
        Ok(Self(handle))
    }
}

impl Drop for MmcssGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = AvRevertMmThreadCharacteristics(self.0);
        }
    }
}
