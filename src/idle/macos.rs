//! Idle time on macOS from the IOKit `HIDIdleTime` registry property.

use core_foundation::base::TCFType;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use tracing::debug;

use super::{validate_reading, IdleProbe, ProbeError};

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    fn IOServiceGetMatchingService(
        main_port: u32,
        matching: core_foundation::base::CFTypeRef,
    ) -> u32;
    fn IOServiceMatching(name: *const std::os::raw::c_char) -> core_foundation::base::CFTypeRef;
    fn IORegistryEntryCreateCFProperty(
        entry: u32,
        key: core_foundation::string::CFStringRef,
        allocator: core_foundation::base::CFAllocatorRef,
        options: u32,
    ) -> core_foundation::base::CFTypeRef;
    fn IOObjectRelease(object: u32) -> i32;
}

/// Probe backed by the HID system's idle counter.
pub struct HidIdleProbe;

impl HidIdleProbe {
    /// Verify the HID system service is reachable.
    pub fn new() -> Result<Self, ProbeError> {
        let probe = Self;
        let seconds = probe.seconds_since_last_input()?;
        debug!("IOKit HIDIdleTime available ({:.1}s idle)", seconds);
        Ok(probe)
    }
}

impl IdleProbe for HidIdleProbe {
    fn seconds_since_last_input(&self) -> Result<f64, ProbeError> {
        let nanos = hid_idle_nanos()?;
        validate_reading(nanos as f64 / 1_000_000_000.0)
    }
}

fn hid_idle_nanos() -> Result<i64, ProbeError> {
    let service_name = std::ffi::CString::new("IOHIDSystem")
        .map_err(|e| ProbeError::Query(e.to_string()))?;

    unsafe {
        let matching = IOServiceMatching(service_name.as_ptr());
        if matching.is_null() {
            return Err(ProbeError::Query("IOServiceMatching returned null".into()));
        }

        // IOServiceGetMatchingService consumes the matching dictionary
        let service = IOServiceGetMatchingService(0, matching);
        if service == 0 {
            return Err(ProbeError::Query("IOHIDSystem service not found".into()));
        }

        let key = CFString::new("HIDIdleTime");
        let property = IORegistryEntryCreateCFProperty(
            service,
            key.as_concrete_TypeRef(),
            std::ptr::null(),
            0,
        );

        IOObjectRelease(service);

        if property.is_null() {
            return Err(ProbeError::Query("HIDIdleTime property missing".into()));
        }

        let cf_number: CFNumber = CFNumber::wrap_under_create_rule(property as _);
        cf_number
            .to_i64()
            .ok_or_else(|| ProbeError::Query("HIDIdleTime is not an integer".into()))
    }
}
