//! Idle time on Windows using the GetLastInputInfo Win32 API.

use windows::Win32::System::SystemInformation::GetTickCount;
use windows::Win32::UI::Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO};

use super::{validate_reading, IdleProbe, ProbeError};

/// Probe comparing the last input tick against the current tick count.
pub struct LastInputProbe;

impl LastInputProbe {
    pub fn new() -> Result<Self, ProbeError> {
        let probe = Self;
        probe.seconds_since_last_input()?;
        Ok(probe)
    }
}

impl IdleProbe for LastInputProbe {
    fn seconds_since_last_input(&self) -> Result<f64, ProbeError> {
        let mut last_input = LASTINPUTINFO {
            cbSize: std::mem::size_of::<LASTINPUTINFO>() as u32,
            dwTime: 0,
        };

        let ok = unsafe { GetLastInputInfo(&mut last_input).as_bool() };
        if !ok {
            return Err(ProbeError::Query("GetLastInputInfo failed".into()));
        }

        // Both counters wrap after ~49.7 days
        let current_tick = unsafe { GetTickCount() };
        let idle_ms = current_tick.wrapping_sub(last_input.dwTime);
        validate_reading(f64::from(idle_ms) / 1000.0)
    }
}
