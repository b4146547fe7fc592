//! Idle-time probes with platform-specific implementations.

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "windows")]
mod windows;

use thiserror::Error;

/// Errors raised while querying the OS for idle time.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("idle time query failed: {0}")]
    Query(String),
    #[error("idle probe returned an invalid reading: {0}")]
    InvalidReading(f64),
    #[error("idle detection is not supported on this platform")]
    Unsupported,
}

/// Source of "seconds since the last keyboard or pointer input".
///
/// Implementations must be cheap enough to call once per poll cycle and must
/// report input system-wide, regardless of which application has focus.
pub trait IdleProbe: Send + Sync {
    fn seconds_since_last_input(&self) -> Result<f64, ProbeError>;
}

impl<P: IdleProbe + ?Sized> IdleProbe for Box<P> {
    fn seconds_since_last_input(&self) -> Result<f64, ProbeError> {
        (**self).seconds_since_last_input()
    }
}

/// Reject readings that cannot be an elapsed time.
pub fn validate_reading(seconds: f64) -> Result<f64, ProbeError> {
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(seconds)
    } else {
        Err(ProbeError::InvalidReading(seconds))
    }
}

#[cfg(target_os = "macos")]
pub use macos::HidIdleProbe as NativeProbe;
#[cfg(target_os = "linux")]
pub use linux::X11IdleProbe as NativeProbe;
#[cfg(target_os = "windows")]
pub use windows::LastInputProbe as NativeProbe;

/// Open the idle probe for the host operating system.
#[cfg(any(target_os = "macos", target_os = "linux", target_os = "windows"))]
pub fn native_probe() -> Result<NativeProbe, ProbeError> {
    NativeProbe::new()
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
pub fn native_probe() -> Result<Box<dyn IdleProbe>, ProbeError> {
    Err(ProbeError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl IdleProbe for Fixed {
        fn seconds_since_last_input(&self) -> Result<f64, ProbeError> {
            validate_reading(self.0)
        }
    }

    #[test]
    fn accepts_zero_and_positive_readings() {
        assert_eq!(validate_reading(0.0).unwrap(), 0.0);
        assert_eq!(validate_reading(12.5).unwrap(), 12.5);
    }

    #[test]
    fn rejects_negative_sentinel() {
        assert!(matches!(
            validate_reading(-1.0),
            Err(ProbeError::InvalidReading(v)) if v == -1.0
        ));
    }

    #[test]
    fn rejects_non_finite_readings() {
        assert!(validate_reading(f64::NAN).is_err());
        assert!(validate_reading(f64::INFINITY).is_err());
    }

    #[test]
    fn boxed_probe_delegates() {
        let probe: Box<dyn IdleProbe> = Box::new(Fixed(3.0));
        assert_eq!(probe.seconds_since_last_input().unwrap(), 3.0);

        let broken: Box<dyn IdleProbe> = Box::new(Fixed(-1.0));
        assert!(broken.seconds_since_last_input().is_err());
    }
}
