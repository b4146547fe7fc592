//! Idle time on Linux using the X11 XScreenSaver extension.

use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::screensaver::ConnectionExt as ScreensaverConnectionExt;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::{validate_reading, IdleProbe, ProbeError};

/// Probe holding one X11 connection for the lifetime of the watcher.
pub struct X11IdleProbe {
    conn: RustConnection,
    root: Window,
}

impl X11IdleProbe {
    /// Connect to `$DISPLAY` and check that XScreenSaver answers.
    pub fn new() -> Result<Self, ProbeError> {
        let (conn, screen_num) = RustConnection::connect(None).map_err(|e| {
            ProbeError::Query(format!("failed to connect to X11 display, is DISPLAY set? {e}"))
        })?;
        let root = conn.setup().roots[screen_num].root;

        let probe = Self { conn, root };
        let seconds = probe.seconds_since_last_input()?;
        debug!("XScreenSaver available ({:.1}s idle)", seconds);
        Ok(probe)
    }
}

impl IdleProbe for X11IdleProbe {
    fn seconds_since_last_input(&self) -> Result<f64, ProbeError> {
        let reply = self
            .conn
            .screensaver_query_info(self.root)
            .map_err(|e| ProbeError::Query(format!("XScreenSaver extension not available: {e}")))?
            .reply()
            .map_err(|e| ProbeError::Query(format!("failed to query XScreenSaver info: {e}")))?;

        validate_reading(f64::from(reply.ms_since_user_input) / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires X11 display
    fn reads_idle_time_from_display() {
        let probe = X11IdleProbe::new().unwrap();
        let seconds = probe.seconds_since_last_input().unwrap();
        assert!(seconds >= 0.0);
    }
}
