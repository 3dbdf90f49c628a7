//! Logger setup and logging helpers.
//!
//! Log output goes through the `log` facade with an `env_logger` backend.
//! `RUST_LOG` overrides the default `info` level.

use crate::error::MeterError;
use crate::util::hex::format_hex_compact;
use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::{debug, error, info, log_enabled, Level};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

/// Bytes shown by [`log_frame_hex`] before the dump is cut off.
const MAX_LOG_BYTES: usize = 64;

fn builder() -> Builder {
    Builder::from_env(Env::default().default_filter_or("info"))
}

/// Initializes the logger on stderr.
pub fn init_logger() {
    // A second initialization keeps the first logger.
    let _ = builder().try_init();
}

/// Initializes the logger appending to `path`.
pub fn init_logger_to_file(path: impl AsRef<Path>) -> Result<(), MeterError> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MeterError::Config(format!("{}: {e}", path.display())))?;

    builder()
        .target(Target::Pipe(Box::new(file)))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .try_init()
        .map_err(|e| MeterError::Config(e.to_string()))
}

/// Logs frame data in hex at debug level, capped at 64 bytes.
pub fn log_frame_hex(prefix: &str, data: &[u8]) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    let shown = &data[..data.len().min(MAX_LOG_BYTES)];
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };
    debug!("{prefix}: {}{suffix}", format_hex_compact(shown));
}

/// Rate limit for repeated log messages, e.g. framing errors on a noisy line.
#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    cap: u32,
    count: u32,
    suppressed: u32,
    t0: Instant,
}

impl LogThrottle {
    /// Allows `cap` messages per `window`.
    pub fn new(window: Duration, cap: u32) -> Self {
        Self {
            window,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Returns `true` if the next message should be logged.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.t0) > self.window {
            if self.suppressed > 0 {
                info!("{} similar messages suppressed", self.suppressed);
            }
            self.t0 = now;
            self.count = 0;
            self.suppressed = 0;
        }

        self.count += 1;
        let allowed = self.count <= self.cap;
        if !allowed {
            self.suppressed += 1;
        }
        allowed
    }

    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }
}

/// Logs an error message. Before a logger is installed, for example when the
/// configuration could not be read, the message goes to stderr instead.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    } else {
        eprintln!("Error: {message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_caps_messages() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60), 2);
        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(!throttle.allow());
        assert!(!throttle.allow());
        assert_eq!(throttle.suppressed(), 2);
    }

    #[test]
    fn test_throttle_window_resets() {
        let mut throttle = LogThrottle::new(Duration::ZERO, 1);
        assert!(throttle.allow());
        std::thread::sleep(Duration::from_millis(2));
        assert!(throttle.allow());
    }

    #[test]
    fn test_log_error_without_logger() {
        // No logger is installed in unit tests, so this takes the stderr path.
        assert!(!log_enabled!(Level::Error));
        log_error("configuration missing");
    }

    #[test]
    fn test_log_frame_hex_handles_long_input() {
        log_frame_hex("window", &[0x68; 300]);
        log_frame_hex("empty", &[]);
    }
}
