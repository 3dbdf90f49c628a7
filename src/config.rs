//! # Configuration
//!
//! Runtime settings come from a JSON file (`config.json` by default). Secrets
//! never live there: the decryption key and the optional authentication key
//! are read from the environment.
//!
//! ```json
//! {
//!     "port": "/dev/ttyUSB0",
//!     "baudrate": 2400,
//!     "print_value": true,
//!     "persist": true
//! }
//! ```

use crate::acquisition::LoopSettings;
use crate::constants::{
    CYCLE_PAUSE, DEFAULT_BAUDRATE, ENV_AUTHENTICATION_KEY, ENV_DECRYPTION_KEY,
    LINK_HEALTH_DEADLINE, RECOVERY_PAUSE,
};
use crate::dlms::security::{AesKey, Decryptor};
use crate::error::MeterError;
use crate::mbus::serial::SerialConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Serial device of the customer interface
    pub port: String,
    #[serde(default = "Config::default_baudrate")]
    pub baudrate: u32,
    /// Print every reading as a table on stdout
    #[serde(default, alias = "printValue")]
    pub print_value: bool,
    /// Store readings in `sink_path`
    #[serde(default = "Config::default_persist", alias = "usePostgres")]
    pub persist: bool,
    #[serde(default = "Config::default_sink_path")]
    pub sink_path: PathBuf,
    /// Log to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "Config::default_link_deadline_secs")]
    pub link_deadline_secs: u64,
    #[serde(default = "Config::default_cycle_pause_secs")]
    pub cycle_pause_secs: u64,
    #[serde(default = "Config::default_recovery_pause_ms")]
    pub recovery_pause_ms: u64,
    /// Reject frames that carry no GCM tag. EVN meters send untagged frames,
    /// so enabling this turns on tamper detection and also rejects their
    /// telegrams unless the meter is switched to the tagged suite.
    #[serde(default)]
    pub require_authentication: bool,
}

impl Config {
    fn default_baudrate() -> u32 {
        DEFAULT_BAUDRATE
    }
    fn default_persist() -> bool {
        true
    }
    fn default_sink_path() -> PathBuf {
        PathBuf::from("smartmeter.jsonl")
    }
    fn default_link_deadline_secs() -> u64 {
        LINK_HEALTH_DEADLINE.as_secs()
    }
    fn default_cycle_pause_secs() -> u64 {
        CYCLE_PAUSE.as_secs()
    }
    fn default_recovery_pause_ms() -> u64 {
        RECOVERY_PAUSE.as_millis() as u64
    }

    /// Reads and validates the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MeterError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MeterError::Config(format!(
                "{} was not found",
                path.display()
            )));
        }
        let txt = fs::read_to_string(path)
            .map_err(|e| MeterError::Config(format!("{} can not be read: {e}", path.display())))?;
        Self::from_json(&txt)
    }

    pub fn from_json(txt: &str) -> Result<Self, MeterError> {
        let cfg: Config =
            serde_json::from_str(txt).map_err(|e| MeterError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), MeterError> {
        if self.port.trim().is_empty() {
            return Err(MeterError::Config("port must not be empty".into()));
        }
        if self.baudrate == 0 {
            return Err(MeterError::Config("baudrate must be positive".into()));
        }
        if self.link_deadline_secs == 0 {
            return Err(MeterError::Config("link_deadline_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            baudrate: self.baudrate,
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            link_deadline: Duration::from_secs(self.link_deadline_secs),
            cycle_pause: Duration::from_secs(self.cycle_pause_secs),
            recovery_pause: Duration::from_millis(self.recovery_pause_ms),
            print_value: self.print_value,
        }
    }
}

/// Builds the decryptor from the process environment.
///
/// Only `EVN_SCHLUESSEL` (required, 32 hex characters) and `EVN_AUTH_KEY`
/// (optional) are read. No `.env` file is loaded; export the variables in the
/// service unit or shell instead. The other settings come from the JSON file,
/// where only `port` is mandatory.
pub fn decryptor_from_env(require_authentication: bool) -> Result<Decryptor, MeterError> {
    decryptor_from_lookup(|name| std::env::var(name).ok(), require_authentication)
}

/// Builds the decryptor from the variables `lookup` resolves.
pub fn decryptor_from_lookup<F>(lookup: F, require_authentication: bool) -> Result<Decryptor, MeterError>
where
    F: Fn(&str) -> Option<String>,
{
    let key = lookup(ENV_DECRYPTION_KEY)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| MeterError::Key(format!("{ENV_DECRYPTION_KEY} is not set")))?;
    let key = AesKey::from_hex(&key)
        .map_err(|e| MeterError::Key(format!("{ENV_DECRYPTION_KEY}: {e}")))?;

    let mut decryptor = Decryptor::new(key).require_authentication(require_authentication);
    if let Some(auth) = lookup(ENV_AUTHENTICATION_KEY).filter(|value| !value.trim().is_empty()) {
        let auth = AesKey::from_hex(&auth)
            .map_err(|e| MeterError::Key(format!("{ENV_AUTHENTICATION_KEY}: {e}")))?;
        decryptor = decryptor.with_authentication_key(auth);
    }
    Ok(decryptor)
}
