use std::time::Duration;

use thiserror::Error;

/// Failures raised by the ANT+ side of the bridge.
///
/// Both variants are fatal at startup. A dropout at runtime is not an error,
/// it is a state transition (see [`crate::bridge::BridgeState`]).
#[derive(Error, Debug)]
pub enum AntError {
    #[error("ANT+ radio unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("ANT+ channel configuration rejected: {0}")]
    ChannelConfigRejected(String),
}

/// Failures raised by the BLE side of the bridge.
#[derive(Error, Debug)]
pub enum BleError {
    #[error("BLE adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("GATT registration rejected: {0}")]
    RegistrationRejected(String),
    /// Per-client send failure. Isolated to the offending client and
    /// logged by the peripheral, never escalated.
    #[error("notification send failed: {0}")]
    NotifyFailed(String),
}

/// Represents all possible errors that can occur during the bridge's lifecycle
#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("error parsing config: {0}")]
    ConfigFile(#[from] config::ConfigError),
    #[error(transparent)]
    Ant(#[from] AntError),
    #[error(transparent)]
    Ble(#[from] BleError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML Serialization Error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    /// A component missed the shutdown grace period and was aborted.
    /// Logged by the supervisor, the process still exits with code 0.
    #[error("component failed to stop within {0:?}")]
    ShutdownTimeout(Duration),
}

impl AppError {
    /// Process exit code convention: 1 for configuration problems,
    /// 2 for ANT+ startup failures, 3 for BLE startup failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Ant(_) => 2,
            AppError::Ble(_) => 3,
            _ => 1,
        }
    }
}
