//! `quadbridge-types` – shared vocabulary for the quadbridge workspace.
//!
//! Everything that crosses a crate boundary lives here: the control
//! protocol's command codes and typed frame builder ([`command`]), the
//! receive-side record grammar ([`telemetry`]), the [`RobotState`] snapshot
//! published by the link layer, and the workspace-wide [`BridgeError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod command;
pub mod telemetry;

pub use command::{Command, CommandCode, CommandFrame, HeadAxis, Speed};
pub use telemetry::{RecordError, TelemetryRecord};

/// Distance reading reported before the robot has sent any sonic telemetry.
pub const DEFAULT_DISTANCE: &str = "0cm";

/// Power reading reported before the robot has sent any power telemetry.
pub const DEFAULT_POWER: &str = "0";

/// Snapshot of everything the bridge knows about the robot.
///
/// The link layer publishes a fresh snapshot on every mutation; readers
/// always observe both power rails from the same telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    /// `true` while a control session to the robot is live.
    pub connected: bool,
    /// Last distance reading with its unit suffix, e.g. `"37cm"`.
    pub distance: String,
    /// Last servo-rail voltage, raw as received (no unit).
    pub power_servo: String,
    /// Last Raspberry Pi rail voltage, raw as received (no unit).
    pub power_rasp: String,
    /// Speed inserted into every move frame.
    pub move_speed: Speed,
    /// Bumped once per applied distance record.
    pub distance_seq: u64,
    /// Bumped once per applied power record.
    pub power_seq: u64,
    /// Wall-clock time of the last applied telemetry record.
    pub last_telemetry: Option<DateTime<Utc>>,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            connected: false,
            distance: DEFAULT_DISTANCE.to_string(),
            power_servo: DEFAULT_POWER.to_string(),
            power_rasp: DEFAULT_POWER.to_string(),
            move_speed: Speed::default(),
            distance_seq: 0,
            power_seq: 0,
            last_telemetry: None,
        }
    }
}

/// Workspace-wide error type spanning session lifecycle, transport, and
/// argument validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Not connected to the robot")]
    NotConnected,

    #[error("Already connected to {remote}")]
    AlreadyConnected { remote: String },

    #[error("Connect to {addr} failed: {details}")]
    Connect { addr: String, details: String },

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Invalid value for '{param}': {details}")]
    InvalidArgument { param: String, details: String },

    #[error("No camera image has been captured yet")]
    NoFrame,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP server error: {0}")]
    Server(String),
}

impl BridgeError {
    /// Shorthand for [`BridgeError::InvalidArgument`].
    pub fn invalid(param: &str, details: impl Into<String>) -> Self {
        BridgeError::InvalidArgument {
            param: param.to_string(),
            details: details.into(),
        }
    }
}
