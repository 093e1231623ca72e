//! Outbound side of the robot control protocol.
//!
//! A frame on the wire is `CODE#arg1#...#argN\n`. Callers never assemble
//! that string by hand: they build a typed [`Command`], whose arguments were
//! validated once at the edge (see [`parse_int`] and [`parse_in_range`]),
//! and encode it through [`CommandFrame`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::BridgeError;

/// Token separator inside a frame.
pub const FIELD_DELIMITER: char = '#';

/// Frame terminator.
pub const RECORD_TERMINATOR: char = '\n';

/// First token of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Move,
    LedMode,
    Led,
    Sonic,
    Buzzer,
    Head,
    Balance,
    Attitude,
    Position,
    Relax,
    Power,
    Calibration,
    Camera,
    ServoPower,
}

impl CommandCode {
    const ALL: [CommandCode; 14] = [
        CommandCode::Move,
        CommandCode::LedMode,
        CommandCode::Led,
        CommandCode::Sonic,
        CommandCode::Buzzer,
        CommandCode::Head,
        CommandCode::Balance,
        CommandCode::Attitude,
        CommandCode::Position,
        CommandCode::Relax,
        CommandCode::Power,
        CommandCode::Calibration,
        CommandCode::Camera,
        CommandCode::ServoPower,
    ];

    /// The literal token used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandCode::Move => "CMD_MOVE",
            CommandCode::LedMode => "CMD_LED_MOD",
            CommandCode::Led => "CMD_LED",
            CommandCode::Sonic => "CMD_SONIC",
            CommandCode::Buzzer => "CMD_BUZZER",
            CommandCode::Head => "CMD_HEAD",
            CommandCode::Balance => "CMD_BALANCE",
            CommandCode::Attitude => "CMD_ATTITUDE",
            CommandCode::Position => "CMD_POSITION",
            CommandCode::Relax => "CMD_RELAX",
            CommandCode::Power => "CMD_POWER",
            CommandCode::Calibration => "CMD_CALIBRATION",
            CommandCode::Camera => "CMD_CAMERA",
            CommandCode::ServoPower => "CMD_SERVOPOWER",
        }
    }

    /// Resolve a wire token. Returns `None` for codes this bridge does not know.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == token)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gait speed, always within `Speed::MIN..=Speed::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Speed(u8);

impl Speed {
    pub const MIN: u8 = 2;
    pub const MAX: u8 = 10;
    pub const DEFAULT: u8 = 8;

    pub fn new(value: u8) -> Result<Self, BridgeError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(BridgeError::invalid(
                "speed",
                format!("{value} is outside {}..={}", Self::MIN, Self::MAX),
            ))
        }
    }

    /// Parse a raw path argument.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let value = parse_in_range("speed", raw, Self::MIN as i32, Self::MAX as i32)?;
        Self::new(value as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<u8> for Speed {
    type Error = BridgeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Speed> for u8 {
    fn from(speed: Speed) -> Self {
        speed.0
    }
}

/// Which head servo a [`Command::Head`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadAxis {
    Vertical,
    Horizontal,
}

impl HeadAxis {
    fn wire_index(self) -> u8 {
        match self {
            HeadAxis::Vertical => 0,
            HeadAxis::Horizontal => 1,
        }
    }
}

/// Every command the bridge can send, with arguments already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Move {
        gait: u8,
        x: i32,
        y: i32,
        speed: Speed,
        angle: i32,
    },
    ServoPower { on: bool },
    Head { axis: HeadAxis, angle: u8 },
    Buzzer { on: bool },
    Balance { on: bool },
    /// Ask the robot for a distance report.
    SonicRequest,
    /// Ask the robot for a power report.
    PowerRequest,
    Position { x: i32, y: i32, z: i32 },
    Attitude { roll: i32, pitch: i32, yaw: i32 },
    LedMode { mode: u8 },
    LedColor { r: u8, g: u8, b: u8 },
}

impl Command {
    pub fn code(&self) -> CommandCode {
        match self {
            Command::Move { .. } => CommandCode::Move,
            Command::ServoPower { .. } => CommandCode::ServoPower,
            Command::Head { .. } => CommandCode::Head,
            Command::Buzzer { .. } => CommandCode::Buzzer,
            Command::Balance { .. } => CommandCode::Balance,
            Command::SonicRequest => CommandCode::Sonic,
            Command::PowerRequest => CommandCode::Power,
            Command::Position { .. } => CommandCode::Position,
            Command::Attitude { .. } => CommandCode::Attitude,
            Command::LedMode { .. } => CommandCode::LedMode,
            Command::LedColor { .. } => CommandCode::Led,
        }
    }

    /// Lay the arguments out in protocol order.
    pub fn to_frame(&self) -> CommandFrame {
        let frame = CommandFrame::new(self.code());
        match *self {
            Command::Move {
                gait,
                x,
                y,
                speed,
                angle,
            } => frame.arg(gait).arg(x).arg(y).arg(speed.get()).arg(angle),
            Command::ServoPower { on } | Command::Buzzer { on } | Command::Balance { on } => {
                frame.arg(u8::from(on))
            }
            Command::Head { axis, angle } => frame.arg(axis.wire_index()).arg(angle),
            Command::SonicRequest | Command::PowerRequest => frame,
            Command::Position { x, y, z } => frame.arg(x).arg(y).arg(z),
            Command::Attitude { roll, pitch, yaw } => frame.arg(roll).arg(pitch).arg(yaw),
            Command::LedMode { mode } => frame.arg(mode),
            // The controller expects a fixed 255 ahead of the colour triple.
            Command::LedColor { r, g, b } => frame.arg(255).arg(r).arg(g).arg(b),
        }
    }
}

/// An ordered token sequence keyed by its [`CommandCode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    code: CommandCode,
    args: Vec<String>,
}

impl CommandFrame {
    pub fn new(code: CommandCode) -> Self {
        Self {
            code,
            args: Vec::new(),
        }
    }

    /// Append one argument (builder-style).
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.args.push(value.to_string());
        self
    }

    pub fn code(&self) -> CommandCode {
        self.code
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The exact bytes written to the socket, terminator included.
    pub fn encode(&self) -> String {
        let mut out = self.to_string();
        out.push(RECORD_TERMINATOR);
        out
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code.as_str())?;
        for arg in &self.args {
            write!(f, "{FIELD_DELIMITER}{arg}")?;
        }
        Ok(())
    }
}

impl From<&Command> for CommandFrame {
    fn from(command: &Command) -> Self {
        command.to_frame()
    }
}

/// Parse a raw argument as an integer, naming `param` on failure.
pub fn parse_int(param: &str, raw: &str) -> Result<i32, BridgeError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| BridgeError::invalid(param, format!("'{raw}' is not an integer")))
}

/// Parse a raw argument as an integer within `min..=max`.
pub fn parse_in_range(param: &str, raw: &str, min: i32, max: i32) -> Result<i32, BridgeError> {
    let value = parse_int(param, raw)?;
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(BridgeError::invalid(
            param,
            format!("{value} is outside {min}..={max}"),
        ))
    }
}
