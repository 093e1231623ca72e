//! `quadbridge-link` – the stateful side of the bridge.
//!
//! Owns the persistent TCP session to the robot's controller and everything
//! that runs for the lifetime of that session.
//!
//! # Modules
//!
//! - [`connection`] – [`RobotLink`]: connect / send / disconnect over a
//!   single-slot session, serialised lifecycle transitions.
//! - [`framing`] – [`FrameReader`]: turns the byte stream into
//!   record-aligned text chunks.
//! - [`receiver`] – the telemetry receive loop and per-record dispatch.
//! - [`state`] – [`StateStore`]: snapshot-publishing robot state shared
//!   between the receive loop and request handlers.
//! - [`video`] – length-prefixed JPEG receiver and capture-gate pump.

pub mod connection;
pub mod framing;
pub mod receiver;
pub mod state;
pub mod video;

pub use connection::{DEFAULT_COMMAND_PORT, DEFAULT_VIDEO_PORT, LinkConfig, RobotLink};
pub use framing::FrameReader;
pub use state::StateStore;
pub use video::VideoFeed;
