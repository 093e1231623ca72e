//! `quadbridge-server` – HTTP API in front of the robot link.
//!
//! # Modules
//!
//! - [`server`] – [`BridgeServer`], the route table, and the shared
//!   [`AppContext`].
//! - [`handlers`] – one async handler per endpoint; path arguments are
//!   validated here.
//! - [`error`] – [`ApiError`] and the JSON error body.
//! - [`extract`] – [`PathArgs`](extract::PathArgs), path parameters with JSON
//!   rejections.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{AppContext, BridgeServer, DEFAULT_GRACE_PERIOD, DEFAULT_PORT, router};
