//! Request handlers.
//!
//! Path segments arrive as raw strings and are validated here so a bad value
//! produces a 400 naming the parameter instead of a routing rejection.
//! Routes with optional arguments get a pair of handlers: one for the bare
//! path that fills in the defaults, one for the full path.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use quadbridge_types::command::{parse_in_range, parse_int};
use quadbridge_types::{BridgeError, Command, HeadAxis, RobotState, Speed};
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::extract::PathArgs;
use crate::server::AppContext;

type Ctx = State<Arc<AppContext>>;
type ApiResult = Result<Json<Value>, ApiError>;

const DEFAULT_GAIT: &str = "1";
const DEFAULT_HEAD_ANGLE: &str = "90";
const DEFAULT_SWITCH: &str = "0";
const DEFAULT_LED_MODE: &str = "0";
const DEFAULT_CHANNEL: &str = "255";

/// Routes taking several path arguments, with their parameter names in order.
const MULTI_ARG_ROUTES: &[(&str, &[&str])] = &[
    ("/move", &["gait", "x", "y", "angle"]),
    ("/position", &["x", "y", "z"]),
    ("/attitude", &["roll", "pitch", "yaw"]),
    ("/led/color", &["r", "g", "b"]),
];

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

pub async fn connect(State(ctx): Ctx) -> ApiResult {
    let remote = ctx.link.connect().await?;
    Ok(Json(json!({ "status": "Connected", "remote": remote.to_string() })))
}

pub async fn disconnect(State(ctx): Ctx) -> ApiResult {
    let status = if ctx.link.disconnect().await {
        "Disconnected"
    } else {
        "Not connected"
    };
    Ok(Json(json!({ "status": status })))
}

pub async fn robot_state(State(ctx): Ctx) -> Json<RobotState> {
    Json(ctx.link.state().snapshot())
}

// ────────────────────────────────────────────────────────────────────────────
// Speed and locomotion
// ────────────────────────────────────────────────────────────────────────────

fn store_speed(ctx: &AppContext, speed: Speed) -> Json<Value> {
    ctx.link.state().set_speed(speed);
    Json(json!({
        "status": format!("Speed set to {}", speed.get()),
        "speed": speed.get(),
    }))
}

pub async fn reset_speed(State(ctx): Ctx) -> Json<Value> {
    store_speed(&ctx, Speed::default())
}

pub async fn set_speed(State(ctx): Ctx, PathArgs(value): PathArgs<String>) -> ApiResult {
    let speed = Speed::parse(&value)?;
    Ok(store_speed(&ctx, speed))
}

pub async fn get_speed(State(ctx): Ctx) -> Json<Value> {
    Json(json!({ "speed": ctx.link.state().speed().get() }))
}

async fn send_move(ctx: &AppContext, gait: &str, x: &str, y: &str, angle: &str) -> ApiResult {
    let gait = parse_in_range("gait", gait, 1, 2)? as u8;
    let x = parse_int("x", x)?;
    let y = parse_int("y", y)?;
    let angle = parse_int("angle", angle)?;
    let speed = ctx.link.state().speed();

    ctx.link
        .send_command(&Command::Move {
            gait,
            x,
            y,
            speed,
            angle,
        })
        .await?;

    Ok(Json(json!({
        "status": format!("Moving [{gait}][{x}][{y}][{angle}]"),
        "gait": gait,
        "x": x,
        "y": y,
        "angle": angle,
        "speed": speed.get(),
    })))
}

pub async fn move_default(State(ctx): Ctx) -> ApiResult {
    send_move(&ctx, DEFAULT_GAIT, "0", "0", "0").await
}

pub async fn move_with(
    State(ctx): Ctx,
    PathArgs((gait, x, y, angle)): PathArgs<(String, String, String, String)>,
) -> ApiResult {
    send_move(&ctx, &gait, &x, &y, &angle).await
}

pub async fn stop(State(ctx): Ctx) -> ApiResult {
    let Json(mut body) = send_move(&ctx, DEFAULT_GAIT, "0", "0", "0").await?;
    body["status"] = Value::from("Stopped");
    Ok(Json(body))
}

// ────────────────────────────────────────────────────────────────────────────
// Servos, head, switches
// ────────────────────────────────────────────────────────────────────────────

async fn servo_power(ctx: &AppContext, on: bool) -> ApiResult {
    ctx.link.send_command(&Command::ServoPower { on }).await?;
    let status = if on { "Servo power on" } else { "Servo power off" };
    Ok(Json(json!({ "status": status })))
}

pub async fn servo_power_on(State(ctx): Ctx) -> ApiResult {
    servo_power(&ctx, true).await
}

pub async fn servo_power_off(State(ctx): Ctx) -> ApiResult {
    servo_power(&ctx, false).await
}

async fn head(ctx: &AppContext, axis: HeadAxis, raw: &str) -> ApiResult {
    let angle = parse_in_range("angle", raw, 0, 180)? as u8;
    ctx.link.send_command(&Command::Head { axis, angle }).await?;
    let name = match axis {
        HeadAxis::Vertical => "vertical",
        HeadAxis::Horizontal => "horizontal",
    };
    Ok(Json(json!({
        "status": format!("Head {name} angle set to {angle}"),
        "angle": angle,
    })))
}

pub async fn head_vertical_default(State(ctx): Ctx) -> ApiResult {
    head(&ctx, HeadAxis::Vertical, DEFAULT_HEAD_ANGLE).await
}

pub async fn head_vertical(State(ctx): Ctx, PathArgs(angle): PathArgs<String>) -> ApiResult {
    head(&ctx, HeadAxis::Vertical, &angle).await
}

pub async fn head_horizontal_default(State(ctx): Ctx) -> ApiResult {
    head(&ctx, HeadAxis::Horizontal, DEFAULT_HEAD_ANGLE).await
}

pub async fn head_horizontal(State(ctx): Ctx, PathArgs(angle): PathArgs<String>) -> ApiResult {
    head(&ctx, HeadAxis::Horizontal, &angle).await
}

/// Shared body of the on/off endpoints (`/buzzer`, `/balance`).
async fn switch(
    ctx: &AppContext,
    label: &str,
    raw: &str,
    command: fn(bool) -> Command,
) -> ApiResult {
    let state = parse_in_range("state", raw, 0, 1)?;
    ctx.link.send_command(&command(state == 1)).await?;
    let word = if state == 1 { "on" } else { "off" };
    Ok(Json(json!({
        "status": format!("{label} {word}"),
        "state": state,
    })))
}

fn buzzer_command(on: bool) -> Command {
    Command::Buzzer { on }
}

fn balance_command(on: bool) -> Command {
    Command::Balance { on }
}

pub async fn buzzer_default(State(ctx): Ctx) -> ApiResult {
    switch(&ctx, "Buzzer", DEFAULT_SWITCH, buzzer_command).await
}

pub async fn buzzer(State(ctx): Ctx, PathArgs(state): PathArgs<String>) -> ApiResult {
    switch(&ctx, "Buzzer", &state, buzzer_command).await
}

pub async fn balance_default(State(ctx): Ctx) -> ApiResult {
    switch(&ctx, "Balance", DEFAULT_SWITCH, balance_command).await
}

pub async fn balance(State(ctx): Ctx, PathArgs(state): PathArgs<String>) -> ApiResult {
    switch(&ctx, "Balance", &state, balance_command).await
}

// ────────────────────────────────────────────────────────────────────────────
// Telemetry requests
// ────────────────────────────────────────────────────────────────────────────

/// Ask for a distance report and wait up to the grace period for it.
///
/// `fresh` is `false` when no new report arrived in time; the body then
/// carries the previous reading.
pub async fn sonic(State(ctx): Ctx) -> ApiResult {
    let store = ctx.link.state();
    let before = store.snapshot().distance_seq;
    ctx.link.send_command(&Command::SonicRequest).await?;

    let fresh = store
        .wait_until(ctx.grace_period, |s| s.distance_seq > before)
        .await;
    let snapshot = store.snapshot();
    Ok(Json(json!({
        "status": "Distance measured",
        "distance": snapshot.distance,
        "fresh": fresh,
    })))
}

/// Same contract as [`sonic`], for the two power rails.
pub async fn power(State(ctx): Ctx) -> ApiResult {
    let store = ctx.link.state();
    let before = store.snapshot().power_seq;
    ctx.link.send_command(&Command::PowerRequest).await?;

    let fresh = store
        .wait_until(ctx.grace_period, |s| s.power_seq > before)
        .await;
    let snapshot = store.snapshot();
    Ok(Json(json!({
        "status": "Power measured",
        "power_servo": format!("{}V", snapshot.power_servo),
        "power_rasp": format!("{}V", snapshot.power_rasp),
        "fresh": fresh,
    })))
}

// ────────────────────────────────────────────────────────────────────────────
// Body pose and LEDs
// ────────────────────────────────────────────────────────────────────────────

async fn position(ctx: &AppContext, x: &str, y: &str, z: &str) -> ApiResult {
    let x = parse_int("x", x)?;
    let y = parse_int("y", y)?;
    let z = parse_int("z", z)?;
    ctx.link.send_command(&Command::Position { x, y, z }).await?;
    Ok(Json(json!({ "status": "Position set", "x": x, "y": y, "z": z })))
}

pub async fn position_default(State(ctx): Ctx) -> ApiResult {
    position(&ctx, "0", "0", "0").await
}

pub async fn position_with(
    State(ctx): Ctx,
    PathArgs((x, y, z)): PathArgs<(String, String, String)>,
) -> ApiResult {
    position(&ctx, &x, &y, &z).await
}

async fn attitude(ctx: &AppContext, roll: &str, pitch: &str, yaw: &str) -> ApiResult {
    let roll = parse_in_range("roll", roll, -20, 20)?;
    let pitch = parse_in_range("pitch", pitch, -20, 20)?;
    let yaw = parse_in_range("yaw", yaw, -20, 20)?;
    ctx.link
        .send_command(&Command::Attitude { roll, pitch, yaw })
        .await?;
    Ok(Json(json!({
        "status": "Attitude set",
        "roll": roll,
        "pitch": pitch,
        "yaw": yaw,
    })))
}

pub async fn attitude_default(State(ctx): Ctx) -> ApiResult {
    attitude(&ctx, "0", "0", "0").await
}

pub async fn attitude_with(
    State(ctx): Ctx,
    PathArgs((roll, pitch, yaw)): PathArgs<(String, String, String)>,
) -> ApiResult {
    attitude(&ctx, &roll, &pitch, &yaw).await
}

async fn led_mode(ctx: &AppContext, raw: &str) -> ApiResult {
    let mode = parse_in_range("mode", raw, 0, 5)? as u8;
    ctx.link.send_command(&Command::LedMode { mode }).await?;
    Ok(Json(json!({ "status": format!("LED mode set to {mode}"), "mode": mode })))
}

pub async fn led_mode_default(State(ctx): Ctx) -> ApiResult {
    led_mode(&ctx, DEFAULT_LED_MODE).await
}

pub async fn led_mode_with(State(ctx): Ctx, PathArgs(value): PathArgs<String>) -> ApiResult {
    led_mode(&ctx, &value).await
}

async fn led_color(ctx: &AppContext, r: &str, g: &str, b: &str) -> ApiResult {
    let r = parse_in_range("r", r, 0, 255)? as u8;
    let g = parse_in_range("g", g, 0, 255)? as u8;
    let b = parse_in_range("b", b, 0, 255)? as u8;
    ctx.link.send_command(&Command::LedColor { r, g, b }).await?;
    Ok(Json(json!({ "status": "LED color set", "r": r, "g": g, "b": b })))
}

pub async fn led_color_default(State(ctx): Ctx) -> ApiResult {
    led_color(&ctx, DEFAULT_CHANNEL, DEFAULT_CHANNEL, DEFAULT_CHANNEL).await
}

pub async fn led_color_with(
    State(ctx): Ctx,
    PathArgs((r, g, b)): PathArgs<(String, String, String)>,
) -> ApiResult {
    led_color(&ctx, &r, &g, &b).await
}

// ────────────────────────────────────────────────────────────────────────────
// Camera
// ────────────────────────────────────────────────────────────────────────────

pub async fn camera_image(State(ctx): Ctx) -> Result<Response, ApiError> {
    let frame = ctx.link.video().latest_image().ok_or(BridgeError::NoFrame)?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], frame).into_response())
}

// ────────────────────────────────────────────────────────────────────────────
// Fallbacks
// ────────────────────────────────────────────────────────────────────────────

/// Unmatched paths. A known multi-argument route given too few segments is a
/// missing argument (400), anything else is a 404.
pub async fn not_found(uri: Uri) -> ApiError {
    if let Some(param) = missing_argument(uri.path()) {
        return BridgeError::invalid(param, "missing path argument").into();
    }
    ApiError::new(StatusCode::NOT_FOUND, format!("No route for {}", uri.path()))
}

pub async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    ApiError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("{method} is not supported on {}", uri.path()),
    )
}

/// Name of the first absent argument when `path` is a truncated call to one
/// of [`MULTI_ARG_ROUTES`].
fn missing_argument(path: &str) -> Option<&'static str> {
    let path = path.trim_end_matches('/');
    MULTI_ARG_ROUTES.iter().find_map(|(prefix, params)| {
        let rest = path.strip_prefix(prefix)?.strip_prefix('/')?;
        let given = rest.split('/').count();
        params.get(given).copied()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_multi_arg_paths_name_the_missing_parameter() {
        assert_eq!(missing_argument("/move/1"), Some("x"));
        assert_eq!(missing_argument("/move/1/10/0"), Some("angle"));
        assert_eq!(missing_argument("/attitude/5/"), Some("pitch"));
        assert_eq!(missing_argument("/led/color/1/2"), Some("b"));
    }

    #[test]
    fn other_unmatched_paths_are_not_missing_arguments() {
        assert_eq!(missing_argument("/nowhere"), None);
        assert_eq!(missing_argument("/move"), None);
        assert_eq!(missing_argument("/movement/1"), None);
        assert_eq!(missing_argument("/move/1/2/3/4/5"), None);
    }

    #[tokio::test]
    async fn unknown_route_is_a_json_404() {
        let err = not_found(Uri::from_static("/nowhere")).await;
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(err.description().contains("/nowhere"));
    }

    #[tokio::test]
    async fn truncated_route_is_a_400() {
        let err = not_found(Uri::from_static("/position/1")).await;
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.description().contains("'y'"));
    }
}
