//! [`BridgeServer`] – the HTTP front end.
//!
//! Listens on `0.0.0.0:5000` (configurable via [`BridgeServer::with_host`] and
//! [`BridgeServer::with_port`]) and translates each request into a protocol
//! frame on the shared [`RobotLink`].

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use quadbridge_link::RobotLink;
use quadbridge_types::BridgeError;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;

/// Default TCP port for the HTTP API.
pub const DEFAULT_PORT: u16 = 5000;

/// How long `/sonic` and `/power` wait for the matching report by default.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// State shared by every handler.
pub struct AppContext {
    pub link: Arc<RobotLink>,
    /// Upper bound on the wait for a requested telemetry report.
    pub grace_period: Duration,
}

impl AppContext {
    pub fn new(link: Arc<RobotLink>) -> Self {
        Self {
            link,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// Build the route table.
pub fn router(context: Arc<AppContext>) -> Router {
    use handlers::*;

    Router::new()
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/state", get(robot_state))
        .route("/speed", post(reset_speed).get(get_speed))
        .route("/speed/{speed}", post(set_speed))
        .route("/move", post(move_default))
        .route("/move/{gait}/{x}/{y}/{angle}", post(move_with))
        .route("/stop", post(stop))
        .route("/servopower/on", post(servo_power_on))
        .route("/servopower/off", post(servo_power_off))
        .route("/stand", post(servo_power_on))
        .route("/relax", post(servo_power_off))
        .route("/head/vertical", post(head_vertical_default))
        .route("/head/vertical/{angle}", post(head_vertical))
        .route("/head/horizontal", post(head_horizontal_default))
        .route("/head/horizontal/{angle}", post(head_horizontal))
        .route("/buzzer", post(buzzer_default))
        .route("/buzzer/{state}", post(buzzer))
        .route("/balance", post(balance_default))
        .route("/balance/{state}", post(balance))
        .route("/sonic", get(sonic))
        .route("/power", get(power))
        .route("/position", post(position_default))
        .route("/position/{x}/{y}/{z}", post(position_with))
        .route("/attitude", post(attitude_default))
        .route("/attitude/{roll}/{pitch}/{yaw}", post(attitude_with))
        .route("/led/mode", post(led_mode_default))
        .route("/led/mode/{mode}", post(led_mode_with))
        .route("/led/color", post(led_color_default))
        .route("/led/color/{r}/{g}/{b}", post(led_color_with))
        .route("/camera/image", get(camera_image))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(context)
}

// ---------------------------------------------------------------------------
// BridgeServer
// ---------------------------------------------------------------------------

pub struct BridgeServer {
    context: Arc<AppContext>,
    host: IpAddr,
    port: u16,
}

impl BridgeServer {
    /// Create a server for `context` on `0.0.0.0:`[`DEFAULT_PORT`].
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            context,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Bind and serve until `shutdown` resolves.
    ///
    /// In-flight requests are allowed to finish. The robot session is left
    /// alone; the caller decides whether to disconnect afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Server`] if the listener cannot bind or the
    /// server fails while running.
    pub async fn run<F>(self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Server(format!("bind error on {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(local) = listener.local_addr() {
            info!("HTTP API listening on http://{local}");
        }
        axum::serve(listener, router(self.context))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| BridgeError::Server(e.to_string()))
    }
}
