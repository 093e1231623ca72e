//! `quadbridge` – HTTP bridge to a quadruped robot controller.
//!
//! 1. Initialises logging (and OTLP export when configured).
//! 2. Loads `~/.quadbridge/config.toml` and resolves the robot address from
//!    `QUADBRIDGE_ROBOT_IP`, the config file, or the IP file.
//! 3. Serves the HTTP API until **Ctrl-C**, then closes any live robot
//!    session before exiting.

mod config;
mod telemetry;

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use quadbridge_link::RobotLink;
use quadbridge_server::{AppContext, BridgeServer};
use quadbridge_types::BridgeError;
use tracing::{debug, error, info, warn};

use config::Config;

fn main() -> ExitCode {
    let logging = telemetry::LoggingSettings::from_env("quadbridge");
    let telemetry_guard = telemetry::init(&logging);
    debug!(
        format = ?logging.format,
        exporting_spans = telemetry_guard.is_exporting(),
        "logging initialised"
    );

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("  {}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };
    let robot_ip = match config::resolve_robot_ip(&cfg) {
        Ok(ip) => ip,
        Err(e) => {
            eprintln!("  {}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("  {}: {e}", "Failed to start runtime".red());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, robot_ip)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "bridge stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config, robot_ip: String) -> Result<(), BridgeError> {
    let host: IpAddr = cfg
        .http_host
        .parse()
        .map_err(|e| BridgeError::Config(format!("invalid http_host '{}': {e}", cfg.http_host)))?;

    let link_config = cfg.link_config(robot_ip);
    println!(
        "  Robot   {}  (video {})",
        link_config.command_addr().bold(),
        link_config.video_addr().dimmed()
    );
    println!(
        "  API     {}\n",
        format!("http://{host}:{}", cfg.http_port).bold().cyan()
    );

    let link = Arc::new(RobotLink::new(link_config));
    let context = Arc::new(AppContext::new(Arc::clone(&link)).with_grace_period(cfg.grace_period()));

    BridgeServer::new(context)
        .with_host(host)
        .with_port(cfg.http_port)
        .run(shutdown_signal())
        .await?;

    if link.disconnect().await {
        info!("robot session closed on shutdown");
    }
    println!("{}", "  ✓ Exiting quadbridge.".green());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process to exit");
        std::future::pending::<()>().await;
    }
    println!();
    println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"                    _ _          _     _            "#.bold().cyan());
    println!("{}", r#"  __ _ _  _ __ _ __| | |__  _ _ (_)__| |__ _ ___   "#.bold().cyan());
    println!("{}", r#" / _` | || / _` / _` | '_ \| '_|| / _` / _` / -_)  "#.bold().cyan());
    println!("{}", r#" \__, |\_,_\__,_\__,_|_.__/|_|  |_\__,_\__, \___|  "#.bold().cyan());
    println!("{}", r#"    |_|                                |___/        "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "quadbridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  HTTP bridge for quadruped robot controllers");
    println!();
}
