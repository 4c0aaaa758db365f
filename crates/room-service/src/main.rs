//! Room Service
//!
//! Stateful WebSocket signaling server for Conclave rooms.
//!
//! # Servers
//!
//! - WebSocket signaling at `/ws` (default: 0.0.0.0:7000)
//! - HTTP health and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Start the room controller actor
//! 5. Start health server (liveness, readiness, metrics)
//! 6. Start signaling server, mark ready
//! 7. Wait for shutdown signal, drain

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use room_service::actors::{ActorMetrics, RoomControllerHandle, SessionContext};
use room_service::auth::{AllowAll, Authorizer, JwtAuthorizer};
use room_service::config::Config;
use room_service::negotiation::LoggingNegotiator;
use room_service::observability::{
    health_router, init_metrics_recorder, metrics_router, HealthState,
};
use room_service::transport::signaling_router;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often shutdown checks whether the controller has finished draining.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    let json_logs = config.observability.json_logs;
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.observability.log_level)
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Room Service");
    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_rooms = config.max_rooms,
        max_peers_per_room = config.max_peers_per_room,
        allow_insecure_join = config.allow_insecure_join,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let authorizer: Arc<dyn Authorizer> = match &config.room_token_secret {
        Some(secret) => Arc::new(JwtAuthorizer::new(
            secret,
            Duration::from_secs(config.clock_skew_seconds),
        )),
        None => {
            warn!("RS_ALLOW_INSECURE_JOIN is set, every join will be accepted");
            Arc::new(AllowAll)
        }
    };

    let controller = RoomControllerHandle::new(
        config.max_rooms,
        config.max_peers_per_room,
        ActorMetrics::new(),
    );
    info!("Actor system initialized");

    let session_ctx = SessionContext {
        controller: controller.clone(),
        authorizer,
        negotiator: Arc::new(LoggingNegotiator),
    };

    let shutdown_token = controller.child_token();

    // Health server. Bind before spawning to fail fast on bind errors.
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("Invalid health bind address {}", config.health_bind_address))?;
    let health_app =
        health_router(Arc::clone(&health_state)).merge(metrics_router(prometheus_handle));
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;

    let health_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Signaling server.
    let ws_addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address))?;
    let ws_app = signaling_router(session_ctx).layer(TraceLayer::new_for_http());
    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .with_context(|| format!("Failed to bind signaling server to {ws_addr}"))?;

    let ws_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %ws_addr, "Signaling server starting");
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown.cancelled().await;
            info!("Signaling server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Room Service running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop receiving new connections first.
    health_state.set_not_ready();

    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    if let Err(e) = controller.shutdown(grace).await {
        warn!(error = %e, "Actor system shutdown error");
    }

    // The controller stops answering once every room has drained.
    let drained = tokio::time::timeout(grace, async {
        while controller.get_status().await.is_ok() {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok();
    if !drained {
        warn!(
            grace_secs = grace.as_secs(),
            "Rooms did not drain before the grace period ended"
        );
    }

    info!("Room Service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the service
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
