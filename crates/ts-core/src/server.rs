//! Listener setup and the graceful-drain state machine.
//!
//! Shutdown sequence:
//! 1. First signal: cancel the WebSocket base channel (the on-shutdown
//!    hook), then begin the HTTP graceful shutdown. Both are bounded by one
//!    deadline of `SERVER_DRAIN_PERIOD`.
//! 2. Wait for the WS manager to drain against the same deadline. A missed
//!    deadline is reported and followed by one `SERVER_HARD_SHUTDOWN_TIMEOUT`
//!    sleep so final writes can flush — at most one sleep total, even when
//!    both phases miss, so shutdown never takes longer than
//!    `SERVER_DRAIN_PERIOD + SERVER_HARD_SHUTDOWN_TIMEOUT`.
//! 3. Configuration-gated overlay logout, then exit.
//! A second signal during the drain exits the process immediately.

use crate::config::ServerConfig;
use crate::overlay::{Overlay, OverlayError};
use crate::ws_manager::WsManager;
use axum::Router;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info};
use ts_proto::{SERVER_DRAIN_PERIOD, SERVER_HARD_SHUTDOWN_TIMEOUT};

/// Serve until SIGINT or SIGTERM, then drain.
pub async fn serve(
    router: Router,
    overlay: Arc<dyn Overlay>,
    cfg: &ServerConfig,
    ws_manager: WsManager,
    ws_base_tx: watch::Sender<bool>,
) -> Result<(), ServeError> {
    let signal = async {
        shutdown_signal().await;
        // Second signal bypasses the drain entirely.
        tokio::spawn(async {
            shutdown_signal().await;
            error!("second shutdown signal received, exiting");
            std::process::exit(1);
        });
    };
    serve_with_shutdown(router, overlay, cfg, ws_manager, ws_base_tx, signal).await
}

/// [`serve`] with an injected shutdown trigger, so tests can drive the drain
/// without process signals.
pub async fn serve_with_shutdown(
    router: Router,
    overlay: Arc<dyn Overlay>,
    cfg: &ServerConfig,
    ws_manager: WsManager,
    ws_base_tx: watch::Sender<bool>,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), ServeError> {
    let listener = if cfg.dev {
        info!(port = cfg.port, "dev mode: starting loopback listener");
        tokio::net::TcpListener::bind(("127.0.0.1", cfg.port))
            .await
            .map_err(|e| ServeError::Bind(OverlayError::Io(e)))?
    } else {
        info!(hostname = %cfg.hostname, port = cfg.port, "starting overlay listener");
        overlay.listen(cfg.port).await.map_err(ServeError::Bind)?
    };

    let (drain_tx, drain_rx) = watch::channel(false);
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let mut rx = drain_rx;
        async move {
            let _ = rx.changed().await;
        }
    });
    let mut server_task = tokio::spawn(server.into_future());

    shutdown.await;
    info!("shutdown signal received, draining connections");

    // On-shutdown hook first: every tracked WS task starts closing its
    // socket while the HTTP server stops accepting and drains.
    let _ = ws_base_tx.send(true);
    let _ = drain_tx.send(true);

    let deadline = Instant::now() + SERVER_DRAIN_PERIOD;
    let mut hard_stopped = false;
    match tokio::time::timeout_at(deadline, &mut server_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "http server exited with error"),
        Ok(Err(e)) => error!(error = %e, "http server task failed"),
        Err(_) => {
            error!("graceful shutdown failed, waiting before hard stop");
            tokio::time::sleep(SERVER_HARD_SHUTDOWN_TIMEOUT).await;
            server_task.abort();
            hard_stopped = true;
        }
    }

    // The WS drain shares the deadline above; if the HTTP phase already
    // consumed the hard-stop sleep, don't sleep a second time.
    if let Err(e) = ws_manager.shutdown(deadline).await {
        if hard_stopped {
            error!(error = %e, "websockets failed to drain");
        } else {
            error!(error = %e, "graceful shutdown failed, waiting before hard stop");
            tokio::time::sleep(SERVER_HARD_SHUTDOWN_TIMEOUT).await;
        }
    }

    if cfg.logout {
        info!("attempting to log out of the overlay");
        if let Err(e) = overlay.logout().await {
            error!(error = %e, "failed to log out of the overlay");
        }
    }

    info!("server shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or Ctrl-C (SIGINT).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, starting drain"),
        _ = sigterm => info!("received SIGTERM, starting drain"),
    }
}

#[derive(Debug)]
pub enum ServeError {
    Bind(OverlayError),
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeError::Bind(e) => write!(f, "failed to bind listener: {}", e),
        }
    }
}

impl std::error::Error for ServeError {}
