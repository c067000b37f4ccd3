//! HTTP / WebSocket server

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ServerConfig;
use crate::errors::{RoundhouseResult, TransportError};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct RoundhouseServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl RoundhouseServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serve until Ctrl+C / SIGTERM
    pub async fn run(self) -> RoundhouseResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn run_until<F>(self, shutdown: F) -> RoundhouseResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.socket_addr()?;
        let app = self.create_app();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", addr, e)))?;

        info!("🌐 Roundhouse listening on http://{}", addr);
        self.log_server_info();

        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

        info!("🛑 Server stopped gracefully");
        Ok(())
    }

    pub fn create_app(&self) -> axum::Router {
        create_router(self.state.clone())
            .layer(axum::middleware::from_fn(request_id_middleware))
            .layer(create_cors_layer(self.config.cors_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, TransportError> {
        let ip = self
            .config
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|_| TransportError::InvalidAddress(self.config.host.clone()))?;
        Ok(SocketAddr::from((ip, self.config.port)))
    }

    fn log_server_info(&self) {
        info!("📋 Server configuration:");
        info!("   Version: {}", self.state.version);
        info!("   CORS: {:?}", self.config.cors_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!(
            "   Games: {:?}",
            self.state.orchestrators.keys().map(|g| g.to_string()).collect::<Vec<_>>()
        );
        info!("📊 Endpoints:");
        info!("   GET  /health");
        info!("   GET  /api/:game/round");
        info!("   GET  /api/:game/rounds?limit=");
        info!("   POST /api/:game/force-end");
        info!("   GET  /api/rounds/:id");
        info!("   POST /api/verify");
        info!("   GET  /ws/:game?token=");
        info!("   GET  /metrics");
    }
}

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::EventHub;
    use crate::metrics::RoundMetrics;
    use crate::services::{InMemoryBalances, MemoryRoundSink, StaticIdentities};
    use std::collections::HashMap;

    fn server(host: &str) -> RoundhouseServer {
        let balances = Arc::new(InMemoryBalances::new());
        let state = Arc::new(AppState {
            orchestrators: HashMap::new(),
            hub: Arc::new(EventHub::default()),
            identities: Arc::new(StaticIdentities::new(HashMap::new(), balances)),
            sink: Arc::new(MemoryRoundSink::new()),
            metrics: Arc::new(RoundMetrics::new()),
            version: "test".to_string(),
        });
        let config = ServerConfig {
            host: host.to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        RoundhouseServer::new(config, state)
    }

    #[test]
    fn test_invalid_host_rejected() {
        let result = server("not-an-ip").socket_addr();
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let result = server("127.0.0.1").run_until(async {}).await;
        assert!(result.is_ok());
    }
}
