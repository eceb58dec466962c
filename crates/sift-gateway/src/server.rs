use std::net::SocketAddr;
use std::time::Instant;

use sift_core::bootstrap::App;
use sift_llm::LlmProvider;
use tokio::sync::watch;

use crate::error::GatewayError;
use crate::router::build_router;

const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576;
const DEFAULT_K: usize = 3;

pub struct AppState<P> {
    pub app: App<P>,
    /// `k` used when a chat request does not specify one.
    pub default_k: usize,
    pub started_at: Instant,
}

impl<P> AppState<P> {
    #[must_use]
    pub fn new(app: App<P>, default_k: usize) -> Self {
        Self {
            app,
            default_k,
            started_at: Instant::now(),
        }
    }
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            default_k: self.default_k,
            started_at: self.started_at,
        }
    }
}

pub struct GatewayServer<P> {
    addr: SocketAddr,
    max_body_size: usize,
    default_k: usize,
    app: App<P>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<P: LlmProvider + 'static> GatewayServer<P> {
    #[must_use]
    pub fn new(bind: &str, port: u16, app: App<P>, shutdown_rx: watch::Receiver<bool>) -> Self {
        let addr: SocketAddr = format!("{bind}:{port}").parse().unwrap_or_else(|e| {
            tracing::warn!("invalid bind '{bind}': {e}, falling back to 127.0.0.1:{port}");
            SocketAddr::from(([127, 0, 0, 1], port))
        });

        if bind == "0.0.0.0" {
            tracing::warn!("binding to 0.0.0.0 exposes the service on every interface");
        }

        Self {
            addr,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            default_k: DEFAULT_K,
            app,
            shutdown_rx,
        }
    }

    #[must_use]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    #[must_use]
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    /// Start serving until the shutdown signal flips to `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or encounters a fatal I/O error.
    pub async fn serve(self) -> Result<(), GatewayError> {
        let state = AppState::new(self.app, self.default_k);
        let router = build_router(state, self.max_body_size);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| GatewayError::Bind(self.addr.to_string(), e))?;
        tracing::info!("sift listening on {}", self.addr);

        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown_rx.borrow_and_update() {
                    if shutdown_rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                tracing::info!("gateway shutting down");
            })
            .await
            .map_err(|e| GatewayError::Server(format!("{e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sift_core::Config;
    use sift_core::bootstrap::build_app;
    use sift_llm::mock::MockProvider;

    use super::*;

    fn app() -> App<MockProvider> {
        build_app(&Config::default(), MockProvider::new(8)).unwrap()
    }

    #[test]
    fn server_builder_chain() {
        let (_stx, srx) = watch::channel(false);
        let server = GatewayServer::new("127.0.0.1", 8000, app(), srx)
            .with_max_body_size(512)
            .with_default_k(5);
        assert_eq!(server.max_body_size, 512);
        assert_eq!(server.default_k, 5);
    }

    #[test]
    fn server_invalid_bind_fallback() {
        let (_stx, srx) = watch::channel(false);
        let server = GatewayServer::new("not_an_ip", 9999, app(), srx);
        assert_eq!(server.addr.port(), 9999);
        assert!(server.addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_signal() {
        let (stx, srx) = watch::channel(false);
        let server = GatewayServer::new("127.0.0.1", 0, app(), srx);
        let handle = tokio::spawn(server.serve());
        stx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
