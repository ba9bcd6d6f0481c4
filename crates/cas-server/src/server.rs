use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{admin, bootstrap::AppState, bootstrap::build_state, config::AppConfig};

/// Builds the admin router over an existing state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(admin::health))
        .route("/admin/tickets", get(admin::list_tickets))
        .route(
            "/admin/tickets/{id}",
            get(admin::get_ticket).delete(admin::delete_ticket),
        )
        .route("/admin/cleaner/run", post(admin::run_cleaner))
        .route("/admin/statistics", get(admin::statistics))
        .route("/admin/sessions/{principal}", get(admin::sessions))
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(|req: &axum::http::Request<_>| {
                        use tracing::field::Empty;
                        tracing::info_span!(
                            "http.request",
                            http.method = %req.method(),
                            http.target = %req.uri(),
                            http.status_code = Empty,
                        )
                    })
                    .on_response(
                        |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                            span.record(
                                "http.status_code",
                                tracing::field::display(res.status().as_u16()),
                            );
                            tracing::info!(
                                http.status = %res.status().as_u16(),
                                elapsed_ms = %latency.as_millis(),
                                "request handled"
                            );
                        },
                    ),
            ),
        )
        .with_state(state)
}

/// Connects the configured backend and builds the admin router.
///
/// # Errors
///
/// Returns an error if the ticket store cannot be opened.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let state = build_state(cfg).await?;
    Ok(router(state))
}

pub struct CasServer {
    addr: SocketAddr,
    app: Router,
    cleaner: Option<JoinHandle<()>>,
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Opens the ticket store and schedules the cleaner if enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the ticket store cannot be opened.
    pub async fn build(self) -> anyhow::Result<CasServer> {
        let state = build_state(&self.config).await?;

        let cleaner_config = &self.config.tickets.registry.cleaner;
        let cleaner = if cleaner_config.enabled {
            tracing::info!(
                start_delay = ?cleaner_config.start_delay,
                repeat_interval = ?cleaner_config.repeat_interval,
                "Ticket registry cleaner scheduled"
            );
            Some(
                state
                    .cleaner
                    .clone()
                    .start(cleaner_config.start_delay, cleaner_config.repeat_interval),
            )
        } else {
            tracing::info!("Ticket registry cleaner is disabled");
            None
        };

        Ok(CasServer {
            addr: self.config.addr(),
            app: router(state),
            cleaner,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CasServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        if let Some(cleaner) = self.cleaner {
            cleaner.abort();
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
