use crate::{
    app::AppContext,
    auth::{AuthProvider, Identity},
    config::Config,
    health,
    http::{BillingRoutes, RouteModule, TodoRoutes, WebhookRoutes},
};
use axum::{Extension, Router, extract::DefaultBodyLimit, routing::get};
use std::time::Duration;
use tokio::signal;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// The Listwise HTTP service.
///
/// `P` authenticates callers; it is placed in request extensions where
/// [`AuthUser`](crate::auth::AuthUser) picks it up.
pub struct App<P> {
    config: Config,
    context: AppContext,
    provider: P,
}

impl<P> App<P>
where
    P: AuthProvider<User = Identity>,
{
    pub fn new(config: Config, context: AppContext, provider: P) -> Self {
        Self {
            config,
            context,
            provider,
        }
    }

    /// The complete router with state and middleware applied.
    pub fn router(&self) -> Router {
        let mut router = Router::<AppContext>::new().route("/health", get(health::health_handler));
        router = WebhookRoutes.register(router);
        router = BillingRoutes::<P>::new().register(router);
        router = TodoRoutes::<P>::new().register(router);

        router
            .with_state(self.context.clone())
            .layer(Extension(self.provider.clone()))
            .layer(DefaultBodyLimit::max(self.config.server.max_body_size))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        let addr = self
            .config
            .server
            .addr()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!("Server starting on http://{}", addr);
        tracing::info!("Health check available at http://{}/health", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

/// UUID v4 request ids for `x-request-id`.
#[derive(Clone, Copy, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        Uuid::new_v4().to_string().parse().ok().map(RequestId::new)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Grace period for in-flight webhook deliveries
    tokio::time::sleep(Duration::from_secs(1)).await;
    tracing::info!("Shutdown complete");
}
