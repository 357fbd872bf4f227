//! Application startup and lifecycle management.

use crate::config::Config;
use crate::handlers;
use crate::middleware::{optional_auth, require_auth, AuthGate};
use crate::services::{ClientRegistry, IdentityVerifier, PaymentService, WebhookVerifier};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, spawn_pruning, IpRateLimit},
    security_headers::security_headers_middleware,
    tracing::{make_request_span, request_id_middleware, REQUEST_ID_HEADER},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub payments: PaymentService,
    pub webhook: WebhookVerifier,
    pub auth: AuthGate,
    pub rate_limit: IpRateLimit,
}

impl AppState {
    /// Wire state from configuration and already-resolved collaborators.
    pub fn new(
        config: Config,
        payments: PaymentService,
        identity: Option<IdentityVerifier>,
    ) -> Self {
        let webhook = WebhookVerifier::new(
            config.razorpay.webhook_secret.clone(),
            config.razorpay.require_webhook_signature,
        );
        let auth = AuthGate::new(identity, config.auth.allow_unverified);
        let rate_limit = IpRateLimit::new(
            create_ip_rate_limiter(
                config.http.rate_limit_max_requests,
                config.http.rate_limit_window,
            ),
            config.http.trust_forwarded_for,
        );

        Self {
            config: Arc::new(config),
            payments,
            webhook,
            auth,
            rate_limit,
        }
    }
}

fn payment_routes(state: &AppState) -> Router<AppState> {
    let optional = from_fn_with_state(state.auth.clone(), optional_auth);
    let required = from_fn_with_state(state.auth.clone(), require_auth);

    Router::new()
        .route("/create-order", post(handlers::payments::create_order))
        .route("/verify-payment", post(handlers::payments::verify_payment))
        .route("/webhook", post(handlers::webhook::webhook))
        .route(
            "/payment/:paymentId",
            get(handlers::payments::get_payment).layer(optional.clone()),
        )
        .route(
            "/order/:orderId",
            get(handlers::payments::get_order).layer(optional),
        )
        .route(
            "/all",
            get(handlers::payments::list_orders).layer(required.clone()),
        )
        .route(
            "/refund/:paymentId",
            post(handlers::payments::refund_payment).layer(required),
        )
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let origin = frontend_url.parse::<HeaderValue>().unwrap_or_else(|e| {
        tracing::error!(
            "Invalid CORS origin '{}': {}. Falling back to localhost.",
            frontend_url,
            e
        );
        HeaderValue::from_static("http://localhost:5173")
    });

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

/// Build the full HTTP router for `state`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/payments", payment_routes(&state))
        .layer(from_fn_with_state(
            state.rate_limit.clone(),
            ip_rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .nest("/api", api)
        .fallback(handlers::not_found)
        .with_state(state.clone())
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.http.frontend_url))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    ///
    /// Missing credentials degrade the service instead of failing startup. A
    /// configured store that cannot be reached yet is retried by later store
    /// operations.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let registry = Arc::new(ClientRegistry::new(
            config.razorpay.clone(),
            config.store.clone(),
        ));
        if !registry.document_store().await.is_enabled() {
            if registry.store_initialized() {
                tracing::warn!("Document store not configured - running without persistence");
            } else {
                tracing::warn!(
                    "Document store unavailable at startup - retrying on each store operation"
                );
            }
        }

        let identity = IdentityVerifier::from_config(&config.auth).map_err(|e| {
            tracing::error!("Failed to initialize identity verifier: {}", e);
            AppError::ConfigError(e)
        })?;
        if identity.is_none() {
            tracing::warn!("No identity verifier configured - protected routes are unavailable");
        }

        let payments =
            PaymentService::from_registry(registry, config.razorpay.key_secret.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::InternalError(e.into())
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| AppError::InternalError(e.into()))?
            .port();

        let state = AppState::new(config, payments, identity);
        spawn_pruning(
            state.rate_limit.limiter().clone(),
            state.config.http.rate_limit_window,
        );
        let router = build_router(state);

        tracing::info!(port, "membership-payments listening");

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}
