use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, delete, get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;
use uuid::Uuid;

use crate::achievements::{
    AchievementEvaluator, BadgeCatalog, BadgeNotification, ChannelNotifier, SessionRegistry,
};
use crate::api::handler::*;
use crate::api::middleware::cors;
use crate::backend::stores::AuthStore;
use crate::backend::{BackendErr, RestBackend};
use crate::energy::{EnergyError, EnergyModel};
use crate::proxy::{BackendProxy, ProxyErr};
use crate::util::config::Config;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

pub struct AppState {
    pub store: Arc<dyn AuthStore>,
    pub evaluator: AchievementEvaluator,
    pub energy: EnergyModel,
    pub sessions: Arc<SessionRegistry>,
    pub proxy: BackendProxy,
}

impl AppState {
    pub fn new<S>(
        store: Arc<S>,
        evaluator: AchievementEvaluator,
        energy: EnergyModel,
        sessions: SessionRegistry,
        proxy: BackendProxy,
    ) -> Self
    where
        S: AuthStore + 'static,
    {
        Self {
            store,
            evaluator,
            energy,
            sessions: Arc::new(sessions),
            proxy,
        }
    }

    /// Wires the REST backend into every component. Badge notifications go to `tx_notify`.
    pub fn from_config(
        config: &Config,
        tx_notify: UnboundedSender<BadgeNotification>,
    ) -> Result<Self, RouteError> {
        let backend = Arc::new(RestBackend::new(&config.backend_url, &config.backend_anon_key)?);

        let catalog = Arc::new(BadgeCatalog::standard());
        tracing::debug!(badges = catalog.len(), "loaded badge catalog");

        let evaluator = AchievementEvaluator::new(catalog, Arc::new(ChannelNotifier::new(tx_notify)));
        let proxy = BackendProxy::new(&config.backend_url, config.cookie_mode.into())?;
        tracing::debug!(cookie_mode = ?proxy.mode(), "backend proxy configured");

        Ok(Self::new(
            backend,
            evaluator,
            config.energy_model(),
            SessionRegistry::new(config.session_idle_timeout()),
            proxy,
        ))
    }
}

pub fn router(state: Arc<AppState>, allow_origins: &str) -> Router {
    Router::new()
        .route("/", get(|| async { Response::new(Body::empty()) }))
        .route("/energy/{user_id}", get(energy_by_user))
        .route("/sessions", post(create_session))
        .route("/sessions/{session_id}", delete(end_session))
        .route("/sessions/{session_id}/reset", post(reset_session))
        .route("/sessions/{session_id}/votes", post(submit_vote))
        //
        // everything under /backend goes straight to the hosted backend
        .route("/backend/{*path}", any(proxy_backend))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .layer(cors(allow_origins))
        .with_state(state)
}

/// Logs `RouteError`s attached to responses by [`RouteError::into_response`]
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[instrument(skip(config, state, tx_ready))]
pub async fn start_server(
    config: &Config,
    state: Arc<AppState>,
    tx_ready: UnboundedSender<std::net::SocketAddr>,
    mut rx_ready: UnboundedReceiver<std::net::SocketAddr>,
) -> Result<Vec<JoinHandle<()>>, RouteError> {
    tracing::info!("starting server");

    let app = router(state, &config.cors_allow_origins);
    let listener = TcpListener::bind(config.socket_addr()).await?;
    let local_addr = listener.local_addr()?;

    let server_handle = tokio::task::spawn(async move {
        if tx_ready.send(local_addr).is_err() {
            tracing::warn!("readiness receiver dropped before server start");
        }

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            tracing::error!(error = ?e, "server exited with error");
        }

        tracing::info!("server shut down");
    });

    let logging_handle = tokio::task::spawn(async move {
        if let Some(addr) = rx_ready.recv().await {
            tracing::info!(
                server_url = &format!("http://127.0.0.1:{}", addr.port()),
                "server ready"
            );
        }
    });

    Ok(vec![server_handle, logging_handle])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "failed to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Backend(#[from] BackendErr),

    #[error(transparent)]
    Energy(#[from] EnergyError),

    #[error(transparent)]
    Proxy(#[from] ProxyErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown session '{0}'")]
    SessionNotFound(Uuid),

    #[error("malformed authorization header")]
    MalformedAuthorization,
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            retry_in_ms: Option<u64>,
        }

        let (status, retry_in_ms, log) = match &self {
            RouteError::Backend(BackendErr::NotFound(_)) => (StatusCode::NOT_FOUND, None, false),
            RouteError::Backend(BackendErr::Rejected { status, .. })
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN =>
            {
                (*status, None, false)
            }
            RouteError::Backend(_) => (StatusCode::BAD_GATEWAY, None, true),
            RouteError::Energy(EnergyError::Exhausted { retry_in_ms }) => {
                (StatusCode::TOO_MANY_REQUESTS, Some(*retry_in_ms), false)
            }
            RouteError::Proxy(ProxyErr::Body(_)) => (StatusCode::PAYLOAD_TOO_LARGE, None, false),
            RouteError::Proxy(_) => (StatusCode::BAD_GATEWAY, None, true),
            RouteError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, None, true),
            RouteError::SessionNotFound(_) => (StatusCode::NOT_FOUND, None, false),
            RouteError::MalformedAuthorization => (StatusCode::UNAUTHORIZED, None, false),
        };

        let body = ErrorResponse {
            message: self.to_string(),
            retry_in_ms,
        };

        let mut response = (status, Json(body)).into_response();
        if log {
            response.extensions_mut().insert(Arc::new(self));
        }

        response
    }
}
