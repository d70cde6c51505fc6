use axum::{
    extract::{State, WebSocketUpgrade},
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::credentials::EphemeralKey;
use crate::state::RelayState;
use crate::websocket::{handle_socket, websocket_handler};

pub fn build_router(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(index))
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .route("/get-ephemeral-key", post(get_ephemeral_key))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browsers connect the control channel to the server root, so an upgrade
/// request on `/` is accepted here; plain requests get a greeting.
async fn index(ws: Option<WebSocketUpgrade>, State(state): State<RelayState>) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        None => {
            debug!("served index page");
            Html("<h1>Hello, World!</h1>").into_response()
        }
    }
}

async fn health_check() -> &'static str {
    "ok"
}

async fn get_ephemeral_key(State(state): State<RelayState>) -> Result<Json<EphemeralKey>, ApiError> {
    state.issuer.issue().await.map(Json).map_err(|err| {
        error!(error = %err, "ephemeral key request failed");
        ApiError::Upstream(err.to_string())
    })
}

#[derive(Debug)]
pub enum ApiError {
    Upstream(String),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Upstream(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiErrorBody { error }),
            )
                .into_response(),
        }
    }
}
