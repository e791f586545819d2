use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::remote::log_remote_failure;
use crate::state::AppState;

use super::verify::VerifyRequest;

/// Local routes and the hybrid path each one is relayed to
const FORWARDED: &[(&str, &str)] = &[
    ("/gerbil/receive-bandwidth", "gerbil/receive-bandwidth"),
    ("/gerbil/update-hole-punch", "gerbil/update-hole-punch"),
    ("/gerbil/get-all-relays", "gerbil/get-all-relays"),
    ("/gerbil/get-resolved-hostname", "gerbil/get-resolved-hostname"),
    ("/gerbil/get-config", "gerbil/get-config"),
    ("/badger/exchange-session", "badger/exchange-session"),
];

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(health_handler))
        .route("/badger/verify-session", post(verify_session_handler));

    for &(route, remote_path) in FORWARDED {
        app = app.route(
            route,
            post(move |state: State<AppState>, body: Json<Value>| forward_handler(state, remote_path, body)),
        );
    }

    app.with_state(state)
}

/// Serve `app` on `listener` until `cancel` fires
pub async fn serve(listener: TcpListener, app: Router, cancel: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Internal server listening on http://{}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("Internal server stopped");
    Ok(())
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "message": "Healthy" }))
}

async fn verify_session_handler(State(state): State<AppState>, Json(request): Json<VerifyRequest>) -> Response {
    let response = state.verifier.verify(request).await;
    Json(response).into_response()
}

async fn forward_handler(State(state): State<AppState>, remote_path: &'static str, Json(body): Json<Value>) -> Response {
    match state.forwarder.forward(remote_path, &body).await {
        Ok(forwarded) => (forwarded.status, Json(forwarded.body)).into_response(),
        Err(e) => {
            log_remote_failure("Error forwarding request to remote", &e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "Failed to reach the remote server",
                    "status": StatusCode::BAD_GATEWAY.as_u16(),
                })),
            )
                .into_response()
        }
    }
}
