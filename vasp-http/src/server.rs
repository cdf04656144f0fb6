//! The Axum dispatcher that routes incoming protocol frames to the right
//! [`Channel`](vasp_core::channel::Channel).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use vasp_core::address::Address;
use vasp_core::vasp::OffChainVasp;
use vasp_core::wire::{make_protocol_error, CommandRequestObject, CommandResponseObject};

/// Shared state handed to every request handler.
pub type AppState = Arc<OffChainVasp>;

/// Builds the router for one VASP node: `POST /{recv}/{send}/process/` for
/// protocol frames and `POST /` as a liveness probe.
#[must_use]
pub fn router(vasp: AppState) -> Router {
    Router::new()
        .route("/", post(liveness))
        .route("/{recv}/{send}/process/", post(process))
        .layer(TraceLayer::new_for_http())
        .with_state(vasp)
}

async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn process(
    State(vasp): State<AppState>,
    Path((recv, send)): Path<(String, String)>,
    Json(request): Json<CommandRequestObject>,
) -> Json<CommandResponseObject> {
    if recv != vasp.local_address().encode() {
        return Json(make_protocol_error(format!(
            "this node does not own address '{recv}'"
        )));
    }

    let sender_addr = match Address::decode(&send) {
        Ok(addr) => addr,
        Err(err) => return Json(make_protocol_error(format!("invalid sender address: {err}"))),
    };

    let response = match vasp.handle_request(&sender_addr, request) {
        Ok(response) => response,
        Err(err) => make_protocol_error(format!("failed to persist channel state: {err}")),
    };

    Json(response)
}
