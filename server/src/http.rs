//! HTTP side-channel exposing the avatar bootstrap template
//!
//! Rendering clients fetch `GET /model` before opening the realtime socket
//! to learn the avatar shape the server simulates: spawn geometry, world
//! bounds, and default presentation fields.

use axum::routing::get;
use axum::{Json, Router};
use log::info;
use serde_json::{json, Value};
use shared::{Bounds, AVATAR_HALF_EXTENT, AVATAR_SIZE, CLIENT_SPAWN};
use tokio::net::TcpListener;

/// Template describing an unseated avatar, in the shape clients render from.
fn avatar_template() -> Value {
    let limits = Bounds::for_half_extents(AVATAR_HALF_EXTENT);
    json!({
        "pos": { "x": CLIENT_SPAWN.x, "y": CLIENT_SPAWN.y },
        "size": {
            "x": AVATAR_SIZE,
            "y": AVATAR_SIZE,
            "hx": AVATAR_HALF_EXTENT,
            "hy": AVATAR_HALF_EXTENT,
        },
        "state": "not-connected",
        "color": "rgba(255,255,255,0.1)",
        "info_color": "rgba(255,255,255,0.1)",
        "id": "",
        "old_state": { "pos": { "x": 0.0, "y": 0.0 } },
        "cur_state": { "pos": { "x": 0.0, "y": 0.0 } },
        "state_time": 0,
        "inputs": [],
        "pos_limits": {
            "x_min": limits.x_min,
            "x_max": limits.x_max,
            "y_min": limits.y_min,
            "y_max": limits.y_max,
        },
    })
}

async fn model() -> Json<Value> {
    Json(avatar_template())
}

/// Binds the listener and serves the bootstrap routes until aborted.
pub async fn serve(port: u16) -> std::io::Result<()> {
    let app = Router::new().route("/model", get(model));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("HTTP model endpoint listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await
}
