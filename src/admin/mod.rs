//! Operator endpoints: status, backend table, circuits.

pub mod handlers;

use axum::{
    routing::{get, put},
    Router,
};

use crate::http::server::AppState;
use self::handlers::*;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends).post(register_backend))
        .route("/admin/backends/{id}", put(replace_backend))
        .route("/admin/circuits", get(get_circuits))
}
