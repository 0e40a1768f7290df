//! Router construction, mirroring the reference example's `http::serve` —
//! one `Router` built from merged sub-routers, `with_state`, and a trace
//! layer, then served on a bound listener.

pub mod customers;
pub mod error;
pub mod login;
pub mod status;
pub mod sync;

pub use error::{Error, Result, ValidatedJson};

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let customers = Router::new()
        .route("/customers", get(customers::list_customers).post(customers::create_customer))
        .route("/customers/:id", get(customers::get_customer).put(customers::update_customer).delete(customers::delete_customer));

    let sync_routes = Router::new()
        .route("/sync/:entity", post(sync::sync_entity))
        .route("/sync/:entity/changes", get(sync::get_entity_changes));

    let auth_routes = Router::new().route("/login", post(login::login)).route("/logout", post(login::logout));

    let status_routes =
        Router::new().route("/health", get(status::health)).route("/status", get(status::status)).route("/metrics", get(status::metrics));

    Router::new()
        .merge(customers)
        .merge(sync_routes)
        .merge(auth_routes)
        .merge(status_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
