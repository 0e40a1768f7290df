//! HTTP listener, auth, and controllers fronting the database gateway core
//! (§6.1), playing the same role the reference example's
//! `sqlx_example_postgres_axum_social` lib crate plays for its binary.

pub mod auth;
pub mod config;
pub mod http;
pub mod logging;
pub mod state;
