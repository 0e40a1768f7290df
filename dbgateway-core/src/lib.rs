//! Core traits and types shared by every layer of the database gateway:
//! configuration (§3.1), the error taxonomy (§7), and the [`DbConnection`]
//! contract (§4.1) that every engine driver implements.

pub mod binder;
pub mod config;
pub mod connection;
pub mod error;

pub use binder::{rewrite_named_params, PlaceholderStyle};
pub use config::{ConnectionConfig, Engine};
pub use connection::{DbConnection, ParamValue, Params, ResultSet, Row};
pub use error::{Error, PoolErrorKind, Result};
