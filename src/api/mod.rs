//! HTTP API layer: axum routes, handlers, and server startup.

pub mod handlers;
pub mod server;

pub use handlers::AppState;
pub use server::{create_app, start_server};
