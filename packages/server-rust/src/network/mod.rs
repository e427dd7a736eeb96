//! HTTP surface: listener configuration, routes, handlers, and transport middleware.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod routes;

pub use config::NetworkConfig;
pub use handlers::AppState;
pub use module::NetworkModule;
pub use routes::{build_router, RouteDef, ROUTES};
