//! API Module
//!
//! HTTP endpoints for institutions, denomination previews and transfers.

pub mod handlers;
pub mod routes;
pub mod types;

pub use handlers::ApiState;
pub use routes::create_router;
