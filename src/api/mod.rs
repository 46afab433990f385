//! API Module - HTTP surface
//!
//! Read-only snapshot/audit endpoints plus the control surface, served by
//! axum on localhost. The UI collaborator polls `/api/v1/status` and posts
//! commands to `/api/v1/command`.

pub mod routes;

pub use routes::{create_router, ApiState};
