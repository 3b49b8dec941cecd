//! HTTP surface for layout selection.
//!
//! # Endpoints
//!
//! - `GET    /health`                          Liveness probe
//! - `GET    /layouts/:user_id/:area`          Select a layout (`?force_refresh=true`)
//! - `POST   /hooks/traits/:user_id`           Trait changed upstream
//! - `POST   /hooks/features/:user_id`         Feature flag changed upstream
//! - `POST   /hooks/rules`                     Rule set changed upstream
//! - `PUT    /users/:user_id/traits/:key`      Write a trait to the local store
//! - `DELETE /users/:user_id/traits/:key`      Remove a trait from the local store
//! - `GET    /performance`                     Performance report (`?from=&to=`, RFC 3339)
//! - `GET    /cache/stats`                     Cache counters

pub mod routes;

pub use routes::{app_router, AppState};
