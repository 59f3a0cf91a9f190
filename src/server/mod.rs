//! HTTP surface of the dispatcher.
//!
//! # Endpoints
//!
//! - `GET /health`: Liveness probe
//! - `POST /chat`: Route a user message through the supervisor
//! - `/sessions/*`: Inspect, evict and cancel sessions
//! - `GET /capabilities`, `GET /datasets`: What the supervisor can offer

pub mod routes;

pub use routes::{app_router, AppState};
