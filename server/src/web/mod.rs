//! HTTP surface: shared state, the axum router and its JSON handlers.

pub mod app_state;
pub mod rest_api;
pub mod router;
