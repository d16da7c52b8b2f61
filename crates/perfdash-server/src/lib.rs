//! HTTP front end of the alert query service.
//!
//! Exposes the query engine and the recent-bugs lookup under `/api/alerts`,
//! with caller identity resolved from an optional bearer token and an
//! OpenAPI document served at `/api/openapi.json`.

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod logging;
pub mod state;
