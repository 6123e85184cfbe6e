//! HTTP surface for the loop orchestration server.
//!
//! The binary lives in `main.rs`; the router, state container and
//! extractors are exported here so integration tests can drive the full
//! surface in-process with `tower::ServiceExt::oneshot`.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
