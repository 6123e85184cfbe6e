//! Persistence layer for the loop orchestration server.
//!
//! The core talks to storage exclusively through the [`store::Store`]
//! trait. Two backends implement it: [`mem::MemStore`] (process-local,
//! used when no database is configured and by the test suites) and
//! [`pg::PgStore`] (PostgreSQL via sqlx).
//!
//! Every row that belongs to a client application carries an `app_id`,
//! and every `Store` method that touches app-scoped data takes the
//! `app_id` as a parameter. Cross-app reads are impossible through this
//! interface; callers never build their own predicates.

pub mod config;
pub mod mem;
pub mod models;
pub mod pg;
pub mod pool;
pub mod queries;
pub mod store;
