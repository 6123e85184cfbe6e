//! Query functions for the PostgreSQL backend.
//!
//! Free functions over `&PgPool`, one module per table family. All SQL
//! is runtime-checked (`sqlx::query_as` with bind parameters) so no
//! database is needed at compile time.

pub mod arrangements;
pub mod heartbeats;
pub mod iterations;
pub mod learning;
pub mod profiles;
pub mod tasks;
