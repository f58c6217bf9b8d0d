//! Core data models for the deployment platform.
//!
//! These entities map to the SQLite tables created by
//! `migrations/0001_init.sql` via `sqlx::FromRow` and serialize as camelCase
//! JSON for the HTTP API.

pub mod audit;
pub mod deployment;
pub mod job;
pub mod project;
pub mod user;
