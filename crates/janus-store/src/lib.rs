//! Embedded relational store: SQLite with WAL and foreign keys, schema
//! evolved by a numbered migration list tracked in `user_version`.
//!
//! When the store cannot be opened, callers degrade gracefully: the session
//! log is filesystem-native anyway, the learner falls back to a JSONL
//! append file, and the scheduler runs against an in-memory connection.

pub mod database;
pub mod migrations;

pub use database::Database;
