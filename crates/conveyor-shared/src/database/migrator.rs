//! Embedded sqlx migrator for the conveyor catalog.

/// Migrations embedded at compile time from `migrations/`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
