//! Core data models for the file service.
//!
//! Row types map to tables via `sqlx::FromRow`; request and response types
//! serialize as camelCase JSON via `serde`.

pub mod account;
pub mod bucket;
pub mod file;
pub mod page;
pub mod process;
pub mod rest_result;
pub mod upload;
