//! Service layer: storage clients, URL resolution, persistence and the
//! upload orchestrator that ties them together.

pub mod catalog;
pub mod client_cache;
pub mod enricher;
pub mod expression;
pub mod file_service;
pub mod key_generator;
pub mod process_rule;
pub mod repository;
pub mod storage_client;
pub mod url_builder;
