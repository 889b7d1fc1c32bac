pub mod account_handlers;
pub mod bucket_handlers;
pub mod file_handlers;
pub mod health_handlers;
