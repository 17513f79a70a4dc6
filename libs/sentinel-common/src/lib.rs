pub mod catalog;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod redis;
pub mod store;
pub mod types;
