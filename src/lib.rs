pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod reshape;
pub mod types;
