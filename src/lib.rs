pub mod assets;
pub mod catalog;
pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod proxy_pool;
pub mod queue;
pub mod scheduler;
pub mod sessions;
pub mod stats;
pub mod utils;
pub mod web;
pub mod worker;
