//! HTTP handlers organized by domain

pub mod health;
pub mod jobs;
pub mod projects;
pub mod proxies;
pub mod requests;
pub mod schedules;
pub mod sessions;
pub mod spiders;
pub mod stats;
