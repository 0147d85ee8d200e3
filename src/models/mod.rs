//! Domain entities of the crawl orchestration core
//!
//! Entities are plain data; the rules that move them between states live in
//! the component modules (`queue`, `proxy_pool`, `jobs`, `scheduler`,
//! `sessions`).

use serde::{Deserialize, Serialize};

pub mod job;
pub mod project;
pub mod proxy;
pub mod request;
pub mod response;
pub mod schedule;
pub mod session;
pub mod spider;

pub use job::*;
pub use project::*;
pub use proxy::*;
pub use request::*;
pub use response::*;
pub use schedule::*;
pub use session::*;
pub use spider::*;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: u32 = 1000;

/// 1-based page selection for collection reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Row offset for SQL queries (0-based)
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 50 }
    }
}

/// One page of a collection read together with the unpaginated total
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
        }
    }
}
