//! Utility functions for the crawl orchestrator
//!
//! - `clock`: injectable wall clock so time-dependent rules are testable
//! - `datetime`: storage formatting and parsing of timestamps
//! - `urls`: URL validation and credential masking

pub mod clock;
pub mod datetime;
pub mod urls;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use datetime::DateTimeParser;
