//! Centralized datetime handling utilities
//!
//! Timestamps are persisted as fixed-width RFC 3339 UTC strings with
//! microsecond precision (`2024-01-01T12:00:00.000000Z`). Fixed width keeps
//! lexicographic comparison in SQL identical to chronological comparison,
//! which the claim and due-schedule queries rely on.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::errors::RepositoryError;

/// Centralized datetime parsing and formatting utilities
pub struct DateTimeParser;

impl DateTimeParser {
    /// Format a timestamp for database storage
    pub fn format_for_storage(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Parse datetime from RFC 3339 or the plain SQLite format (assumed UTC)
    pub fn parse_flexible(input: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Parse a stored column value, naming the column on failure
    pub fn parse_column(
        table: &str,
        column: &str,
        input: &str,
    ) -> Result<DateTime<Utc>, RepositoryError> {
        Self::parse_flexible(input).ok_or_else(|| {
            RepositoryError::decode(table, column, format!("invalid timestamp '{input}'"))
        })
    }

    /// Parse an optional stored column value
    pub fn parse_optional_column(
        table: &str,
        column: &str,
        input: Option<String>,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        input
            .map(|value| Self::parse_column(table, column, &value))
            .transpose()
    }
}
