//! Core types and analytics for the Ethiopia financial-inclusion dataset.
//!
//! The crate is storage-agnostic: it validates records, parses the
//! enrichment log, merges new records into a [`Dataset`], and derives the
//! profiling, EDA, impact and forecast tables from it.

use time::{Date, Month, OffsetDateTime, UtcOffset};

pub mod config;
pub mod csv_io;
pub mod dataset;
pub mod eda;
pub mod enrichment_log;
pub mod forecast;
pub mod impact;
pub mod profile;
pub mod record;
mod stats;

pub use config::ModelConfig;
pub use csv_io::{read_records, write_records, CsvImport};
pub use dataset::{Dataset, EnrichmentSummary};
pub use enrichment_log::{
    check_enrichment_log, parse_enrichment_log, EnrichmentEntry, IssueSeverity, LogCheck,
    LogIssue,
};
pub use record::{Confidence, Record, RecordType, COLUMNS};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FiError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("analysis error: {0}")]
    Analysis(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Parses a calendar date leniently.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM` (first of month), `YYYY` (January 1st),
/// `YYYY/MM/DD` and datetime strings whose first ten characters are a date.
/// Returns `None` for anything else.
#[must_use]
pub fn parse_date_lenient(value: &str) -> Option<Date> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let head = trimmed.get(..10).unwrap_or(trimmed).replace('/', "-");
    let mut parts = head.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u8 = match parts.next() {
        Some(raw) => raw.parse().ok()?,
        None => 1,
    };
    let day: u8 = match parts.next() {
        Some(raw) => raw.parse().ok()?,
        None => 1,
    };
    if parts.next().is_some() {
        return None;
    }

    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

/// Parses a calendar date, rejecting values [`parse_date_lenient`] cannot read.
///
/// # Errors
/// Returns [`FiError::Parse`] when the value is not a recognisable date.
pub fn parse_date(value: &str) -> Result<Date, FiError> {
    parse_date_lenient(value).ok_or_else(|| FiError::Parse(format!("invalid date: {value}")))
}

#[must_use]
pub fn format_date(value: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        value.year(),
        u8::from(value.month()),
        value.day()
    )
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`FiError::Validation`] when parsing fails or the timestamp is
/// not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, FiError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| FiError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(FiError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`FiError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, FiError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| FiError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

pub(crate) mod date_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(value: &Option<Date>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => serializer.serialize_some(&super::format_date(*date)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Date>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(value) if value.trim().is_empty() => Ok(None),
            Some(value) => super::parse_date(&value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
