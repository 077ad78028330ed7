use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::dataset::Dataset;
use crate::eda::{
    event_timeline, impact_link_summary, value_counts, LinkCount, TimelineEvent, ValueCount,
};
use crate::record::{Confidence, RecordType, COLUMNS};
use crate::stats::mean;
use crate::{format_date, FiError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub first: String,
    pub last: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorCoverage {
    pub indicator: String,
    pub values: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub dates: Option<DateRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UndatedEvent {
    pub record_id: String,
    pub indicator: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissingValues {
    pub column: String,
    pub missing: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileReport {
    pub total_records: usize,
    pub record_types: Vec<ValueCount>,
    pub pillars: Vec<ValueCount>,
    pub observation_range: Option<DateRange>,
    /// Every `event` record, dated or not.
    pub total_events: usize,
    pub events: Vec<TimelineEvent>,
    /// Events left off the timeline for lack of a date.
    pub undated_events: Vec<UndatedEvent>,
    pub indicator_coverage: Vec<IndicatorCoverage>,
    pub missing_values: Vec<MissingValues>,
    pub confidence: Vec<ValueCount>,
    pub impact_links: Vec<LinkCount>,
}

/// Schema, temporal, coverage and quality profile of a dataset.
///
/// # Errors
/// Returns [`FiError::Analysis`] when the dataset is empty.
pub fn profile(dataset: &Dataset) -> Result<ProfileReport, FiError> {
    if dataset.is_empty() {
        return Err(FiError::Analysis("cannot profile an empty dataset".to_string()));
    }

    let records = dataset.records();
    let observation_range = date_range(
        dataset
            .of_type(RecordType::Observation)
            .filter_map(|record| record.observation_date),
    );

    Ok(ProfileReport {
        total_records: records.len(),
        record_types: value_counts(records.iter().map(|record| Some(record.record_type.as_str()))),
        pillars: value_counts(records.iter().map(|record| record.pillar.as_deref())),
        observation_range,
        total_events: dataset.of_type(RecordType::Event).count(),
        events: event_timeline(dataset),
        undated_events: dataset
            .of_type(RecordType::Event)
            .filter(|record| record.observation_date.is_none())
            .map(|record| UndatedEvent {
                record_id: record.record_id.clone(),
                indicator: record.indicator.clone(),
                category: record.category.clone(),
            })
            .collect(),
        indicator_coverage: indicator_coverage(dataset),
        missing_values: missing_values(dataset),
        confidence: value_counts(records.iter().map(|record| record.confidence.map(Confidence::as_str))),
        impact_links: impact_link_summary(dataset),
    })
}

fn date_range(dates: impl Iterator<Item = Date>) -> Option<DateRange> {
    let mut bounds: Option<(Date, Date)> = None;
    for date in dates {
        bounds = Some(match bounds {
            Some((first, last)) => (first.min(date), last.max(date)),
            None => (date, date),
        });
    }
    bounds.map(|(first, last)| DateRange {
        first: format_date(first),
        last: format_date(last),
    })
}

fn indicator_coverage(dataset: &Dataset) -> Vec<IndicatorCoverage> {
    let mut grouped: BTreeMap<&str, (Vec<f64>, Vec<Date>)> = BTreeMap::new();
    for record in dataset.records() {
        let Some(indicator) = record.indicator.as_deref() else {
            continue;
        };
        let (values, dates) = grouped.entry(indicator).or_default();
        values.extend(record.value_numeric);
        dates.extend(record.observation_date);
    }

    grouped
        .into_iter()
        .map(|(indicator, (values, dates))| IndicatorCoverage {
            indicator: indicator.to_string(),
            values: values.len(),
            mean: mean(&values),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            dates: date_range(dates.into_iter()),
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn missing_values(dataset: &Dataset) -> Vec<MissingValues> {
    let mut missing = [0_usize; COLUMNS.len()];
    for record in dataset.records() {
        for (slot, cell) in missing.iter_mut().zip(record.to_row()) {
            if cell.is_empty() {
                *slot += 1;
            }
        }
    }

    let total = dataset.len() as f64;
    COLUMNS
        .iter()
        .zip(missing)
        .filter(|(_, count)| *count > 0)
        .map(|(column, count)| MissingValues {
            column: (*column).to_string(),
            missing: count,
            percent: count as f64 / total * 100.0,
        })
        .collect()
}
