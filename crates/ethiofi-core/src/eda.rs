//! Exploratory tables over the unified dataset.
//!
//! Years come from [`Record::year`]: the observation year, or a numeric
//! `fiscal_year` when the row has no observation date.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::dataset::Dataset;
use crate::record::{Confidence, Record, RecordType};
use crate::stats::{mean, pearson};
use crate::{format_date, FiError};

pub const ACCOUNT_OWNERSHIP: &str = "ACC_OWNERSHIP";
pub const MOBILE_MONEY_ACCOUNT: &str = "ACC_MM_ACCOUNT";
pub const MOBILE_MONEY_ACTIVE: &str = "USG_MM_ACTIVE";
pub const DIGITAL_PAYMENT_USAGE: &str = "USG_DIGITAL_PAYMENT";
pub const DIGITAL_PAYMENT: &str = "DIG_PAY";
pub const P2P_VALUE: &str = "USG_P2P_VALUE";
pub const ATM_VALUE: &str = "USG_ATM_VALUE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Overview {
    pub total_records: usize,
    pub record_types: Vec<ValueCount>,
    pub pillars: Vec<ValueCount>,
    pub source_types: Vec<ValueCount>,
    pub confidence: Vec<ValueCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoverageCell {
    pub indicator_code: String,
    pub year: i32,
    pub observations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenderPoint {
    pub year: i32,
    pub national: Option<f64>,
    pub male: Option<f64>,
    pub female: Option<f64>,
    /// `male - female` when both are observed.
    pub gap: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrowthPoint {
    pub year: i32,
    pub value: f64,
    pub growth_pp: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsagePoint {
    pub year: i32,
    pub registered: Option<f64>,
    pub active: Option<f64>,
    pub digital_payment: Option<f64>,
    pub active_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEvent {
    pub record_id: String,
    pub date: String,
    pub year: i32,
    pub indicator: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    pub year: i32,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventOverlay {
    pub indicator_code: String,
    pub trend: Vec<TrendPoint>,
    pub events: Vec<TimelineEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatedValue {
    pub record_id: String,
    pub date: String,
    pub value: f64,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorTrend {
    pub indicator_code: String,
    pub start: String,
    pub end: String,
    pub points: Vec<DatedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkCount {
    pub related_indicator: String,
    pub impact_direction: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationPair {
    pub left: String,
    pub right: String,
    pub years: usize,
    pub r: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationReport {
    pub threshold: f64,
    pub indicators: Vec<String>,
    pub pairs: Vec<CorrelationPair>,
    pub strong_pairs: Vec<CorrelationPair>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Headline {
    pub latest_year: i32,
    pub account_ownership: Option<f64>,
    pub digital_payment: Option<f64>,
    /// `USG_P2P_VALUE / USG_ATM_VALUE` summed over the latest year; 0 without ATM volume.
    pub p2p_atm_crossover_ratio: f64,
}

/// Frequencies sorted by descending count, then value. Missing values are skipped.
pub fn value_counts<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<ValueCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values.flatten() {
        *counts.entry(value).or_default() += 1;
    }

    let mut out: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount {
            value: value.to_string(),
            count,
        })
        .collect();
    out.sort_by(|lhs, rhs| rhs.count.cmp(&lhs.count).then_with(|| lhs.value.cmp(&rhs.value)));
    out
}

#[must_use]
pub fn overview(dataset: &Dataset) -> Overview {
    let records = dataset.records();
    Overview {
        total_records: records.len(),
        record_types: value_counts(records.iter().map(|record| Some(record.record_type.as_str()))),
        pillars: value_counts(records.iter().map(|record| record.pillar.as_deref())),
        source_types: value_counts(records.iter().map(|record| record.source_type.as_deref())),
        confidence: value_counts(
            records
                .iter()
                .map(|record| record.confidence.map(Confidence::as_str)),
        ),
    }
}

/// Observation counts per indicator and year (the coverage heatmap).
#[must_use]
pub fn temporal_coverage(dataset: &Dataset) -> Vec<CoverageCell> {
    let mut cells: BTreeMap<(String, i32), usize> = BTreeMap::new();
    for record in dataset.of_type(RecordType::Observation) {
        let (Some(code), Some(year)) = (record.indicator_code.as_deref(), record.year()) else {
            continue;
        };
        if record.value_numeric.is_some() {
            *cells.entry((code.to_string(), year)).or_default() += 1;
        }
    }

    cells
        .into_iter()
        .map(|((indicator_code, year), observations)| CoverageCell {
            indicator_code,
            year,
            observations,
        })
        .collect()
}

/// `ACC_OWNERSHIP` by year for the national total and each gender.
///
/// # Errors
/// Returns [`FiError::Analysis`] when the dataset holds no account-ownership values.
pub fn access_and_gender(dataset: &Dataset) -> Result<Vec<GenderPoint>, FiError> {
    let mut national: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    let mut male: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    let mut female: BTreeMap<i32, Vec<f64>> = BTreeMap::new();

    for (record, year, value) in yearly_values(dataset, ACCOUNT_OWNERSHIP) {
        let bucket = match record.gender.as_deref().map(str::trim) {
            Some(gender) if gender.eq_ignore_ascii_case("male") => &mut male,
            Some(gender) if gender.eq_ignore_ascii_case("female") => &mut female,
            _ if record.is_national() => &mut national,
            _ => continue,
        };
        bucket.entry(year).or_default().push(value);
    }

    let years: BTreeSet<i32> = national
        .keys()
        .chain(male.keys())
        .chain(female.keys())
        .copied()
        .collect();
    if years.is_empty() {
        return Err(FiError::Analysis(format!(
            "no {ACCOUNT_OWNERSHIP} observations available"
        )));
    }

    let at = |series: &BTreeMap<i32, Vec<f64>>, year: i32| {
        series.get(&year).and_then(|values| mean(values))
    };
    Ok(years
        .into_iter()
        .map(|year| {
            let male_value = at(&male, year);
            let female_value = at(&female, year);
            GenderPoint {
                year,
                national: at(&national, year),
                male: male_value,
                female: female_value,
                gap: male_value.zip(female_value).map(|(m, f)| m - f),
            }
        })
        .collect())
}

/// Percentage-point change between consecutive national observations.
#[must_use]
pub fn growth_rates(dataset: &Dataset, indicator_code: &str) -> Vec<GrowthPoint> {
    let mut series: Vec<(i32, f64)> = yearly_values(dataset, indicator_code)
        .filter(|(record, _, _)| record.is_national())
        .map(|(_, year, value)| (year, value))
        .collect();
    series.sort_by_key(|(year, _)| *year);

    let mut previous: Option<f64> = None;
    series
        .into_iter()
        .map(|(year, value)| {
            let point = GrowthPoint {
                year,
                value,
                growth_pp: previous.map(|before| value - before),
            };
            previous = Some(value);
            point
        })
        .collect()
}

/// Registered mobile-money accounts against active use, per year.
#[must_use]
pub fn usage_vs_registration(dataset: &Dataset) -> Vec<UsagePoint> {
    let series = |code: &str| -> BTreeMap<i32, f64> {
        let mut grouped: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
        for (_, year, value) in yearly_values(dataset, code) {
            grouped.entry(year).or_default().push(value);
        }
        grouped
            .into_iter()
            .filter_map(|(year, values)| mean(&values).map(|value| (year, value)))
            .collect()
    };

    let registered = series(MOBILE_MONEY_ACCOUNT);
    let active = series(MOBILE_MONEY_ACTIVE);
    let digital = series(DIGITAL_PAYMENT_USAGE);

    let years: BTreeSet<i32> = registered
        .keys()
        .chain(active.keys())
        .chain(digital.keys())
        .copied()
        .collect();

    years
        .into_iter()
        .map(|year| {
            let registered_value = registered.get(&year).copied();
            let active_value = active.get(&year).copied();
            UsagePoint {
                year,
                registered: registered_value,
                active: active_value,
                digital_payment: digital.get(&year).copied(),
                active_ratio: match (active_value, registered_value) {
                    (Some(active), Some(registered)) if registered > 0.0 => Some(active / registered),
                    _ => None,
                },
            }
        })
        .collect()
}

/// Dated events in chronological order.
#[must_use]
pub fn event_timeline(dataset: &Dataset) -> Vec<TimelineEvent> {
    let mut events: Vec<(&Record, time::Date)> = dataset
        .of_type(RecordType::Event)
        .filter_map(|record| record.observation_date.map(|date| (record, date)))
        .collect();
    events.sort_by_key(|(_, date)| *date);

    events
        .into_iter()
        .map(|(record, date)| TimelineEvent {
            record_id: record.record_id.clone(),
            date: format_date(date),
            year: date.year(),
            indicator: record.indicator.clone(),
            category: record.category.clone(),
        })
        .collect()
}

/// National trend of one indicator with the event dates to overlay on it.
///
/// # Errors
/// Returns [`FiError::Analysis`] when the indicator has no national values.
pub fn event_overlay(dataset: &Dataset, indicator_code: &str) -> Result<EventOverlay, FiError> {
    let mut trend: Vec<TrendPoint> = yearly_values(dataset, indicator_code)
        .filter(|(record, _, _)| record.is_national())
        .map(|(_, year, value)| TrendPoint { year, value })
        .collect();
    if trend.is_empty() {
        return Err(FiError::Analysis(format!(
            "no national trend data for {indicator_code}"
        )));
    }
    trend.sort_by_key(|point| point.year);

    Ok(EventOverlay {
        indicator_code: indicator_code.to_string(),
        trend,
        events: event_timeline(dataset),
    })
}

/// Dated observations of one indicator inside an inclusive date window.
///
/// A missing bound defaults to the first or last observation date of the
/// indicator. Every disaggregation is kept; `gender` tells them apart.
///
/// # Errors
/// Returns [`FiError::Analysis`] when the indicator has no dated values or
/// the window is inverted.
pub fn indicator_trend(
    dataset: &Dataset,
    indicator_code: &str,
    start: Option<Date>,
    end: Option<Date>,
) -> Result<IndicatorTrend, FiError> {
    let mut series: Vec<(Date, &Record, f64)> = dataset
        .of_type(RecordType::Observation)
        .filter(|record| record.has_indicator_code(indicator_code))
        .filter_map(|record| Some((record.observation_date?, record, record.value_numeric?)))
        .collect();
    series.sort_by_key(|(date, _, _)| *date);

    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return Err(FiError::Analysis(format!(
            "no dated observations for {indicator_code}"
        )));
    };
    let start = start.unwrap_or(first.0);
    let end = end.unwrap_or(last.0);
    if start > end {
        return Err(FiError::Analysis(format!(
            "trend start {} is after end {}",
            format_date(start),
            format_date(end)
        )));
    }

    Ok(IndicatorTrend {
        indicator_code: indicator_code.to_string(),
        start: format_date(start),
        end: format_date(end),
        points: series
            .into_iter()
            .filter(|(date, _, _)| (start..=end).contains(date))
            .map(|(date, record, value)| DatedValue {
                record_id: record.record_id.clone(),
                date: format_date(date),
                value,
                gender: record.gender.clone(),
            })
            .collect(),
    })
}

/// Impact-link counts per target indicator and direction.
#[must_use]
pub fn impact_link_summary(dataset: &Dataset) -> Vec<LinkCount> {
    let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();
    for link in dataset.of_type(RecordType::ImpactLink) {
        let (Some(indicator), Some(direction)) = (
            link.related_indicator.as_deref(),
            link.impact_direction.as_deref(),
        ) else {
            continue;
        };
        *counts
            .entry((indicator.to_string(), direction.to_string()))
            .or_default() += 1;
    }

    counts
        .into_iter()
        .map(|((related_indicator, impact_direction), count)| LinkCount {
            related_indicator,
            impact_direction,
            count,
        })
        .collect()
}

/// Pearson correlations between yearly indicator means.
///
/// Each pair uses only the years where both indicators were observed.
#[must_use]
pub fn correlations(dataset: &Dataset, threshold: f64) -> CorrelationReport {
    let mut yearly: BTreeMap<String, BTreeMap<i32, Vec<f64>>> = BTreeMap::new();
    for record in dataset.of_type(RecordType::Observation) {
        let (Some(code), Some(year), Some(value)) = (
            record.indicator_code.as_deref(),
            record.year(),
            record.value_numeric,
        ) else {
            continue;
        };
        yearly
            .entry(code.to_string())
            .or_default()
            .entry(year)
            .or_default()
            .push(value);
    }

    let means: BTreeMap<String, BTreeMap<i32, f64>> = yearly
        .into_iter()
        .map(|(code, years)| {
            let series = years
                .into_iter()
                .filter_map(|(year, values)| mean(&values).map(|value| (year, value)))
                .collect();
            (code, series)
        })
        .collect();

    let indicators: Vec<String> = means.keys().cloned().collect();
    let mut pairs = Vec::new();
    for (index, left) in indicators.iter().enumerate() {
        for right in &indicators[index + 1..] {
            let (Some(left_series), Some(right_series)) = (means.get(left), means.get(right)) else {
                continue;
            };
            let shared: Vec<(f64, f64)> = left_series
                .iter()
                .filter_map(|(year, x)| right_series.get(year).map(|y| (*x, *y)))
                .collect();
            pairs.push(CorrelationPair {
                left: left.clone(),
                right: right.clone(),
                years: shared.len(),
                r: pearson(&shared),
            });
        }
    }

    let strong_pairs = pairs
        .iter()
        .filter(|pair| pair.r.is_some_and(|r| r.abs() >= threshold))
        .cloned()
        .collect();

    CorrelationReport {
        threshold,
        indicators,
        pairs,
        strong_pairs,
    }
}

/// Dashboard overview figures for the most recent observation year.
///
/// # Errors
/// Returns [`FiError::Analysis`] when no observation carries a year.
pub fn headline(dataset: &Dataset) -> Result<Headline, FiError> {
    let latest_year = dataset
        .of_type(RecordType::Observation)
        .filter_map(Record::year)
        .max()
        .ok_or_else(|| FiError::Analysis("no dated observations available".to_string()))?;

    let latest: Vec<&Record> = dataset
        .of_type(RecordType::Observation)
        .filter(|record| record.year() == Some(latest_year))
        .collect();
    let values = |code: &str| -> Vec<f64> {
        latest
            .iter()
            .filter(|record| record.has_indicator_code(code))
            .filter_map(|record| record.value_numeric)
            .collect()
    };

    let p2p: f64 = values(P2P_VALUE).iter().sum();
    let atm: f64 = values(ATM_VALUE).iter().sum();

    Ok(Headline {
        latest_year,
        account_ownership: mean(&values(ACCOUNT_OWNERSHIP)),
        digital_payment: mean(&values(DIGITAL_PAYMENT)),
        p2p_atm_crossover_ratio: if atm == 0.0 { 0.0 } else { p2p / atm },
    })
}

/// `(record, year, value)` for records of one indicator carrying both a year and a value.
fn yearly_values<'a>(
    dataset: &'a Dataset,
    indicator_code: &'a str,
) -> impl Iterator<Item = (&'a Record, i32, f64)> + 'a {
    dataset
        .records()
        .iter()
        .filter(move |record| record.has_indicator_code(indicator_code))
        .filter_map(|record| Some((record, record.year()?, record.value_numeric?)))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use crate::parse_date_lenient;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn obs(id: &str, code: &str, date: &str, value: f64, gender: Option<&str>) -> Record {
        let mut record = Record::new(id, RecordType::Observation);
        record.indicator_code = Some(code.to_string());
        record.observation_date = parse_date_lenient(date);
        record.value_numeric = Some(value);
        record.gender = gender.map(str::to_string);
        record.pillar = Some("access".to_string());
        record.source_type = Some("survey".to_string());
        record.confidence = Some(Confidence::High);
        record
    }

    fn event(id: &str, date: &str, indicator: &str) -> Record {
        let mut record = Record::new(id, RecordType::Event);
        record.observation_date = parse_date_lenient(date);
        record.indicator = Some(indicator.to_string());
        record.category = Some("product_launch".to_string());
        record
    }

    fn sample() -> Dataset {
        must_ok(Dataset::from_records(vec![
            obs("REC_0001", ACCOUNT_OWNERSHIP, "2014-12-31", 22.0, Some("all")),
            obs("REC_0002", ACCOUNT_OWNERSHIP, "2017-12-31", 35.0, Some("all")),
            obs("REC_0003", ACCOUNT_OWNERSHIP, "2021-12-31", 46.0, Some("all")),
            obs("REC_0004", ACCOUNT_OWNERSHIP, "2021-12-31", 56.0, Some("male")),
            obs("REC_0005", ACCOUNT_OWNERSHIP, "2021-12-31", 36.0, Some("female")),
            obs("REC_0006", ACCOUNT_OWNERSHIP, "2024-12-31", 49.0, Some("all")),
            obs("REC_0007", MOBILE_MONEY_ACCOUNT, "2021-12-31", 4.7, Some("all")),
            obs("REC_0008", MOBILE_MONEY_ACCOUNT, "2024-12-31", 9.45, Some("all")),
            obs("REC_0009", MOBILE_MONEY_ACTIVE, "2024-12-31", 1.5, Some("all")),
            obs("REC_0010", P2P_VALUE, "2024-12-31", 300.0, None),
            obs("REC_0011", ATM_VALUE, "2024-12-31", 200.0, None),
            event("EVT_0002", "2023-08-16", "M-Pesa launch"),
            event("EVT_0001", "2021-05-11", "Telebirr launch"),
        ]))
    }

    #[test]
    fn indicator_trend_filters_to_the_date_window() {
        let dataset = sample();
        let full = must_ok(indicator_trend(&dataset, ACCOUNT_OWNERSHIP, None, None));
        assert_eq!(full.start, "2014-12-31");
        assert_eq!(full.end, "2024-12-31");
        assert_eq!(full.points.len(), 6);

        let window = must_ok(indicator_trend(
            &dataset,
            ACCOUNT_OWNERSHIP,
            parse_date_lenient("2017-01-01"),
            parse_date_lenient("2021-12-31"),
        ));
        let rows: Vec<(&str, f64, Option<&str>)> = window
            .points
            .iter()
            .map(|point| (point.record_id.as_str(), point.value, point.gender.as_deref()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("REC_0002", 35.0, Some("all")),
                ("REC_0003", 46.0, Some("all")),
                ("REC_0004", 56.0, Some("male")),
                ("REC_0005", 36.0, Some("female")),
            ]
        );

        let empty = must_ok(indicator_trend(
            &dataset,
            ACCOUNT_OWNERSHIP,
            parse_date_lenient("2015-01-01"),
            parse_date_lenient("2016-12-31"),
        ));
        assert!(empty.points.is_empty());
    }

    #[test]
    fn indicator_trend_rejects_unknown_indicator_and_inverted_window() {
        let dataset = sample();
        assert!(indicator_trend(&dataset, "NOT_AN_INDICATOR", None, None).is_err());
        assert!(indicator_trend(
            &dataset,
            ACCOUNT_OWNERSHIP,
            parse_date_lenient("2024-01-01"),
            parse_date_lenient("2020-01-01"),
        )
        .is_err());
    }

    #[test]
    fn value_counts_sort_by_count_then_value() {
        let counts = value_counts([Some("usage"), Some("access"), None, Some("access")].into_iter());
        assert_eq!(
            counts,
            vec![
                ValueCount {
                    value: "access".to_string(),
                    count: 2
                },
                ValueCount {
                    value: "usage".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn overview_counts_record_types() {
        let report = overview(&sample());
        assert_eq!(report.total_records, 13);
        assert_eq!(report.record_types[0].value, "observation");
        assert_eq!(report.record_types[0].count, 11);
        assert_eq!(report.confidence[0].count, 11);
    }

    #[test]
    fn coverage_counts_per_indicator_year() {
        let cells = temporal_coverage(&sample());
        let acc_2021 = cells
            .iter()
            .find(|cell| cell.indicator_code == ACCOUNT_OWNERSHIP && cell.year == 2021);
        assert_eq!(acc_2021.map(|cell| cell.observations), Some(3));
    }

    #[test]
    fn gender_gap_is_male_minus_female() {
        let points = must_ok(access_and_gender(&sample()));
        let point = match points.iter().find(|point| point.year == 2021) {
            Some(point) => point,
            None => panic!("missing 2021 point"),
        };
        assert_eq!(point.national, Some(46.0));
        assert_eq!(point.gap, Some(20.0));
        assert!(points.iter().all(|point| point.year != 2021 || point.male.is_some()));
    }

    #[test]
    fn access_without_data_is_an_error() {
        assert!(access_and_gender(&Dataset::new()).is_err());
    }

    #[test]
    fn growth_uses_national_series_only() {
        let growth = growth_rates(&sample(), ACCOUNT_OWNERSHIP);
        let deltas: Vec<Option<f64>> = growth.iter().map(|point| point.growth_pp).collect();
        assert_eq!(deltas, vec![None, Some(13.0), Some(11.0), Some(3.0)]);
    }

    #[test]
    fn usage_ratio_compares_active_to_registered() {
        let usage = usage_vs_registration(&sample());
        let point_2024 = match usage.iter().find(|point| point.year == 2024) {
            Some(point) => point,
            None => panic!("missing 2024 usage"),
        };
        let ratio = point_2024.active_ratio.unwrap_or_default();
        assert!((ratio - 1.5 / 9.45).abs() < 1e-12);
        assert!(usage
            .iter()
            .find(|point| point.year == 2021)
            .is_some_and(|point| point.active_ratio.is_none()));
    }

    #[test]
    fn timeline_is_chronological() {
        let ids: Vec<String> = event_timeline(&sample())
            .into_iter()
            .map(|event| event.record_id)
            .collect();
        assert_eq!(ids, vec!["EVT_0001", "EVT_0002"]);
    }

    #[test]
    fn overlay_requires_trend_data() {
        let overlay = must_ok(event_overlay(&sample(), ACCOUNT_OWNERSHIP));
        assert_eq!(overlay.trend.len(), 4);
        assert_eq!(overlay.events.len(), 2);
        assert!(event_overlay(&sample(), "UNKNOWN").is_err());
    }

    #[test]
    fn correlations_use_shared_years() {
        let report = correlations(&sample(), 0.5);
        let pair = report
            .pairs
            .iter()
            .find(|pair| pair.left == MOBILE_MONEY_ACCOUNT && pair.right == ACCOUNT_OWNERSHIP);
        let pair = match pair {
            Some(pair) => pair,
            None => panic!("missing ACC_OWNERSHIP/ACC_MM_ACCOUNT pair"),
        };
        assert_eq!(pair.years, 2);
        assert!(pair.r.is_some_and(|r| (r - 1.0).abs() < 1e-9));
        assert!(report.strong_pairs.contains(pair));
    }

    #[test]
    fn headline_reads_latest_year() {
        let headline = must_ok(headline(&sample()));
        assert_eq!(headline.latest_year, 2024);
        assert_eq!(headline.account_ownership, Some(49.0));
        assert!(headline.digital_payment.is_none());
        assert!((headline.p2p_atm_crossover_ratio - 1.5).abs() < 1e-12);
    }

    #[test]
    fn headline_ratio_is_zero_without_atm_volume() {
        let dataset = must_ok(Dataset::from_records(vec![obs(
            "REC_0001",
            P2P_VALUE,
            "2024-12-31",
            10.0,
            None,
        )]));
        let headline = must_ok(headline(&dataset));
        assert!(headline.p2p_atm_crossover_ratio.abs() < f64::EPSILON);
    }
}
