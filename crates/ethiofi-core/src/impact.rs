//! Event-impact model.
//!
//! Impact links tie an event (`parent_id`) to an indicator it moves. Each
//! link is weighted by its estimate (or a magnitude fallback), its direction
//! and the strength of its evidence, then spread over time with a lagged
//! adoption curve. Event effects on one indicator combine additively.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::config::ModelConfig;
use crate::dataset::Dataset;
use crate::record::{Record, RecordType};
use crate::stats::mean;
use crate::{format_date, FiError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightedLink {
    pub link_id: String,
    pub event_id: String,
    /// `None` when no dated event record with `event_id` exists.
    #[serde(default, with = "crate::date_serde")]
    pub event_date: Option<Date>,
    pub event_indicator: Option<String>,
    pub event_category: Option<String>,
    pub related_indicator: String,
    pub impact_direction: Option<String>,
    pub impact_magnitude: Option<String>,
    pub impact_estimate: Option<f64>,
    pub lag_months: f64,
    pub evidence_basis: Option<String>,
    pub evidence_weight: f64,
    pub weight: f64,
    pub confidence_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixRow {
    pub event_id: String,
    /// Summed weights, aligned with [`ImpactMatrix::indicators`].
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactMatrix {
    pub indicators: Vec<String>,
    pub rows: Vec<MatrixRow>,
}

impl ImpactMatrix {
    #[must_use]
    pub fn weight(&self, event_id: &str, indicator: &str) -> Option<f64> {
        let column = self.indicators.iter().position(|item| item == indicator)?;
        self.rows
            .iter()
            .find(|row| row.event_id == event_id)
            .and_then(|row| row.weights.get(column).copied())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEffect {
    pub event_id: String,
    pub effect: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationPoint {
    pub date: String,
    pub baseline: f64,
    pub effects: Vec<EventEffect>,
    pub total_event_effect: f64,
    pub predicted: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Simulation {
    pub indicator_code: String,
    pub baseline: f64,
    pub events: Vec<String>,
    /// Links on this indicator whose event has no date; they contribute nothing.
    pub skipped_links: Vec<String>,
    pub points: Vec<SimulationPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationSummary {
    pub indicator_code: String,
    pub year_start: i32,
    pub year_end: i32,
    pub observed_change: f64,
    pub predicted_change: f64,
    pub difference: f64,
}

/// Gradual adoption curve `impact * (1 - exp(-k * (t - lag)))`, zero before the lag.
#[must_use]
pub fn event_effect(t_months: f64, impact: f64, lag_months: f64, rate: f64) -> f64 {
    if t_months < lag_months {
        return 0.0;
    }
    impact * (1.0 - (-rate * (t_months - lag_months)).exp())
}

/// Last day of the month containing `date`.
#[must_use]
pub fn month_end(date: Date) -> Date {
    let last_day = time::util::days_in_year_month(date.year(), date.month());
    Date::from_calendar_date(date.year(), date.month(), last_day).unwrap_or(date)
}

/// Month-end dates falling inside `[start, end]`.
#[must_use]
pub fn month_ends(start: Date, end: Date) -> Vec<Date> {
    let mut out = Vec::new();
    let mut cursor = month_end(start);
    while cursor <= end {
        out.push(cursor);
        let Some(next) = cursor.next_day() else {
            break;
        };
        cursor = month_end(next);
    }
    out
}

fn direction_sign(direction: Option<&str>) -> f64 {
    let direction = direction.unwrap_or("increase").to_ascii_lowercase();
    if direction.contains("dec") || direction.contains("neg") {
        -1.0
    } else {
        1.0
    }
}

fn confidence_level(evidence_basis: Option<&str>) -> &'static str {
    match evidence_basis.map(|raw| raw.trim().to_ascii_lowercase()).as_deref() {
        Some("empirical") => "High Confidence",
        Some("literature") => "Medium Confidence",
        _ => "Low Confidence",
    }
}

pub struct ImpactModel<'a> {
    dataset: &'a Dataset,
    config: &'a ModelConfig,
    links: Vec<WeightedLink>,
}

impl<'a> ImpactModel<'a> {
    /// Joins every `impact_link` record to its parent event and weights it.
    #[must_use]
    pub fn new(dataset: &'a Dataset, config: &'a ModelConfig) -> Self {
        let links = dataset
            .of_type(RecordType::ImpactLink)
            .filter_map(|link| weigh_link(dataset, config, link))
            .collect();
        Self {
            dataset,
            config,
            links,
        }
    }

    #[must_use]
    pub fn links(&self) -> &[WeightedLink] {
        &self.links
    }

    /// Link ids whose `parent_id` matches no event record.
    #[must_use]
    pub fn unmatched_links(&self) -> Vec<&str> {
        self.links
            .iter()
            .filter(|link| link.event_date.is_none())
            .map(|link| link.link_id.as_str())
            .collect()
    }

    /// Event × indicator matrix of summed link weights; absent pairs are 0.
    #[must_use]
    pub fn matrix(&self) -> ImpactMatrix {
        let indicators: Vec<String> = self
            .links
            .iter()
            .map(|link| link.related_indicator.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut rows: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for link in &self.links {
            let weights = rows
                .entry(link.event_id.as_str())
                .or_insert_with(|| vec![0.0; indicators.len()]);
            if let Some(column) = indicators
                .iter()
                .position(|item| *item == link.related_indicator)
            {
                weights[column] += link.weight;
            }
        }

        ImpactMatrix {
            rows: rows
                .into_iter()
                .map(|(event_id, weights)| MatrixRow {
                    event_id: event_id.to_string(),
                    weights,
                })
                .collect(),
            indicators,
        }
    }

    /// Simulates an indicator over the configured window.
    ///
    /// # Errors
    /// See [`ImpactModel::simulate_between`].
    pub fn simulate(&self, indicator_code: &str) -> Result<Simulation, FiError> {
        let (start, end) = self.config.simulation_window()?;
        self.simulate_between(indicator_code, start, end)
    }

    /// Month-end trajectory: the earliest observed value plus the summed
    /// adoption curves of every dated event linked to the indicator. Time
    /// since an event is measured in 30-day months.
    ///
    /// # Errors
    /// Returns [`FiError::Analysis`] when the indicator has no observed value
    /// or the window is inverted.
    pub fn simulate_between(
        &self,
        indicator_code: &str,
        start: Date,
        end: Date,
    ) -> Result<Simulation, FiError> {
        if start > end {
            return Err(FiError::Analysis(format!(
                "simulation start {} is after end {}",
                format_date(start),
                format_date(end)
            )));
        }

        let baseline = earliest_value(self.dataset, indicator_code).ok_or_else(|| {
            FiError::Analysis(format!("no baseline observation for {indicator_code}"))
        })?;

        let relevant: Vec<&WeightedLink> = self
            .links
            .iter()
            .filter(|link| link.related_indicator == indicator_code)
            .collect();

        let mut events: Vec<String> = Vec::new();
        let mut skipped_links = Vec::new();
        let mut dated: Vec<(&WeightedLink, Date)> = Vec::new();
        for link in relevant {
            match link.event_date {
                Some(date) => {
                    if !events.contains(&link.event_id) {
                        events.push(link.event_id.clone());
                    }
                    dated.push((link, date));
                }
                None => skipped_links.push(link.link_id.clone()),
            }
        }

        let points = month_ends(start, end)
            .into_iter()
            .map(|date| {
                let mut effects: Vec<EventEffect> = events
                    .iter()
                    .map(|event_id| EventEffect {
                        event_id: event_id.clone(),
                        effect: 0.0,
                    })
                    .collect();
                for (link, event_date) in &dated {
                    let t_months = months_between(*event_date, date);
                    let effect =
                        event_effect(t_months, link.weight, link.lag_months, self.config.adoption_rate);
                    if let Some(slot) = effects.iter_mut().find(|item| item.event_id == link.event_id) {
                        slot.effect += effect;
                    }
                }
                let total_event_effect: f64 = effects.iter().map(|item| item.effect).sum();
                SimulationPoint {
                    date: format_date(date),
                    baseline,
                    effects,
                    total_event_effect,
                    predicted: baseline + total_event_effect,
                }
            })
            .collect();

        Ok(Simulation {
            indicator_code: indicator_code.to_string(),
            baseline,
            events,
            skipped_links,
            points,
        })
    }

    /// Compares the observed change between two years with the simulated one.
    ///
    /// The observed change is the difference of the yearly observation means;
    /// the predicted change runs from the start-year mean to the last
    /// simulated point of the end year.
    ///
    /// # Errors
    /// Returns [`FiError::Analysis`] when either year has no observation or
    /// the end year lies outside the simulation window.
    pub fn validate(
        &self,
        indicator_code: &str,
        year_start: i32,
        year_end: i32,
    ) -> Result<ValidationSummary, FiError> {
        let yearly_mean = |year: i32| -> Result<f64, FiError> {
            let values: Vec<f64> = self
                .dataset
                .of_type(RecordType::Observation)
                .filter(|record| record.has_indicator_code(indicator_code))
                .filter(|record| record.observation_date.map(Date::year) == Some(year))
                .filter_map(|record| record.value_numeric)
                .collect();
            mean(&values).ok_or_else(|| {
                FiError::Analysis(format!("no {indicator_code} observation in {year}"))
            })
        };

        let start_mean = yearly_mean(year_start)?;
        let end_mean = yearly_mean(year_end)?;

        let simulation = self.simulate(indicator_code)?;
        let year_prefix = format!("{year_end:04}-");
        let predicted_end = simulation
            .points
            .iter()
            .rev()
            .find(|point| point.date.starts_with(&year_prefix))
            .map(|point| point.predicted)
            .ok_or_else(|| {
                FiError::Analysis(format!("{year_end} is outside the simulation window"))
            })?;

        let observed_change = end_mean - start_mean;
        let predicted_change = predicted_end - start_mean;
        Ok(ValidationSummary {
            indicator_code: indicator_code.to_string(),
            year_start,
            year_end,
            observed_change,
            predicted_change,
            difference: predicted_change - observed_change,
        })
    }
}

fn weigh_link(dataset: &Dataset, config: &ModelConfig, link: &Record) -> Option<WeightedLink> {
    let event_id = link.parent_id.clone()?;
    let related_indicator = link.related_indicator.clone()?;
    let event = dataset
        .get(&event_id)
        .filter(|record| record.record_type == RecordType::Event);

    let magnitude = match link.impact_estimate {
        Some(estimate) if estimate != 0.0 => estimate,
        _ => config.magnitude_fallback(link.impact_magnitude.as_deref()),
    };
    let evidence_weight = config.evidence_weight(link.evidence_basis.as_deref());
    let weight = magnitude * direction_sign(link.impact_direction.as_deref()) * evidence_weight;

    Some(WeightedLink {
        link_id: link.record_id.clone(),
        event_id,
        event_date: event.and_then(|record| record.observation_date),
        event_indicator: event.and_then(|record| record.indicator.clone()),
        event_category: event.and_then(|record| record.category.clone()),
        related_indicator,
        impact_direction: link.impact_direction.clone(),
        impact_magnitude: link.impact_magnitude.clone(),
        impact_estimate: link.impact_estimate,
        lag_months: link.lag_months.unwrap_or(0.0),
        evidence_basis: link.evidence_basis.clone(),
        evidence_weight,
        weight,
        confidence_level: confidence_level(link.evidence_basis.as_deref()).to_string(),
    })
}

fn earliest_value(dataset: &Dataset, indicator_code: &str) -> Option<f64> {
    let mut observed: Vec<&Record> = dataset
        .of_type(RecordType::Observation)
        .filter(|record| record.has_indicator_code(indicator_code))
        .collect();
    observed.sort_by_key(|record| (record.observation_date.is_none(), record.observation_date));
    observed.iter().find_map(|record| record.value_numeric)
}

#[allow(clippy::cast_precision_loss)]
fn months_between(from: Date, to: Date) -> f64 {
    (to - from).whole_days() as f64 / 30.0
}

/// Plain-text description of the impact model.
#[must_use]
pub fn methodology_text() -> &'static str {
    "\
# Event impact methodology

## Events and links
An event is a dated shock such as a product launch, a policy change or an
infrastructure reform. An impact link ties one event to one indicator and
records the direction of the effect, its magnitude or numeric estimate, a
lag in months, and the evidence basis (empirical, literature, theoretical).

## Link weight
weight = impact x sign x evidence_weight

impact is the numeric estimate when present and non-zero, otherwise a
fallback from the magnitude label (high 0.8, medium 0.5, low 0.2, other 0.1).
sign is -1 for decreasing or negative directions. Evidence weights are
empirical 1.0, literature 0.7, theoretical 0.4, other 0.5, so effects borrowed
from comparable countries count for less than effects measured locally.

## Adoption over time
Effects build up gradually once the lag has passed:

    effect(t) = weight x (1 - exp(-k (t - lag)))   for t >= lag, else 0

t is measured in months since the event and k defaults to 0.3.

## Combining events
Effects on one indicator add up:

    predicted(t) = baseline + sum of event effects at t

The baseline is the earliest observed value of the indicator.

## Validation
Simulated change between two survey years is compared with the observed
change, for example mobile money account ownership moving from 4.7% in 2021
to 9.45% in 2024 after the Telebirr launch.

## Limitations
Interactions between events are ignored, lag lengths are approximate, and the
sparse survey series leaves little room for calibration.
"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_date_lenient;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn must_date(value: &str) -> Date {
        match parse_date_lenient(value) {
            Some(date) => date,
            None => panic!("bad test date {value}"),
        }
    }

    fn observation(id: &str, date: &str, value: f64) -> Record {
        let mut record = Record::new(id, RecordType::Observation);
        record.indicator_code = Some("ACC_MM_ACCOUNT".to_string());
        record.observation_date = parse_date_lenient(date);
        record.value_numeric = Some(value);
        record
    }

    fn event(id: &str, date: &str) -> Record {
        let mut record = Record::new(id, RecordType::Event);
        record.observation_date = parse_date_lenient(date);
        record.indicator = Some(format!("{id} launch"));
        record
    }

    fn link(id: &str, parent: &str, estimate: Option<f64>, direction: &str, basis: &str) -> Record {
        let mut record = Record::new(id, RecordType::ImpactLink);
        record.parent_id = Some(parent.to_string());
        record.related_indicator = Some("ACC_MM_ACCOUNT".to_string());
        record.impact_estimate = estimate;
        record.impact_magnitude = Some("medium".to_string());
        record.impact_direction = Some(direction.to_string());
        record.evidence_basis = Some(basis.to_string());
        record.lag_months = Some(6.0);
        record
    }

    fn sample() -> Dataset {
        must_ok(Dataset::from_records(vec![
            observation("REC_0002", "2024-12-31", 9.45),
            observation("REC_0001", "2021-12-31", 4.7),
            event("EVT_0001", "2021-05-11"),
            event("EVT_0002", "2023-08-16"),
            link("LNK_0001", "EVT_0001", Some(5.0), "increase", "empirical"),
            link("LNK_0002", "EVT_0002", None, "increase", "literature"),
            link("LNK_0003", "EVT_0002", Some(1.0), "decrease", "theoretical"),
            link("LNK_0004", "EVT_9999", Some(2.0), "increase", "empirical"),
        ]))
    }

    #[test]
    fn adoption_curve_is_zero_before_lag_and_approaches_impact() {
        assert!(event_effect(5.9, 4.0, 6.0, 0.3).abs() < f64::EPSILON);
        assert!(event_effect(6.0, 4.0, 6.0, 0.3).abs() < f64::EPSILON);
        let late = event_effect(200.0, 4.0, 6.0, 0.3);
        assert!((late - 4.0).abs() < 1e-9);
        let mid = event_effect(12.0, 4.0, 6.0, 0.3);
        assert!(mid > 0.0 && mid < 4.0);
    }

    #[test]
    fn month_ends_cover_window_inclusively() {
        let ends = month_ends(must_date("2021-01-01"), must_date("2027-12-31"));
        assert_eq!(ends.len(), 84);
        assert_eq!(format_date(ends[0]), "2021-01-31");
        assert_eq!(format_date(ends[1]), "2021-02-28");
        assert_eq!(format_date(ends[37]), "2024-02-29");
        assert_eq!(ends.last().copied().map(format_date).as_deref(), Some("2027-12-31"));
    }

    #[test]
    fn link_weights_follow_estimate_fallback_sign_and_evidence() {
        let dataset = sample();
        let config = ModelConfig::v1();
        let model = ImpactModel::new(&dataset, &config);

        let weight = |id: &str| {
            model
                .links()
                .iter()
                .find(|link| link.link_id == id)
                .map(|link| link.weight)
        };
        assert!(weight("LNK_0001").is_some_and(|value| (value - 5.0).abs() < 1e-12));
        assert!(weight("LNK_0002").is_some_and(|value| (value - 0.35).abs() < 1e-12));
        assert!(weight("LNK_0003").is_some_and(|value| (value + 0.4).abs() < 1e-12));

        let labels: Vec<&str> = model
            .links()
            .iter()
            .map(|link| link.confidence_level.as_str())
            .collect();
        assert_eq!(
            labels,
            vec!["High Confidence", "Medium Confidence", "Low Confidence", "High Confidence"]
        );
        assert_eq!(model.unmatched_links(), vec!["LNK_0004"]);
    }

    #[test]
    fn matrix_sums_weights_per_event_and_indicator() {
        let dataset = sample();
        let config = ModelConfig::v1();
        let matrix = ImpactModel::new(&dataset, &config).matrix();

        assert_eq!(matrix.indicators, vec!["ACC_MM_ACCOUNT"]);
        assert_eq!(matrix.rows.len(), 3);
        let combined = matrix.weight("EVT_0002", "ACC_MM_ACCOUNT");
        assert!(combined.is_some_and(|value| (value + 0.05).abs() < 1e-12));
    }

    #[test]
    fn simulation_starts_at_earliest_observation_and_sums_effects() {
        let dataset = sample();
        let config = ModelConfig::v1();
        let simulation = must_ok(ImpactModel::new(&dataset, &config).simulate("ACC_MM_ACCOUNT"));

        assert!((simulation.baseline - 4.7).abs() < 1e-12);
        assert_eq!(simulation.events, vec!["EVT_0001", "EVT_0002"]);
        assert_eq!(simulation.skipped_links, vec!["LNK_0004"]);
        assert_eq!(simulation.points.len(), 84);

        let first = &simulation.points[0];
        assert!(first.total_event_effect.abs() < f64::EPSILON);

        for point in &simulation.points {
            let sum: f64 = point.effects.iter().map(|item| item.effect).sum();
            assert!((point.total_event_effect - sum).abs() < 1e-12);
            assert!((point.predicted - point.baseline - point.total_event_effect).abs() < 1e-12);
        }

        let last = &simulation.points[83];
        assert!(last.predicted > 9.6 && last.predicted < 9.7);
    }

    #[test]
    fn simulation_without_observations_is_an_error() {
        let dataset = sample();
        let config = ModelConfig::v1();
        assert!(ImpactModel::new(&dataset, &config)
            .simulate("USG_MM_ACTIVE")
            .is_err());
    }

    #[test]
    fn validation_compares_observed_and_predicted_change() {
        let dataset = sample();
        let config = ModelConfig::v1();
        let model = ImpactModel::new(&dataset, &config);
        let summary = must_ok(model.validate("ACC_MM_ACCOUNT", 2021, 2024));

        assert!((summary.observed_change - 4.75).abs() < 1e-9);
        assert!(
            (summary.difference - (summary.predicted_change - summary.observed_change)).abs()
                < 1e-12
        );
        assert!(model.validate("ACC_MM_ACCOUNT", 2021, 2022).is_err());
    }

    #[test]
    fn methodology_describes_the_adoption_curve() {
        let text = methodology_text();
        assert!(text.contains("1 - exp(-k (t - lag))"));
        assert!(text.contains("evidence"));
    }
}
