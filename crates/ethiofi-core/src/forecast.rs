//! Yearly forecasts: linear trend, event-augmented trend and scenarios.

use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::dataset::Dataset;
use crate::record::{Record, RecordType};
use crate::stats::linear_fit;
use crate::FiError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselinePoint {
    pub year: i32,
    pub baseline: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineForecast {
    pub indicator_code: String,
    pub observations: usize,
    pub slope: f64,
    pub intercept: f64,
    pub points: Vec<BaselinePoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventForecastPoint {
    pub year: i32,
    pub baseline: f64,
    pub event_effect: f64,
    pub forecast: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventForecast {
    pub indicator_code: String,
    pub points: Vec<EventForecastPoint>,
    /// Links skipped because their event is missing or undated, or they carry no estimate.
    pub skipped_links: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioPoint {
    pub year: i32,
    pub forecast: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSet {
    pub contract_version: String,
    pub indicator_code: String,
    pub config_version: u32,
    pub baseline: Vec<ScenarioPoint>,
    pub with_events: Vec<ScenarioPoint>,
    pub optimistic: Vec<ScenarioPoint>,
    pub pessimistic: Vec<ScenarioPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioValue {
    pub scenario: String,
    pub forecast: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contribution {
    pub link_id: String,
    pub parent_id: String,
    pub impact_estimate: Option<f64>,
    pub lag_months: Option<f64>,
    pub confidence: Option<String>,
    pub evidence_basis: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetPoint {
    pub year: i32,
    pub with_events: f64,
    pub optimistic: f64,
    pub pessimistic: f64,
    /// `target - with_events`; positive while the target is not met.
    pub gap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetReach {
    pub scenario: String,
    pub first_year: Option<i32>,
}

/// Scenario trajectories measured against an inclusion target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetProgress {
    pub contract_version: String,
    pub indicator_code: String,
    pub config_version: u32,
    pub target_value: f64,
    pub target_year: Option<i32>,
    /// `record_id` of the `target` record, or `config` for the configured default.
    pub target_source: String,
    pub points: Vec<TargetPoint>,
    pub reached: Vec<TargetReach>,
    /// The event-augmented path meets the target, by its year when it has one.
    pub on_track: bool,
}

impl ScenarioSet {
    pub fn scenarios(&self) -> impl Iterator<Item = (&'static str, &[ScenarioPoint])> {
        [
            ("baseline", self.baseline.as_slice()),
            ("with_events", self.with_events.as_slice()),
            ("optimistic", self.optimistic.as_slice()),
            ("pessimistic", self.pessimistic.as_slice()),
        ]
        .into_iter()
    }

    /// Forecast of every scenario for one year.
    ///
    /// # Errors
    /// Returns [`FiError::Analysis`] when `year` is not a forecast year.
    pub fn summary(&self, year: i32) -> Result<Vec<ScenarioValue>, FiError> {
        let values: Vec<ScenarioValue> = self
            .scenarios()
            .filter_map(|(name, points)| {
                points
                    .iter()
                    .find(|point| point.year == year)
                    .map(|point| ScenarioValue {
                        scenario: name.to_string(),
                        forecast: point.forecast,
                    })
            })
            .collect();

        if values.is_empty() {
            return Err(FiError::Analysis(format!(
                "{year} is not among the forecast years of {}",
                self.indicator_code
            )));
        }
        Ok(values)
    }
}

pub struct Forecaster<'a> {
    dataset: &'a Dataset,
    config: &'a ModelConfig,
}

impl<'a> Forecaster<'a> {
    #[must_use]
    pub fn new(dataset: &'a Dataset, config: &'a ModelConfig) -> Self {
        Self { dataset, config }
    }

    /// Least-squares trend over the national observations of an indicator.
    ///
    /// # Errors
    /// Returns [`FiError::Analysis`] when no national observation carries
    /// both a year and a value.
    pub fn baseline(&self, indicator_code: &str) -> Result<BaselineForecast, FiError> {
        let history: Vec<(f64, f64)> = self
            .dataset
            .of_type(RecordType::Observation)
            .filter(|record| record.has_indicator_code(indicator_code) && record.is_national())
            .filter_map(|record| Some((f64::from(record.year()?), record.value_numeric?)))
            .collect();

        let (slope, intercept) = linear_fit(&history).ok_or_else(|| {
            FiError::Analysis(format!(
                "no national observations to fit a trend for {indicator_code}"
            ))
        })?;

        Ok(BaselineForecast {
            indicator_code: indicator_code.to_string(),
            observations: history.len(),
            slope,
            intercept,
            points: self
                .config
                .forecast_years
                .iter()
                .map(|year| BaselinePoint {
                    year: *year,
                    baseline: intercept + slope * f64::from(*year),
                })
                .collect(),
        })
    }

    /// Baseline plus the estimates of linked events.
    ///
    /// A link takes effect from `event year + whole years of lag` and adds
    /// its `impact_estimate` to every forecast year from then on.
    ///
    /// # Errors
    /// See [`Forecaster::baseline`].
    pub fn event_augmented(&self, indicator_code: &str) -> Result<EventForecast, FiError> {
        let baseline = self.baseline(indicator_code)?;
        let mut effects = vec![0.0_f64; baseline.points.len()];
        let mut skipped_links = Vec::new();

        for link in self.links_for(indicator_code) {
            let event_year = link
                .parent_id
                .as_deref()
                .and_then(|parent| self.dataset.get(parent))
                .filter(|event| event.record_type == RecordType::Event)
                .and_then(|event| event.observation_date)
                .map(time::Date::year);
            let (Some(event_year), Some(impact)) = (event_year, link.impact_estimate) else {
                skipped_links.push(link.record_id.clone());
                continue;
            };

            let effect_year = event_year + whole_years(link.lag_months.unwrap_or(0.0));
            for (point, effect) in baseline.points.iter().zip(effects.iter_mut()) {
                if point.year >= effect_year {
                    *effect += impact;
                }
            }
        }

        Ok(EventForecast {
            indicator_code: indicator_code.to_string(),
            points: baseline
                .points
                .iter()
                .zip(effects)
                .map(|(point, event_effect)| EventForecastPoint {
                    year: point.year,
                    baseline: point.baseline,
                    event_effect,
                    forecast: point.baseline + event_effect,
                })
                .collect(),
            skipped_links,
        })
    }

    /// Baseline, event-augmented, optimistic and pessimistic trajectories.
    ///
    /// Optimistic and pessimistic scale the event effect and are clipped to
    /// the configured range; the other two are left unclipped.
    ///
    /// # Errors
    /// See [`Forecaster::baseline`].
    pub fn scenarios(&self, indicator_code: &str) -> Result<ScenarioSet, FiError> {
        let with_events = self.event_augmented(indicator_code)?;
        let scaled = |multiplier: f64| -> Vec<ScenarioPoint> {
            with_events
                .points
                .iter()
                .map(|point| ScenarioPoint {
                    year: point.year,
                    forecast: (point.baseline + point.event_effect * multiplier)
                        .clamp(self.config.clip_min, self.config.clip_max),
                })
                .collect()
        };

        Ok(ScenarioSet {
            contract_version: "scenario_set.v1".to_string(),
            indicator_code: indicator_code.to_string(),
            config_version: self.config.config_version,
            baseline: with_events
                .points
                .iter()
                .map(|point| ScenarioPoint {
                    year: point.year,
                    forecast: point.baseline,
                })
                .collect(),
            optimistic: scaled(self.config.optimistic_multiplier),
            pessimistic: scaled(self.config.pessimistic_multiplier),
            with_events: with_events
                .points
                .iter()
                .map(|point| ScenarioPoint {
                    year: point.year,
                    forecast: point.forecast,
                })
                .collect(),
        })
    }

    /// Compares the with-events, optimistic and pessimistic paths with the
    /// latest `target` record of the indicator, or `default_target` when the
    /// dataset has none.
    ///
    /// # Errors
    /// See [`Forecaster::baseline`].
    pub fn target_progress(&self, indicator_code: &str) -> Result<TargetProgress, FiError> {
        let set = self.scenarios(indicator_code)?;

        let target = self
            .dataset
            .of_type(RecordType::Target)
            .filter(|record| record.has_indicator_code(indicator_code))
            .filter_map(|record| Some((record, record.value_numeric?)))
            .fold(None, |latest: Option<(&Record, f64)>, candidate| match latest {
                Some(current) if current.0.year() > candidate.0.year() => Some(current),
                _ => Some(candidate),
            });
        let (target_value, target_year, target_source) = match target {
            Some((record, value)) => (value, record.year(), record.record_id.clone()),
            None => (self.config.default_target, None, "config".to_string()),
        };

        let points: Vec<TargetPoint> = set
            .with_events
            .iter()
            .zip(&set.optimistic)
            .zip(&set.pessimistic)
            .map(|((with_events, optimistic), pessimistic)| TargetPoint {
                year: with_events.year,
                with_events: with_events.forecast,
                optimistic: optimistic.forecast,
                pessimistic: pessimistic.forecast,
                gap: target_value - with_events.forecast,
            })
            .collect();

        let first_year = |path: &[ScenarioPoint]| {
            path.iter()
                .find(|point| point.forecast >= target_value)
                .map(|point| point.year)
        };
        let reached = [
            ("with_events", set.with_events.as_slice()),
            ("optimistic", set.optimistic.as_slice()),
            ("pessimistic", set.pessimistic.as_slice()),
        ]
        .into_iter()
        .map(|(scenario, path)| TargetReach {
            scenario: scenario.to_string(),
            first_year: first_year(path),
        })
        .collect();

        let on_track = match (first_year(&set.with_events), target_year) {
            (Some(year), Some(deadline)) => year <= deadline,
            (Some(_), None) => true,
            (None, _) => false,
        };

        Ok(TargetProgress {
            contract_version: "target_progress.v1".to_string(),
            indicator_code: indicator_code.to_string(),
            config_version: self.config.config_version,
            target_value,
            target_year,
            target_source,
            points,
            reached,
            on_track,
        })
    }

    /// Impact links feeding an indicator's event-augmented forecast.
    #[must_use]
    pub fn explain(&self, indicator_code: &str) -> Vec<Contribution> {
        self.links_for(indicator_code)
            .map(|link| Contribution {
                link_id: link.record_id.clone(),
                parent_id: link.parent_id.clone().unwrap_or_default(),
                impact_estimate: link.impact_estimate,
                lag_months: link.lag_months,
                confidence: link.confidence.map(|item| item.label().to_string()),
                evidence_basis: link.evidence_basis.clone(),
            })
            .collect()
    }

    fn links_for<'s>(&'s self, indicator_code: &'s str) -> impl Iterator<Item = &'a Record> + 's {
        self.dataset
            .of_type(RecordType::ImpactLink)
            .filter(move |link| link.related_indicator.as_deref() == Some(indicator_code))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn whole_years(lag_months: f64) -> i32 {
    (lag_months / 12.0).trunc() as i32
}
