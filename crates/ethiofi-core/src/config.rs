use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use crate::FiError;

/// Versioned parameters of the impact model and forecaster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub config_version: u32,
    /// Down-weighting per `evidence_basis` (lower-cased key).
    pub evidence_weights: BTreeMap<String, f64>,
    pub default_evidence_weight: f64,
    /// Impact used when a link carries no non-zero `impact_estimate`.
    pub magnitude_fallbacks: BTreeMap<String, f64>,
    pub default_magnitude: f64,
    /// Rate `k` of the gradual adoption curve.
    pub adoption_rate: f64,
    pub simulation_start: String,
    pub simulation_end: String,
    pub forecast_years: Vec<i32>,
    pub optimistic_multiplier: f64,
    pub pessimistic_multiplier: f64,
    pub clip_min: f64,
    pub clip_max: f64,
    pub correlation_threshold: f64,
    /// Inclusion target used when the dataset carries no `target` record.
    #[serde(default = "default_target")]
    pub default_target: f64,
}

fn default_target() -> f64 {
    60.0
}

impl ModelConfig {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            config_version: 1,
            evidence_weights: BTreeMap::from([
                ("empirical".to_string(), 1.0),
                ("literature".to_string(), 0.7),
                ("theoretical".to_string(), 0.4),
            ]),
            default_evidence_weight: 0.5,
            magnitude_fallbacks: BTreeMap::from([
                ("high".to_string(), 0.8),
                ("medium".to_string(), 0.5),
                ("low".to_string(), 0.2),
            ]),
            default_magnitude: 0.1,
            adoption_rate: 0.3,
            simulation_start: "2021-01-01".to_string(),
            simulation_end: "2027-12-31".to_string(),
            forecast_years: vec![2025, 2026, 2027],
            optimistic_multiplier: 1.2,
            pessimistic_multiplier: 0.6,
            clip_min: 0.0,
            clip_max: 100.0,
            correlation_threshold: 0.5,
            default_target: default_target(),
        }
    }

    /// Validates numeric bounds and the simulation window.
    ///
    /// # Errors
    /// Returns [`FiError::Configuration`] when one or more fields are outside
    /// allowed bounds.
    pub fn validate(&self) -> Result<(), FiError> {
        if self.config_version == 0 {
            return Err(FiError::Configuration(
                "config_version MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in self
            .evidence_weights
            .iter()
            .map(|(key, value)| (format!("evidence_weights.{key}"), *value))
            .chain([(
                "default_evidence_weight".to_string(),
                self.default_evidence_weight,
            )])
        {
            if !(0.0..=1.0).contains(&value) {
                return Err(FiError::Configuration(format!(
                    "{name} MUST be in [0.0, 1.0]"
                )));
            }
        }

        for (name, value) in [
            ("default_magnitude", self.default_magnitude),
            ("adoption_rate", self.adoption_rate),
            ("optimistic_multiplier", self.optimistic_multiplier),
            ("pessimistic_multiplier", self.pessimistic_multiplier),
        ]
        .into_iter()
        .chain(
            self.magnitude_fallbacks
                .values()
                .map(|value| ("magnitude_fallbacks", *value)),
        ) {
            if !value.is_finite() || value < 0.0 {
                return Err(FiError::Configuration(format!(
                    "{name} MUST be a finite value >= 0"
                )));
            }
        }

        if self.adoption_rate <= 0.0 {
            return Err(FiError::Configuration(
                "adoption_rate MUST be > 0".to_string(),
            ));
        }

        if self.pessimistic_multiplier > self.optimistic_multiplier {
            return Err(FiError::Configuration(
                "pessimistic_multiplier cannot exceed optimistic_multiplier".to_string(),
            ));
        }

        if !self.clip_min.is_finite() || !self.clip_max.is_finite() || self.clip_min >= self.clip_max
        {
            return Err(FiError::Configuration(
                "clip_min MUST be below clip_max".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return Err(FiError::Configuration(
                "correlation_threshold MUST be in [0.0, 1.0]".to_string(),
            ));
        }

        if !self.default_target.is_finite()
            || !(self.clip_min..=self.clip_max).contains(&self.default_target)
        {
            return Err(FiError::Configuration(
                "default_target MUST lie within [clip_min, clip_max]".to_string(),
            ));
        }

        if self.forecast_years.is_empty() {
            return Err(FiError::Configuration(
                "forecast_years MUST name at least one year".to_string(),
            ));
        }

        if self.forecast_years.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(FiError::Configuration(
                "forecast_years MUST be strictly increasing".to_string(),
            ));
        }

        let (start, end) = self.simulation_window()?;
        if start > end {
            return Err(FiError::Configuration(
                "simulation_start cannot be after simulation_end".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed simulation window.
    ///
    /// # Errors
    /// Returns [`FiError::Configuration`] when either bound is not a date.
    pub fn simulation_window(&self) -> Result<(Date, Date), FiError> {
        let parse = |name: &str, raw: &str| {
            crate::parse_date(raw)
                .map_err(|err| FiError::Configuration(format!("{name}: {err}")))
        };
        Ok((
            parse("simulation_start", &self.simulation_start)?,
            parse("simulation_end", &self.simulation_end)?,
        ))
    }

    #[must_use]
    pub fn evidence_weight(&self, evidence_basis: Option<&str>) -> f64 {
        evidence_basis
            .map(|raw| raw.trim().to_ascii_lowercase())
            .and_then(|key| self.evidence_weights.get(&key).copied())
            .unwrap_or(self.default_evidence_weight)
    }

    #[must_use]
    pub fn magnitude_fallback(&self, impact_magnitude: Option<&str>) -> f64 {
        impact_magnitude
            .map(|raw| raw.trim().to_ascii_lowercase())
            .and_then(|key| self.magnitude_fallbacks.get(&key).copied())
            .unwrap_or(self.default_magnitude)
    }

    /// Decodes and validates a configuration from JSON.
    ///
    /// # Errors
    /// Returns [`FiError::Configuration`] when JSON decoding fails
    /// or decoded values violate configuration constraints.
    pub fn from_json(value: &Value) -> Result<Self, FiError> {
        let config: Self = serde_json::from_value(value.clone()).map_err(|err| {
            FiError::Configuration(format!("invalid model config JSON payload: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    #[test]
    fn v1_defaults_validate() {
        must_ok(ModelConfig::v1().validate());
    }

    #[test]
    fn evidence_weight_falls_back_to_default() {
        let config = ModelConfig::v1();
        assert!((config.evidence_weight(Some("Empirical")) - 1.0).abs() < 1e-12);
        assert!((config.evidence_weight(Some("anecdote")) - 0.5).abs() < 1e-12);
        assert!((config.evidence_weight(None) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn magnitude_fallback_uses_default_for_unknown_labels() {
        let config = ModelConfig::v1();
        assert!((config.magnitude_fallback(Some("HIGH")) - 0.8).abs() < 1e-12);
        assert!((config.magnitude_fallback(Some("huge")) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn inverted_scenarios_are_rejected() {
        let mut config = ModelConfig::v1();
        config.pessimistic_multiplier = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unordered_forecast_years_are_rejected() {
        let mut config = ModelConfig::v1();
        config.forecast_years = vec![2026, 2025];
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_json_rejects_out_of_range_evidence_weight() {
        let mut value = must_ok(serde_json::to_value(ModelConfig::v1()));
        value["evidence_weights"]["empirical"] = json!(1.5);
        assert!(ModelConfig::from_json(&value).is_err());
    }

    #[test]
    fn default_target_is_optional_in_stored_json() {
        let mut value = must_ok(serde_json::to_value(ModelConfig::v1()));
        if let Some(object) = value.as_object_mut() {
            object.remove("default_target");
        }
        let decoded = must_ok(ModelConfig::from_json(&value));
        assert!((decoded.default_target - 60.0).abs() < 1e-12);

        value["default_target"] = json!(120.0);
        assert!(ModelConfig::from_json(&value).is_err());
    }

    #[test]
    fn from_json_round_trips_v1() {
        let value = must_ok(serde_json::to_value(ModelConfig::v1()));
        let decoded = must_ok(ModelConfig::from_json(&value));
        assert_eq!(decoded, ModelConfig::v1());
    }
}
