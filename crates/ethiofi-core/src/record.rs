use serde::{Deserialize, Serialize};
use time::Date;

use crate::{format_date, parse_date_lenient, FiError};

/// Canonical column order of the unified dataset.
pub const COLUMNS: [&str; 35] = [
    "record_id",
    "parent_id",
    "record_type",
    "category",
    "pillar",
    "indicator",
    "indicator_code",
    "indicator_direction",
    "value_numeric",
    "value_text",
    "value_type",
    "unit",
    "observation_date",
    "period_start",
    "period_end",
    "fiscal_year",
    "gender",
    "location",
    "region",
    "source_name",
    "source_type",
    "source_url",
    "confidence",
    "related_indicator",
    "relationship_type",
    "impact_direction",
    "impact_magnitude",
    "impact_estimate",
    "lag_months",
    "evidence_basis",
    "comparable_country",
    "collected_by",
    "collection_date",
    "original_text",
    "notes",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Observation,
    Event,
    ImpactLink,
    Target,
}

impl RecordType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Event => "event",
            Self::ImpactLink => "impact_link",
            Self::Target => "target",
        }
    }

    /// Case-insensitive; spaces and hyphens are read as underscores.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "observation" => Some(Self::Observation),
            "event" => Some(Self::Event),
            "impact_link" => Some(Self::ImpactLink),
            "target" => Some(Self::Target),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Title-case form used in the enrichment log table.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// One row of the unified dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub record_id: String,
    pub parent_id: Option<String>,
    pub record_type: RecordType,
    pub category: Option<String>,
    pub pillar: Option<String>,
    pub indicator: Option<String>,
    pub indicator_code: Option<String>,
    pub indicator_direction: Option<String>,
    pub value_numeric: Option<f64>,
    pub value_text: Option<String>,
    pub value_type: Option<String>,
    pub unit: Option<String>,
    #[serde(default, with = "crate::date_serde")]
    pub observation_date: Option<Date>,
    #[serde(default, with = "crate::date_serde")]
    pub period_start: Option<Date>,
    #[serde(default, with = "crate::date_serde")]
    pub period_end: Option<Date>,
    pub fiscal_year: Option<String>,
    pub gender: Option<String>,
    pub location: Option<String>,
    pub region: Option<String>,
    pub source_name: Option<String>,
    pub source_type: Option<String>,
    pub source_url: Option<String>,
    pub confidence: Option<Confidence>,
    pub related_indicator: Option<String>,
    pub relationship_type: Option<String>,
    pub impact_direction: Option<String>,
    pub impact_magnitude: Option<String>,
    pub impact_estimate: Option<f64>,
    pub lag_months: Option<f64>,
    pub evidence_basis: Option<String>,
    pub comparable_country: Option<String>,
    pub collected_by: Option<String>,
    #[serde(default, with = "crate::date_serde")]
    pub collection_date: Option<Date>,
    pub original_text: Option<String>,
    pub notes: Option<String>,
}

impl Record {
    /// Creates a record with every optional column empty.
    #[must_use]
    pub fn new(record_id: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            record_id: record_id.into(),
            parent_id: None,
            record_type,
            category: None,
            pillar: None,
            indicator: None,
            indicator_code: None,
            indicator_direction: None,
            value_numeric: None,
            value_text: None,
            value_type: None,
            unit: None,
            observation_date: None,
            period_start: None,
            period_end: None,
            fiscal_year: None,
            gender: None,
            location: None,
            region: None,
            source_name: None,
            source_type: None,
            source_url: None,
            confidence: None,
            related_indicator: None,
            relationship_type: None,
            impact_direction: None,
            impact_magnitude: None,
            impact_estimate: None,
            lag_months: None,
            evidence_basis: None,
            comparable_country: None,
            collected_by: None,
            collection_date: None,
            original_text: None,
            notes: None,
        }
    }

    /// Validates structural constraints before a record enters the dataset.
    ///
    /// # Errors
    /// Returns [`FiError::Validation`] when the identifier is blank or padded,
    /// an impact link lacks its parent or target indicator, or a numeric
    /// field is out of range.
    pub fn validate(&self) -> Result<(), FiError> {
        if self.record_id.trim().is_empty() {
            return Err(FiError::Validation(
                "record_id MUST be non-empty".to_string(),
            ));
        }

        if self.record_id.trim() != self.record_id {
            return Err(FiError::Validation(format!(
                "record_id MUST NOT carry surrounding whitespace: {:?}",
                self.record_id
            )));
        }

        if self.record_type == RecordType::ImpactLink {
            if is_blank(self.parent_id.as_deref()) {
                return Err(FiError::Validation(format!(
                    "impact_link {} requires parent_id",
                    self.record_id
                )));
            }
            if is_blank(self.related_indicator.as_deref()) {
                return Err(FiError::Validation(format!(
                    "impact_link {} requires related_indicator",
                    self.record_id
                )));
            }
        }

        if let Some(lag) = self.lag_months {
            if !lag.is_finite() || lag < 0.0 {
                return Err(FiError::Validation(format!(
                    "lag_months MUST be >= 0 for {}",
                    self.record_id
                )));
            }
        }

        for (name, value) in [
            ("value_numeric", self.value_numeric),
            ("impact_estimate", self.impact_estimate),
        ] {
            if value.is_some_and(|item| !item.is_finite()) {
                return Err(FiError::Validation(format!(
                    "{name} MUST be finite for {}",
                    self.record_id
                )));
            }
        }

        Ok(())
    }

    /// Observation year, falling back to a numeric `fiscal_year`.
    #[must_use]
    pub fn year(&self) -> Option<i32> {
        self.observation_date.map(Date::year).or_else(|| {
            self.fiscal_year
                .as_deref()
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|value| value.fract() == 0.0)
                .and_then(|value| format!("{value:.0}").parse().ok())
        })
    }

    /// National totals carry `gender = all`; an empty gender is read the same way.
    #[must_use]
    pub fn is_national(&self) -> bool {
        match self.gender.as_deref() {
            Some(gender) => gender.trim().eq_ignore_ascii_case("all"),
            None => true,
        }
    }

    #[must_use]
    pub fn has_indicator_code(&self, code: &str) -> bool {
        self.indicator_code.as_deref() == Some(code)
    }

    /// Renders the record as CSV cells in [`COLUMNS`] order.
    #[must_use]
    pub fn to_row(&self) -> Vec<String> {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        let number = |value: Option<f64>| value.map(|item| item.to_string()).unwrap_or_default();
        let date = |value: Option<Date>| value.map(format_date).unwrap_or_default();

        vec![
            self.record_id.clone(),
            text(&self.parent_id),
            self.record_type.as_str().to_string(),
            text(&self.category),
            text(&self.pillar),
            text(&self.indicator),
            text(&self.indicator_code),
            text(&self.indicator_direction),
            number(self.value_numeric),
            text(&self.value_text),
            text(&self.value_type),
            text(&self.unit),
            date(self.observation_date),
            date(self.period_start),
            date(self.period_end),
            text(&self.fiscal_year),
            text(&self.gender),
            text(&self.location),
            text(&self.region),
            text(&self.source_name),
            text(&self.source_type),
            text(&self.source_url),
            self.confidence
                .map(|item| item.as_str().to_string())
                .unwrap_or_default(),
            text(&self.related_indicator),
            text(&self.relationship_type),
            text(&self.impact_direction),
            text(&self.impact_magnitude),
            number(self.impact_estimate),
            number(self.lag_months),
            text(&self.evidence_basis),
            text(&self.comparable_country),
            text(&self.collected_by),
            date(self.collection_date),
            text(&self.original_text),
            text(&self.notes),
        ]
    }

    /// Builds a record from named cells. `cell` returns the raw value of a
    /// canonical column, or `None` when the column is absent.
    ///
    /// Unparseable dates are dropped and reported in the returned warnings.
    ///
    /// # Errors
    /// Returns [`FiError::Parse`] for an unknown `record_type`, `confidence`
    /// or a non-numeric value in a numeric column.
    pub fn from_cells<'a>(
        cell: impl Fn(&str) -> Option<&'a str>,
    ) -> Result<(Self, Vec<String>), FiError> {
        let text = |name: &str| -> Option<String> {
            cell(name)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let record_id = text("record_id").unwrap_or_default();
        let mut warnings = Vec::new();

        let record_type_raw = text("record_type").ok_or_else(|| {
            FiError::Parse(format!("record {record_id:?} is missing record_type"))
        })?;
        let record_type = RecordType::parse(&record_type_raw).ok_or_else(|| {
            FiError::Parse(format!(
                "record {record_id:?} has unknown record_type {record_type_raw:?}"
            ))
        })?;

        let number = |name: &str| -> Result<Option<f64>, FiError> {
            match text(name) {
                None => Ok(None),
                Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| {
                    FiError::Parse(format!(
                        "record {record_id:?} has non-numeric {name}: {raw:?}"
                    ))
                }),
            }
        };

        let mut date = |name: &str| -> Option<Date> {
            let raw = text(name)?;
            let parsed = parse_date_lenient(&raw);
            if parsed.is_none() {
                warnings.push(format!(
                    "record {record_id}: unparseable {name} {raw:?} treated as empty"
                ));
            }
            parsed
        };

        let observation_date = date("observation_date");
        let period_start = date("period_start");
        let period_end = date("period_end");
        let collection_date = date("collection_date");

        let confidence = match text("confidence") {
            None => None,
            Some(raw) => Some(Confidence::parse(&raw).ok_or_else(|| {
                FiError::Parse(format!(
                    "record {record_id:?} has unknown confidence {raw:?}"
                ))
            })?),
        };

        let record = Self {
            record_id: record_id.clone(),
            parent_id: text("parent_id"),
            record_type,
            category: text("category"),
            pillar: text("pillar"),
            indicator: text("indicator"),
            indicator_code: text("indicator_code"),
            indicator_direction: text("indicator_direction"),
            value_numeric: number("value_numeric")?,
            value_text: text("value_text"),
            value_type: text("value_type"),
            unit: text("unit"),
            observation_date,
            period_start,
            period_end,
            fiscal_year: text("fiscal_year"),
            gender: text("gender"),
            location: text("location"),
            region: text("region"),
            source_name: text("source_name"),
            source_type: text("source_type"),
            source_url: text("source_url"),
            confidence,
            related_indicator: text("related_indicator"),
            relationship_type: text("relationship_type"),
            impact_direction: text("impact_direction"),
            impact_magnitude: text("impact_magnitude"),
            impact_estimate: number("impact_estimate")?,
            lag_months: number("lag_months")?,
            evidence_basis: text("evidence_basis"),
            comparable_country: text("comparable_country"),
            collected_by: text("collected_by"),
            collection_date,
            original_text: text("original_text"),
            notes: text("notes"),
        };

        Ok((record, warnings))
    }
}

fn is_blank(value: Option<&str>) -> bool {
    match value {
        Some(item) => item.trim().is_empty(),
        None => true,
    }
}
