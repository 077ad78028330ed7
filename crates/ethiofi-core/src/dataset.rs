use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{Record, RecordType};
use crate::FiError;

/// In-memory unified dataset; `record_id` is unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    records: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichmentSummary {
    pub incoming: usize,
    pub added: usize,
    pub replaced: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupCount {
    pub record_type: RecordType,
    pub pillar: String,
    pub count: usize,
}

impl Dataset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dataset, collapsing repeated ids onto their last occurrence.
    ///
    /// # Errors
    /// Returns [`FiError::Validation`] when any record fails validation.
    pub fn from_records(records: Vec<Record>) -> Result<Self, FiError> {
        let mut dataset = Self::new();
        dataset.enrich(records)?;
        Ok(dataset)
    }

    /// Appends new records and drops older rows sharing a `record_id`.
    ///
    /// The surviving row sits where its last occurrence was appended. The
    /// batch is validated up front, so a failing record leaves the dataset
    /// unchanged.
    ///
    /// # Errors
    /// Returns [`FiError::Validation`] when any incoming record is invalid.
    pub fn enrich(&mut self, incoming: Vec<Record>) -> Result<EnrichmentSummary, FiError> {
        for record in &incoming {
            record.validate()?;
        }

        let incoming_len = incoming.len();
        let mut added = 0_usize;
        let mut replaced = 0_usize;

        for record in incoming {
            if let Some(position) = self
                .records
                .iter()
                .position(|existing| existing.record_id == record.record_id)
            {
                self.records.remove(position);
                replaced += 1;
            } else {
                added += 1;
            }
            self.records.push(record);
        }

        Ok(EnrichmentSummary {
            incoming: incoming_len,
            added,
            replaced,
            total: self.records.len(),
        })
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, record_id: &str) -> Option<&Record> {
        self.records
            .iter()
            .find(|record| record.record_id == record_id)
    }

    pub fn of_type(&self, record_type: RecordType) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(move |record| record.record_type == record_type)
    }

    /// Record counts per (`record_type`, `pillar`); rows without a pillar are skipped.
    #[must_use]
    pub fn summary(&self) -> Vec<GroupCount> {
        let mut groups: BTreeMap<(RecordType, String), usize> = BTreeMap::new();
        for record in &self.records {
            if let Some(pillar) = record.pillar.as_deref() {
                *groups
                    .entry((record.record_type, pillar.to_string()))
                    .or_default() += 1;
            }
        }

        groups
            .into_iter()
            .map(|((record_type, pillar), count)| GroupCount {
                record_type,
                pillar,
                count,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn observation(id: &str, value: f64) -> Record {
        let mut record = Record::new(id, RecordType::Observation);
        record.pillar = Some("access".to_string());
        record.value_numeric = Some(value);
        record
    }

    #[test]
    fn enrich_keeps_last_occurrence_at_its_new_position() {
        let mut dataset = must_ok(Dataset::from_records(vec![
            observation("REC_0001", 14.0),
            observation("REC_0002", 22.0),
        ]));

        let summary = must_ok(dataset.enrich(vec![
            observation("REC_0001", 15.0),
            observation("REC_0003", 35.0),
        ]));

        assert_eq!(
            summary,
            EnrichmentSummary {
                incoming: 2,
                added: 1,
                replaced: 1,
                total: 3,
            }
        );

        let ids: Vec<&str> = dataset
            .records()
            .iter()
            .map(|record| record.record_id.as_str())
            .collect();
        assert_eq!(ids, vec!["REC_0002", "REC_0001", "REC_0003"]);
        assert_eq!(
            dataset.get("REC_0001").and_then(|record| record.value_numeric),
            Some(15.0)
        );
    }

    #[test]
    fn running_the_same_enrichment_twice_is_idempotent() {
        let batch = vec![observation("REC_0025", 15.0), observation("REC_0026", 9.45)];
        let mut dataset = Dataset::new();
        must_ok(dataset.enrich(batch.clone()));
        let snapshot = dataset.clone();

        let summary = must_ok(dataset.enrich(batch));
        assert_eq!(summary.added, 0);
        assert_eq!(summary.replaced, 2);
        assert_eq!(dataset, snapshot);
    }

    #[test]
    fn invalid_batch_leaves_dataset_untouched() {
        let mut dataset = must_ok(Dataset::from_records(vec![observation("REC_0001", 14.0)]));
        let result = dataset.enrich(vec![
            observation("REC_0002", 22.0),
            Record::new("", RecordType::Event),
        ]);

        assert!(result.is_err());
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn summary_groups_by_type_and_pillar() {
        let mut event = Record::new("EVT_0001", RecordType::Event);
        event.pillar = Some("usage".to_string());
        let dataset = must_ok(Dataset::from_records(vec![
            observation("REC_0001", 14.0),
            observation("REC_0002", 22.0),
            event,
            Record::new("EVT_0002", RecordType::Event),
        ]));

        let summary = dataset.summary();
        assert_eq!(
            summary,
            vec![
                GroupCount {
                    record_type: RecordType::Observation,
                    pillar: "access".to_string(),
                    count: 2,
                },
                GroupCount {
                    record_type: RecordType::Event,
                    pillar: "usage".to_string(),
                    count: 1,
                },
            ]
        );
    }
}
