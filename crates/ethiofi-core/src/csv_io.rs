use std::collections::HashMap;
use std::io::{Read, Write};

use crate::record::{Record, COLUMNS};
use crate::FiError;

/// Header spellings accepted for canonical columns.
const HEADER_ALIASES: [(&str, &str); 5] = [
    ("id", "record_id"),
    ("id_code", "record_id"),
    ("event_id", "parent_id"),
    ("source_id", "parent_id"),
    ("parent_record", "parent_id"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct CsvImport {
    pub records: Vec<Record>,
    pub warnings: Vec<String>,
}

fn canonical_header(raw: &str) -> Option<&'static str> {
    let normalized = raw.trim().trim_start_matches('\u{feff}').to_ascii_lowercase();
    if let Some(column) = COLUMNS.iter().copied().find(|column| *column == normalized) {
        return Some(column);
    }
    HEADER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, column)| *column)
}

/// Reads records from CSV with a header row.
///
/// Headers are matched case-insensitively against the canonical columns and
/// their aliases; unknown columns are ignored and missing ones read as empty.
/// A canonical header wins over an alias mapping to the same column.
///
/// # Errors
/// Returns [`FiError::Parse`] for malformed CSV, a header without a
/// `record_id` column, or a row that cannot be decoded.
pub fn read_records<R: Read>(reader: R) -> Result<CsvImport, FiError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Fields)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|err| FiError::Parse(format!("failed to read CSV header: {err}")))?
        .clone();

    let mut positions: HashMap<&'static str, usize> = HashMap::new();
    for (index, raw) in headers.iter().enumerate() {
        let Some(column) = canonical_header(raw) else {
            continue;
        };
        let is_canonical = raw.trim().eq_ignore_ascii_case(column);
        if is_canonical || !positions.contains_key(column) {
            positions.insert(column, index);
        }
    }

    if !positions.contains_key("record_id") {
        return Err(FiError::Parse(
            "CSV header MUST contain a record_id column".to_string(),
        ));
    }

    let mut records = Vec::new();
    let mut warnings = Vec::new();
    for (row_index, row) in csv_reader.records().enumerate() {
        let row = row.map_err(|err| {
            FiError::Parse(format!("malformed CSV row {}: {err}", row_index + 2))
        })?;
        let (record, row_warnings) = Record::from_cells(|name| {
            positions
                .get(name)
                .and_then(|position| row.get(*position))
        })
        .map_err(|err| FiError::Parse(format!("CSV row {}: {err}", row_index + 2)))?;
        warnings.extend(row_warnings);
        records.push(record);
    }

    Ok(CsvImport { records, warnings })
}

/// Writes records in canonical column order with a header row.
///
/// # Errors
/// Returns [`FiError::Parse`] when the CSV writer fails.
pub fn write_records<W: Write>(writer: W, records: &[Record]) -> Result<(), FiError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(COLUMNS)
        .map_err(|err| FiError::Parse(format!("failed to write CSV header: {err}")))?;

    for record in records {
        csv_writer.write_record(record.to_row()).map_err(|err| {
            FiError::Parse(format!(
                "failed to write CSV row for {}: {err}",
                record.record_id
            ))
        })?;
    }

    csv_writer
        .flush()
        .map_err(|err| FiError::Parse(format!("failed to flush CSV writer: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordType;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    #[test]
    fn reads_subset_of_columns_with_aliases() {
        let body = "id,record_type,indicator_code,value_numeric,observation_date,extra\n\
                    REC_0001,observation,ACC_OWNERSHIP,46,2021-12-31,ignored\n\
                    REC_0002,Event,,,2021-05-11,\n";
        let import = must_ok(read_records(body.as_bytes()));

        assert_eq!(import.records.len(), 2);
        assert!(import.warnings.is_empty());
        assert_eq!(import.records[0].record_id, "REC_0001");
        assert_eq!(import.records[0].value_numeric, Some(46.0));
        assert_eq!(import.records[1].record_type, RecordType::Event);
        assert!(import.records[1].indicator_code.is_none());
    }

    #[test]
    fn canonical_header_wins_over_alias() {
        let body = "id,record_id,record_type\nALIAS,REAL,event\n";
        let import = must_ok(read_records(body.as_bytes()));
        assert_eq!(import.records[0].record_id, "REAL");
    }

    #[test]
    fn missing_record_id_header_is_rejected() {
        let body = "record_type,value_numeric\nobservation,1\n";
        assert!(read_records(body.as_bytes()).is_err());
    }

    #[test]
    fn bad_row_reports_line_number() {
        let body = "record_id,record_type\nREC_0001,observation\nREC_0002,forecast\n";
        let err = match read_records(body.as_bytes()) {
            Ok(_) => panic!("expected unknown record_type to fail"),
            Err(err) => err.to_string(),
        };
        assert!(err.contains("row 3"), "unexpected error: {err}");
    }

    #[test]
    fn written_csv_has_canonical_header_and_reads_back() {
        let mut record = Record::new("REC_0026", RecordType::Observation);
        record.indicator_code = Some("ACC_MM_ACCOUNT".to_string());
        record.value_numeric = Some(9.45);
        record.notes = Some("comma, quoted".to_string());

        let mut buffer = Vec::new();
        must_ok(write_records(&mut buffer, std::slice::from_ref(&record)));

        let text = must_ok(String::from_utf8(buffer.clone()));
        let header = match text.lines().next() {
            Some(value) => value,
            None => panic!("missing header line"),
        };
        assert_eq!(header.split(',').count(), COLUMNS.len());
        assert!(header.starts_with("record_id,parent_id,record_type"));

        let import = must_ok(read_records(buffer.as_slice()));
        assert_eq!(import.records, vec![record]);
    }
}
