//! Enrichment-log parsing and document-level checks.
//!
//! The log is a markdown report with one table of added records
//! (`record_id | source_url | original_text | confidence | collected_by |
//! notes`) surrounded by narrative sections. Checks cover the table rows
//! themselves and whether the percentages and counts quoted in the narrative
//! trace back to a row.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::record::Confidence;
use crate::FiError;

const LOG_COLUMNS: [&str; 6] = [
    "record_id",
    "source_url",
    "original_text",
    "confidence",
    "collected_by",
    "notes",
];

const LABEL_STOPWORDS: [&str; 34] = [
    "of", "in", "to", "and", "the", "from", "by", "for", "at", "on", "with", "between", "since",
    "which", "or", "a", "an", "among", "are", "is", "was", "were", "be", "been", "near", "about",
    "only", "well", "below", "above", "than", "that", "their", "its",
];

/// Words that follow a figure for at most this many tokens are read as its labels.
const LABEL_WINDOW: usize = 6;

const MAGNITUDES: [(&str, f64); 4] = [
    ("thousand", 1e3),
    ("million", 1e6),
    ("millions", 1e6),
    ("billion", 1e9),
];

const COUNT_UNITS: [&str; 13] = [
    "accounts",
    "adults",
    "agents",
    "atms",
    "branches",
    "customers",
    "merchants",
    "people",
    "subscribers",
    "transactions",
    "users",
    "wallets",
    "registrations",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichmentEntry {
    pub record_id: String,
    pub source_url: String,
    pub original_text: String,
    pub confidence: String,
    pub collected_by: String,
    pub notes: String,
    /// 1-based line of the row in the markdown source.
    pub line: usize,
}

impl EnrichmentEntry {
    #[must_use]
    pub fn confidence_level(&self) -> Option<Confidence> {
        Confidence::parse(&self.confidence)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogIssue {
    pub code: String,
    pub severity: IssueSeverity,
    pub message: String,
    pub record_id: Option<String>,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogCheck {
    pub contract_version: String,
    pub healthy: bool,
    pub entries: Vec<EnrichmentEntry>,
    pub figures_checked: usize,
    pub issues: Vec<LogIssue>,
}

impl LogCheck {
    pub fn push_issue(&mut self, issue: LogIssue) {
        if issue.severity == IssueSeverity::Error {
            self.healthy = false;
        }
        self.issues.push(issue);
    }
}

struct TableSpan {
    first_line: usize,
    end_line: usize,
    entries: Vec<EnrichmentEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FigureKind {
    Percent,
    Count,
}

#[derive(Debug, Clone, PartialEq)]
struct Figure {
    kind: FigureKind,
    value: f64,
    raw: String,
    labels: Vec<String>,
}

impl Figure {
    fn matches(&self, other: &Figure) -> bool {
        self.kind == other.kind && same_value(self.value, other.value)
    }

    fn shared_label(&self, other: &Figure) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| other.labels.contains(label))
            .map(String::as_str)
    }
}

/// Parses the record table of an enrichment log.
///
/// # Errors
/// Returns [`FiError::Parse`] when no table with a `record_id` header exists
/// or the header is not followed by a separator row.
pub fn parse_enrichment_log(markdown: &str) -> Result<Vec<EnrichmentEntry>, FiError> {
    locate_table(markdown).map(|span| span.entries)
}

/// Parses the log and runs the row and narrative checks.
#[must_use]
pub fn check_enrichment_log(markdown: &str) -> LogCheck {
    let mut check = LogCheck {
        contract_version: "log_check.v1".to_string(),
        healthy: true,
        entries: Vec::new(),
        figures_checked: 0,
        issues: Vec::new(),
    };

    let span = match locate_table(markdown) {
        Ok(span) => span,
        Err(err) => {
            check.push_issue(LogIssue {
                code: "missing_table".to_string(),
                severity: IssueSeverity::Error,
                message: err.to_string(),
                record_id: None,
                line: None,
            });
            return check;
        }
    };

    check_rows(&span.entries, &mut check);
    check_narrative(markdown, &span, &mut check);
    check.entries = span.entries;
    check
}

fn check_rows(entries: &[EnrichmentEntry], check: &mut LogCheck) {
    let mut seen = BTreeSet::new();
    for entry in entries {
        let record_id = Some(entry.record_id.clone()).filter(|value| !value.is_empty());
        let mut error = |code: &str, message: String| {
            check.push_issue(LogIssue {
                code: code.to_string(),
                severity: IssueSeverity::Error,
                message,
                record_id: record_id.clone(),
                line: Some(entry.line),
            });
        };

        if entry.record_id.is_empty() {
            error(
                "empty_record_id",
                format!("row on line {} has an empty record_id", entry.line),
            );
        } else if !seen.insert(entry.record_id.clone()) {
            error(
                "duplicate_record_id",
                format!("record_id {} appears more than once", entry.record_id),
            );
        }

        if entry.source_url.is_empty() {
            error(
                "missing_source_url",
                format!("record {} does not cite a source_url", entry.record_id),
            );
        }

        if entry.confidence_level().is_none() {
            error(
                "invalid_confidence",
                format!(
                    "record {} has confidence {:?}; expected High, Medium or Low",
                    entry.record_id, entry.confidence
                ),
            );
        }
    }
}

fn check_narrative(markdown: &str, span: &TableSpan, check: &mut LogCheck) {
    let cited: Vec<(usize, Figure)> = markdown
        .lines()
        .enumerate()
        .filter(|(index, _)| *index < span.first_line || *index >= span.end_line)
        .flat_map(|(index, line)| {
            extract_figures(line)
                .into_iter()
                .map(move |figure| (index + 1, figure))
        })
        .collect();

    let recorded: Vec<(&EnrichmentEntry, Figure)> = span
        .entries
        .iter()
        .flat_map(|entry| {
            let mut figures = extract_figures(&entry.original_text);
            figures.extend(extract_figures(&entry.notes));
            figures.into_iter().map(move |figure| (entry, figure))
        })
        .collect();

    check.figures_checked = cited.len();

    for (line, figure) in &cited {
        let traced = recorded
            .iter()
            .any(|(_, candidate)| candidate.matches(figure));
        if !traced {
            check.push_issue(LogIssue {
                code: "untraced_figure".to_string(),
                severity: IssueSeverity::Warning,
                message: format!(
                    "figure {} on line {line} does not appear in any added record",
                    figure.raw
                ),
                record_id: None,
                line: Some(*line),
            });
        }

        for (entry, candidate) in &recorded {
            if candidate.kind != figure.kind || candidate.matches(figure) {
                continue;
            }
            let Some(label) = figure.shared_label(candidate) else {
                continue;
            };
            check.push_issue(LogIssue {
                code: "inconsistent_figure".to_string(),
                severity: IssueSeverity::Warning,
                message: format!(
                    "line {line} cites {} {label} but record {} states {} {label}",
                    figure.raw, entry.record_id, candidate.raw
                ),
                record_id: Some(entry.record_id.clone()),
                line: Some(*line),
            });
        }
    }
}

fn same_value(lhs: f64, rhs: f64) -> bool {
    (lhs - rhs).abs() < 1e-9
}

fn locate_table(markdown: &str) -> Result<TableSpan, FiError> {
    let lines: Vec<&str> = markdown.lines().collect();

    for (index, line) in lines.iter().enumerate() {
        if !is_table_line(line) {
            continue;
        }

        let header: Vec<String> = split_cells(line)
            .iter()
            .map(|cell| normalize_header(cell))
            .collect();
        if !header.iter().any(|cell| cell == "record_id") {
            continue;
        }

        let separator = lines.get(index + 1).copied().unwrap_or_default();
        if !is_separator_line(separator) {
            return Err(FiError::Parse(format!(
                "record table header on line {} is not followed by a separator row",
                index + 1
            )));
        }

        let positions: Vec<Option<usize>> = LOG_COLUMNS
            .iter()
            .map(|column| header.iter().position(|cell| cell == column))
            .collect();

        let mut entries = Vec::new();
        let mut end_line = index + 2;
        while let Some(row) = lines.get(end_line) {
            if !is_table_line(row) {
                break;
            }
            let cells = split_cells(row);
            let cell = |column: usize| -> String {
                positions[column]
                    .and_then(|position| cells.get(position))
                    .map(|value| value.trim().to_string())
                    .unwrap_or_default()
            };
            entries.push(EnrichmentEntry {
                record_id: strip_inline_code(&cell(0)),
                source_url: cell(1),
                original_text: cell(2),
                confidence: strip_emphasis(&cell(3)),
                collected_by: cell(4),
                notes: cell(5),
                line: end_line + 1,
            });
            end_line += 1;
        }

        return Ok(TableSpan {
            first_line: index,
            end_line,
            entries,
        });
    }

    Err(FiError::Parse(
        "no markdown table with a record_id column was found".to_string(),
    ))
}

fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

fn is_separator_line(line: &str) -> bool {
    is_table_line(line)
        && split_cells(line).iter().all(|cell| {
            let trimmed = cell.trim();
            !trimmed.is_empty() && trimmed.chars().all(|ch| matches!(ch, '-' | ':'))
        })
}

/// Splits a markdown table row on unescaped pipes; `\|` stays a literal pipe.
fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                let _ = chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        cells.push(current);
    }
    cells
}

fn normalize_header(cell: &str) -> String {
    strip_emphasis(&strip_inline_code(cell.trim()))
        .to_ascii_lowercase()
        .replace(' ', "_")
}

fn strip_inline_code(value: &str) -> String {
    value.trim().trim_matches('`').trim().to_string()
}

fn strip_emphasis(value: &str) -> String {
    value.trim().trim_matches(['*', '_']).trim().to_string()
}

fn clean_token(token: &str) -> &str {
    token
        .trim_end_matches([',', '.', ')', ';', ':', '!', '?', '"', '\'', ']'])
        .trim_start_matches(['(', '"', '\'', '~', '['])
}

fn parse_number(token: &str) -> Option<f64> {
    let value: f64 = token.replace(',', "").parse().ok()?;
    value.is_finite().then_some(value)
}

fn is_figure_token(token: &str) -> bool {
    parse_number(token.trim_end_matches('%')).is_some()
}

/// Label words after a figure: non-stopwords up to the end of the clause, the
/// next number, or [`LABEL_WINDOW`] tokens.
fn figure_labels(tokens: &[&str], start: usize) -> Vec<String> {
    let mut labels = Vec::new();
    for raw in tokens.iter().skip(start).take(LABEL_WINDOW) {
        let cleaned = clean_token(raw).to_ascii_lowercase();
        if is_figure_token(&cleaned) {
            break;
        }
        let is_word =
            !cleaned.is_empty() && cleaned.chars().all(|ch| ch.is_alphabetic() || ch == '-');
        if is_word && !LABEL_STOPWORDS.contains(&cleaned.as_str()) && !labels.contains(&cleaned) {
            labels.push(cleaned);
        }
        if raw.ends_with([',', '.', ';', ':', '!', '?', ')']) {
            break;
        }
    }
    labels
}

fn magnitude(word: &str) -> Option<f64> {
    MAGNITUDES
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, factor)| *factor)
}

/// Percent figures (`15%`, `15 percent`, `15 per cent`) and counts (`54 million`,
/// `1,200 agents`), each with the label words that follow.
fn extract_figures(text: &str) -> Vec<Figure> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut figures = Vec::new();

    for (index, raw_token) in tokens.iter().enumerate() {
        let token = clean_token(raw_token);

        if let Some(number) = token.strip_suffix('%') {
            if let Some(value) = parse_number(number) {
                figures.push(Figure {
                    kind: FigureKind::Percent,
                    value,
                    raw: token.to_string(),
                    labels: figure_labels(&tokens, index + 1),
                });
            }
            continue;
        }

        let Some(value) = parse_number(token) else {
            continue;
        };
        let word_at = |offset: usize| {
            tokens
                .get(index + offset)
                .map(|item| clean_token(item).to_ascii_lowercase())
        };
        let next = word_at(1);

        let percent_offset = match next.as_deref() {
            Some("percent" | "%") => Some(2),
            Some("per") if word_at(2).as_deref() == Some("cent") => Some(3),
            _ => None,
        };
        if let Some(offset) = percent_offset {
            figures.push(Figure {
                kind: FigureKind::Percent,
                value,
                raw: format!("{token} percent"),
                labels: figure_labels(&tokens, index + offset),
            });
            continue;
        }

        let scaled = next
            .as_deref()
            .and_then(|word| magnitude(word).map(|factor| (word, factor)));
        if let Some((word, factor)) = scaled {
            figures.push(Figure {
                kind: FigureKind::Count,
                value: value * factor,
                raw: format!("{token} {word}"),
                labels: figure_labels(&tokens, index + 2),
            });
        } else if next
            .as_deref()
            .is_some_and(|word| COUNT_UNITS.contains(&word))
        {
            figures.push(Figure {
                kind: FigureKind::Count,
                value,
                raw: token.to_string(),
                labels: figure_labels(&tokens, index + 1),
            });
        }
    }

    figures
}
