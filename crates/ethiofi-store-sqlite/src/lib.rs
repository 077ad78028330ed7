#![allow(clippy::missing_errors_doc)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ethiofi_core::{format_rfc3339, now_utc, Dataset, ModelConfig, Record, RecordType};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info, warn};
use ulid::Ulid;

const RECORDS_MIGRATION_VERSION: i64 = 1;
const PROJECTOR_NAME: &str = "unified_v1";
const STALE_RECORD_SAMPLE: usize = 25;

const SCHEMA_RECORDS_V1: &str = r"
CREATE TABLE IF NOT EXISTS model_configs (
  config_version INTEGER PRIMARY KEY,
  config_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS record_revisions (
  revision_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  revision_id TEXT NOT NULL UNIQUE,
  record_id TEXT NOT NULL CHECK (length(record_id) > 0),
  record_type TEXT NOT NULL CHECK (
    record_type IN ('observation', 'event', 'impact_link', 'target')
  ),
  batch_id TEXT NOT NULL,
  writer TEXT NOT NULL,
  justification TEXT NOT NULL,
  recorded_at TEXT NOT NULL,
  record_json TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_record_revisions_no_update
BEFORE UPDATE ON record_revisions
BEGIN
  SELECT RAISE(FAIL, 'record_revisions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_record_revisions_no_delete
BEFORE DELETE ON record_revisions
BEGIN
  SELECT RAISE(FAIL, 'record_revisions is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_record_revisions_record_seq
  ON record_revisions(record_id, revision_seq);
CREATE INDEX IF NOT EXISTS idx_record_revisions_batch
  ON record_revisions(batch_id, revision_seq);

CREATE TABLE IF NOT EXISTS unified_records (
  record_id TEXT PRIMARY KEY,
  record_type TEXT NOT NULL,
  indicator_code TEXT,
  last_revision_seq INTEGER NOT NULL,
  record_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_unified_records_type_seq
  ON unified_records(record_type, last_revision_seq);

CREATE TABLE IF NOT EXISTS projection_state (
  projector_name TEXT PRIMARY KEY,
  last_revision_seq INTEGER NOT NULL,
  updated_at TEXT NOT NULL
);
";

const REVISION_COLUMNS: [&str; 9] = [
    "revision_seq",
    "revision_id",
    "record_id",
    "record_type",
    "batch_id",
    "writer",
    "justification",
    "recorded_at",
    "record_json",
];

const UNIFIED_COLUMNS: [&str; 5] = [
    "record_id",
    "record_type",
    "last_revision_seq",
    "record_json",
    "updated_at",
];

pub struct SqliteRecordStore {
    conn: Connection,
}

/// Provenance attached to every revision of one ingest batch.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RevisionBatch {
    pub batch_id: Option<String>,
    pub writer: String,
    pub justification: String,
}

impl RevisionBatch {
    #[must_use]
    pub fn new(writer: impl Into<String>, justification: impl Into<String>) -> Self {
        Self {
            batch_id: None,
            writer: writer.into(),
            justification: justification.into(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct RecordRevision {
    pub revision_seq: i64,
    pub revision_id: Ulid,
    pub record_id: String,
    pub batch_id: String,
    pub writer: String,
    pub justification: String,
    pub recorded_at: String,
    pub record: Record,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct AppendReport {
    pub batch_id: String,
    pub appended: usize,
    pub first_revision_seq: Option<i64>,
    pub last_revision_seq: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ReplayReport {
    pub projected_records: usize,
    pub processed_revisions: usize,
    pub last_revision_seq: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ProjectorStatus {
    pub contract_version: String,
    pub projector_name: String,
    pub projected_revision_seq: i64,
    pub latest_revision_seq: i64,
    pub lag_revisions: i64,
    pub tracked_records: usize,
    pub unified_rows: usize,
    pub stale_rows: usize,
    pub records_without_row: usize,
    pub rows_without_revisions: usize,
    pub max_stale_seq_gap: i64,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectorIssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ProjectorIssue {
    pub code: String,
    pub severity: ProjectorIssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ProjectorCheck {
    pub contract_version: String,
    pub healthy: bool,
    pub status: ProjectorStatus,
    pub issues: Vec<ProjectorIssue>,
    pub stale_record_sample: Vec<ProjectorStaleRecord>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ProjectorStaleRecord {
    pub record_id: String,
    pub max_revision_seq: i64,
    pub projected_revision_seq: Option<i64>,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        // Tables created by an incompatible build survive CREATE IF NOT EXISTS.
        for (table_name, columns) in [
            ("record_revisions", &REVISION_COLUMNS[..]),
            ("unified_records", &UNIFIED_COLUMNS[..]),
        ] {
            if table_exists(&self.conn, table_name)? {
                ensure_table_has_columns(&self.conn, table_name, columns)?;
            }
        }

        self.conn
            .execute_batch(SCHEMA_RECORDS_V1)
            .context("failed to apply record schema")?;

        let now = timestamp()?;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![RECORDS_MIGRATION_VERSION, now],
            )
            .context("failed to register record schema migration")?;
        if inserted > 0 {
            info!(version = RECORDS_MIGRATION_VERSION, "applied record schema migration");
        }

        if self.get_config_opt(1)?.is_none() {
            self.upsert_config(&ModelConfig::v1())?;
        }

        self.conn
            .execute(
                "INSERT OR IGNORE INTO projection_state(projector_name, last_revision_seq, updated_at)
                 VALUES (?1, 0, ?2)",
                params![PROJECTOR_NAME, now],
            )
            .context("failed to initialize projection state")?;

        Ok(())
    }

    pub fn upsert_config(&self, config: &ModelConfig) -> Result<()> {
        config
            .validate()
            .map_err(|err| anyhow!("invalid model configuration: {err}"))?;

        let payload = serde_json::to_string(config).context("failed to serialize model config")?;
        let now = timestamp()?;

        self.conn
            .execute(
                "INSERT INTO model_configs(config_version, config_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(config_version) DO UPDATE SET
                   config_json = excluded.config_json,
                   created_at = excluded.created_at",
                params![i64::from(config.config_version), payload, now],
            )
            .context("failed to upsert model config")?;

        debug!(config_version = config.config_version, "stored model config");
        Ok(())
    }

    pub fn get_configs(&self) -> Result<BTreeMap<u32, ModelConfig>> {
        let mut stmt = self.conn.prepare(
            "SELECT config_version, config_json FROM model_configs ORDER BY config_version ASC",
        )?;

        let mut rows = stmt.query([])?;
        let mut map = BTreeMap::new();

        while let Some(row) = rows.next()? {
            let version_i64: i64 = row.get(0)?;
            let version = u32::try_from(version_i64)
                .with_context(|| format!("invalid config_version: {version_i64}"))?;
            let json: String = row.get(1)?;
            map.insert(version, parse_config_json(version, &json)?);
        }

        Ok(map)
    }

    pub fn get_config(&self, config_version: u32) -> Result<ModelConfig> {
        self.get_config_opt(config_version)?
            .ok_or_else(|| anyhow!("missing config_version {config_version} in model_configs"))
    }

    /// Appends one revision per record in a single transaction.
    ///
    /// Every record is validated before anything is written; a failure leaves
    /// the log untouched. The projection is not refreshed; call [`Self::replay`].
    pub fn append_records(
        &mut self,
        batch: &RevisionBatch,
        records: &[Record],
    ) -> Result<AppendReport> {
        if batch.writer.trim().is_empty() {
            return Err(anyhow!("writer must not be empty"));
        }
        if batch.justification.trim().is_empty() {
            return Err(anyhow!("justification must not be empty"));
        }
        for record in records {
            record
                .validate()
                .map_err(|err| anyhow!("record validation failed: {err}"))?;
        }

        let batch_id = match &batch.batch_id {
            Some(value) if !value.trim().is_empty() => value.clone(),
            Some(_) => return Err(anyhow!("batch_id must not be empty when provided")),
            None => Ulid::new().to_string(),
        };
        let recorded_at = timestamp()?;

        let tx = self
            .conn
            .transaction()
            .context("failed to begin append transaction")?;
        let mut first_revision_seq = None;
        let mut last_revision_seq = None;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO record_revisions(
                    revision_id, record_id, record_type, batch_id, writer,
                    justification, recorded_at, record_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                let payload = serde_json::to_string(record)
                    .with_context(|| format!("failed to serialize record {}", record.record_id))?;
                stmt.execute(params![
                    Ulid::new().to_string(),
                    record.record_id,
                    record.record_type.as_str(),
                    batch_id,
                    batch.writer,
                    batch.justification,
                    recorded_at,
                    payload,
                ])
                .with_context(|| format!("failed to append revision for {}", record.record_id))?;

                let seq = tx.last_insert_rowid();
                first_revision_seq.get_or_insert(seq);
                last_revision_seq = Some(seq);
            }
        }
        tx.commit().context("failed to commit append transaction")?;

        info!(
            batch_id = %batch_id,
            writer = %batch.writer,
            appended = records.len(),
            "appended record revisions"
        );

        Ok(AppendReport {
            batch_id,
            appended: records.len(),
            first_revision_seq,
            last_revision_seq,
        })
    }

    pub fn list_revisions_for_record(
        &self,
        record_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<RecordRevision>> {
        let mut query = "SELECT
                revision_seq, revision_id, record_id, batch_id, writer,
                justification, recorded_at, record_json
             FROM record_revisions
             WHERE record_id = ?1
             ORDER BY revision_seq ASC"
            .to_string();

        if let Some(raw_limit) = limit {
            query.push_str(" LIMIT ");
            query.push_str(&raw_limit.to_string());
        }

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params![record_id], parse_revision_row)?;
        collect_rows(rows)
    }

    /// Re-projects every record touched at or after `from_revision_seq`, or all
    /// records when no bound is given.
    ///
    /// An incremental replay never starts past the first revision the
    /// projector has not seen yet, and always re-projects stale rows, so the
    /// projection cannot be left behind by an earlier batch.
    pub fn replay(&mut self, from_revision_seq: Option<i64>) -> Result<ReplayReport> {
        let record_ids: BTreeSet<String> = match from_revision_seq {
            Some(from) => {
                let pending = self
                    .projection_state(PROJECTOR_NAME)?
                    .map_or(1, |(seq, _)| seq + 1);
                let mut ids: BTreeSet<String> = self
                    .records_with_revisions_from(from.min(pending))?
                    .into_iter()
                    .collect();
                ids.extend(
                    self.projector_stale_records(None)?
                        .into_iter()
                        .map(|item| item.record_id),
                );
                ids
            }
            None => self.records_with_any_revisions()?.into_iter().collect(),
        };

        let now = timestamp()?;
        let tx = self
            .conn
            .transaction()
            .context("failed to begin replay transaction")?;

        let mut projected_records = 0_usize;
        let mut processed_revisions = 0_usize;
        {
            let mut count_stmt =
                tx.prepare("SELECT COUNT(*) FROM record_revisions WHERE record_id = ?1")?;
            let mut latest_stmt = tx.prepare(
                "SELECT revision_seq, record_type, record_json
                 FROM record_revisions
                 WHERE record_id = ?1
                 ORDER BY revision_seq DESC
                 LIMIT 1",
            )?;
            let mut upsert_stmt = tx.prepare(
                "INSERT INTO unified_records(
                    record_id, record_type, indicator_code, last_revision_seq, record_json, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(record_id) DO UPDATE SET
                    record_type = excluded.record_type,
                    indicator_code = excluded.indicator_code,
                    last_revision_seq = excluded.last_revision_seq,
                    record_json = excluded.record_json,
                    updated_at = excluded.updated_at",
            )?;

            for record_id in &record_ids {
                let count: i64 = count_stmt.query_row(params![record_id], |row| row.get(0))?;
                processed_revisions += usize::try_from(count)
                    .with_context(|| format!("invalid revision count: {count}"))?;

                let latest = latest_stmt
                    .query_row(params![record_id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })
                    .optional()?;
                let Some((revision_seq, record_type, record_json)) = latest else {
                    continue;
                };

                let record = parse_record_json(&record_json)
                    .with_context(|| format!("failed projecting {record_id}"))?;
                upsert_stmt
                    .execute(params![
                        record_id,
                        record_type,
                        record.indicator_code,
                        revision_seq,
                        record_json,
                        now,
                    ])
                    .with_context(|| format!("failed to project {record_id}"))?;
                projected_records += 1;
            }
        }

        let last_revision_seq = tx
            .query_row("SELECT MAX(revision_seq) FROM record_revisions", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .context("failed to query latest revision_seq")?
            .unwrap_or(0);
        tx.execute(
            "INSERT INTO projection_state(projector_name, last_revision_seq, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(projector_name) DO UPDATE SET
               last_revision_seq = excluded.last_revision_seq,
               updated_at = excluded.updated_at",
            params![PROJECTOR_NAME, last_revision_seq, now],
        )
        .context("failed to update projection state")?;
        tx.commit().context("failed to commit replay transaction")?;

        info!(
            projected_records,
            processed_revisions, last_revision_seq, "replayed unified projection"
        );

        Ok(ReplayReport {
            projected_records,
            processed_revisions,
            last_revision_seq,
        })
    }

    pub fn projector_status(&self) -> Result<ProjectorStatus> {
        let (projected_revision_seq, updated_at) = match self.projection_state(PROJECTOR_NAME)? {
            Some((seq, updated_at)) => (seq, Some(updated_at)),
            None => (0_i64, None),
        };

        let latest_revision_seq = self.latest_revision_seq()?.unwrap_or(0);
        let lag_revisions = (latest_revision_seq - projected_revision_seq).max(0);
        let tracked_records = self.count(
            "SELECT COUNT(DISTINCT record_id) FROM record_revisions",
            "distinct revision record ids",
        )?;
        let unified_rows = self.count("SELECT COUNT(*) FROM unified_records", "unified rows")?;
        let stale = self.projector_stale_records(None)?;
        let records_without_row = stale
            .iter()
            .filter(|item| item.projected_revision_seq.is_none())
            .count();
        let max_stale_seq_gap = stale
            .iter()
            .map(|item| item.max_revision_seq - item.projected_revision_seq.unwrap_or(0))
            .max()
            .unwrap_or(0);
        let rows_without_revisions = self.count(
            "SELECT COUNT(*)
             FROM unified_records unified
             LEFT JOIN (SELECT DISTINCT record_id FROM record_revisions) revisions
               ON revisions.record_id = unified.record_id
             WHERE revisions.record_id IS NULL",
            "unified rows without revisions",
        )?;

        Ok(ProjectorStatus {
            contract_version: "projector_status.v1".to_string(),
            projector_name: PROJECTOR_NAME.to_string(),
            projected_revision_seq,
            latest_revision_seq,
            lag_revisions,
            tracked_records,
            unified_rows,
            stale_rows: stale.len(),
            records_without_row,
            rows_without_revisions,
            max_stale_seq_gap,
            updated_at,
        })
    }

    pub fn projector_check(&self) -> Result<ProjectorCheck> {
        let status = self.projector_status()?;
        let mut issues = Vec::new();

        if status.lag_revisions > 0 {
            issues.push(ProjectorIssue {
                code: "projection_lag".to_string(),
                severity: ProjectorIssueSeverity::Error,
                message: format!(
                    "projection lag detected: {} revisions behind",
                    status.lag_revisions
                ),
            });
        }

        if status.stale_rows > 0 {
            issues.push(ProjectorIssue {
                code: "stale_unified_rows".to_string(),
                severity: ProjectorIssueSeverity::Error,
                message: format!(
                    "stale unified rows detected: {} records out of date",
                    status.stale_rows
                ),
            });
        }

        if status.tracked_records != status.unified_rows {
            issues.push(ProjectorIssue {
                code: "record_row_mismatch".to_string(),
                severity: ProjectorIssueSeverity::Error,
                message: format!(
                    "record/row mismatch: tracked_records={} unified_rows={}",
                    status.tracked_records, status.unified_rows
                ),
            });
        }

        if status.rows_without_revisions > 0 {
            issues.push(ProjectorIssue {
                code: "orphan_unified_rows".to_string(),
                severity: ProjectorIssueSeverity::Warning,
                message: format!(
                    "unified rows without revisions detected: {} rows",
                    status.rows_without_revisions
                ),
            });
        }

        let stale_record_sample = self.projector_stale_records(Some(STALE_RECORD_SAMPLE))?;
        let healthy = !issues
            .iter()
            .any(|item| item.severity == ProjectorIssueSeverity::Error);

        Ok(ProjectorCheck {
            contract_version: "projector_check.v1".to_string(),
            healthy,
            status,
            issues,
            stale_record_sample,
        })
    }

    pub fn projector_stale_records(&self, limit: Option<usize>) -> Result<Vec<ProjectorStaleRecord>> {
        let mut query = "SELECT
                revisions.record_id,
                revisions.max_revision_seq,
                unified.last_revision_seq
             FROM (
                SELECT record_id, MAX(revision_seq) AS max_revision_seq
                FROM record_revisions
                GROUP BY record_id
             ) revisions
             LEFT JOIN unified_records unified
               ON unified.record_id = revisions.record_id
             WHERE unified.last_revision_seq IS NULL
                OR unified.last_revision_seq < revisions.max_revision_seq
             ORDER BY revisions.record_id ASC"
            .to_string();

        if let Some(raw_limit) = limit {
            query.push_str(" LIMIT ");
            query.push_str(&raw_limit.to_string());
        }

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], |row| {
            Ok(ProjectorStaleRecord {
                record_id: row.get(0)?,
                max_revision_seq: row.get(1)?,
                projected_revision_seq: row.get(2)?,
            })
        })?;

        collect_rows(rows)
    }

    /// Loads the projected dataset in keep-last order: each record sits at the
    /// position of its latest revision.
    pub fn load_dataset(&self) -> Result<Dataset> {
        let status = self.projector_status()?;
        if status.lag_revisions > 0 || status.stale_rows > 0 {
            warn!(
                lag_revisions = status.lag_revisions,
                stale_rows = status.stale_rows,
                "unified projection is behind the revision log; run replay"
            );
        }

        let mut stmt = self
            .conn
            .prepare("SELECT record_json FROM unified_records ORDER BY last_revision_seq ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for json in collect_rows(rows)? {
            records.push(parse_record_json(&json)?);
        }

        Dataset::from_records(records).map_err(|err| anyhow!("projected dataset is invalid: {err}"))
    }

    pub fn get_record(&self, record_id: &str) -> Result<Option<Record>> {
        let json = self
            .conn
            .query_row(
                "SELECT record_json FROM unified_records WHERE record_id = ?1",
                params![record_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to load unified record {record_id}"))?;

        json.map(|value| parse_record_json(&value)).transpose()
    }

    pub fn list_records(
        &self,
        record_type: Option<RecordType>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let mut query = "SELECT record_json
             FROM unified_records
             WHERE ?1 IS NULL OR record_type = ?1
             ORDER BY last_revision_seq ASC"
            .to_string();

        if let Some(raw_limit) = limit {
            query.push_str(" LIMIT ");
            query.push_str(&raw_limit.to_string());
        }

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params![record_type.map(RecordType::as_str)], |row| {
            row.get::<_, String>(0)
        })?;

        let mut records = Vec::new();
        for json in collect_rows(rows)? {
            records.push(parse_record_json(&json)?);
        }
        Ok(records)
    }

    fn get_config_opt(&self, config_version: u32) -> Result<Option<ModelConfig>> {
        let json = self
            .conn
            .query_row(
                "SELECT config_json FROM model_configs WHERE config_version = ?1",
                params![i64::from(config_version)],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("failed to query model_configs")?;

        json.map(|value| parse_config_json(config_version, &value))
            .transpose()
    }

    fn records_with_revisions_from(&self, from_revision_seq: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT record_id
             FROM record_revisions
             WHERE revision_seq >= ?1
             ORDER BY record_id ASC",
        )?;
        let rows = stmt.query_map(params![from_revision_seq], |row| row.get::<_, String>(0))?;
        collect_rows(rows)
    }

    fn records_with_any_revisions(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT record_id
             FROM record_revisions
             ORDER BY record_id ASC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        collect_rows(rows)
    }

    fn latest_revision_seq(&self) -> Result<Option<i64>> {
        let value = self
            .conn
            .query_row("SELECT MAX(revision_seq) FROM record_revisions", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .context("failed to query latest revision_seq")?;
        Ok(value)
    }

    fn projection_state(&self, projector_name: &str) -> Result<Option<(i64, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT last_revision_seq, updated_at
                 FROM projection_state
                 WHERE projector_name = ?1",
                params![projector_name],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("failed to query projection_state")?;
        Ok(row)
    }

    fn count(&self, sql: &str, what: &str) -> Result<usize> {
        let count = self
            .conn
            .query_row(sql, [], |row| row.get::<_, i64>(0))
            .with_context(|| format!("failed to count {what}"))?;
        usize::try_from(count).with_context(|| format!("invalid {what} count: {count}"))
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn parse_revision_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRevision> {
    let revision_id_raw: String = row.get(1)?;
    let revision_id = Ulid::from_string(&revision_id_raw).map_err(|err| {
        invalid_column(1, rusqlite::types::Type::Text, format!("invalid ULID: {err}"))
    })?;
    let record_json: String = row.get(7)?;
    let record = serde_json::from_str::<Record>(&record_json).map_err(|err| {
        invalid_column(7, rusqlite::types::Type::Text, format!("invalid record JSON: {err}"))
    })?;

    Ok(RecordRevision {
        revision_seq: row.get(0)?,
        revision_id,
        record_id: row.get(2)?,
        batch_id: row.get(3)?,
        writer: row.get(4)?,
        justification: row.get(5)?,
        recorded_at: row.get(6)?,
        record,
    })
}

fn parse_record_json(json: &str) -> Result<Record> {
    serde_json::from_str(json).context("invalid stored record JSON")
}

fn parse_config_json(version: u32, json: &str) -> Result<ModelConfig> {
    let value: Value = serde_json::from_str(json).context("invalid stored model config JSON")?;
    ModelConfig::from_json(&value)
        .map_err(|err| anyhow!("failed to parse model config {version}: {err}"))
}

fn invalid_column(index: usize, kind: rusqlite::types::Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn timestamp() -> Result<String> {
    format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1
             LIMIT 1",
            params![table_name],
            |_| Ok(()),
        )
        .optional()
        .context("failed to query sqlite_master")?
        .is_some();

    Ok(exists)
}

fn ensure_table_has_columns(conn: &Connection, table_name: &str, columns: &[&str]) -> Result<()> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table_name})"))
        .with_context(|| format!("failed to inspect table_info for {table_name}"))?;
    let mut rows = stmt.query([])?;

    let mut available = Vec::new();
    while let Some(row) = rows.next()? {
        available.push(row.get::<_, String>(1)?);
    }

    for required in columns {
        if !available.iter().any(|candidate| candidate == required) {
            return Err(anyhow!(
                "schema check failed: missing column {table_name}.{required}"
            ));
        }
    }

    Ok(())
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
