//! Concepts with no index row on the latest trade date.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::info;

use super::tables::validate_table_name;
use crate::config::ConceptTables;
use crate::error::SyncError;

// Keeps the IN (...) lists well under MySQL's placeholder limit.
const DELETE_CHUNK: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingConcept {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConceptCheck {
    /// `MAX(trade_date)` of the daily table, as MySQL renders it.
    pub latest_trade_date: String,
    /// Concepts in the list table.
    pub total: usize,
    /// Concepts with no daily row on the latest trade date, sorted by code.
    pub missing: Vec<MissingConcept>,
    pub deleted_daily_rows: u64,
    pub deleted_list_rows: u64,
    /// File the missing concepts were written to, if any.
    pub output: Option<PathBuf>,
}

/// Concepts from the list with no row in `present`, sorted by code.
pub fn missing_concepts(
    concepts: &[(String, String)],
    present: &HashSet<String>,
) -> Vec<MissingConcept> {
    let by_code: BTreeMap<&str, &str> = concepts
        .iter()
        .map(|(code, name)| (code.as_str(), name.as_str()))
        .collect();
    by_code
        .into_iter()
        .filter(|(code, _)| !present.contains(*code))
        .map(|(code, name)| MissingConcept {
            code: code.to_string(),
            name: name.to_string(),
        })
        .collect()
}

/// One `name<TAB>code` line per missing concept. Concepts sharing a name
/// keep a line each; blank names fall back to the code.
pub fn render_missing(missing: &[MissingConcept]) -> String {
    missing
        .iter()
        .map(|m| {
            let name = if m.name.trim().is_empty() { &m.code } else { &m.name };
            format!("{name}\t{}\n", m.code)
        })
        .collect()
}

/// What a check does with its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConceptAction {
    /// Record the missing set, possibly empty, for the next concept sync.
    RecordFailed(PathBuf),
    /// Delete requested but every concept is complete.
    Nothing,
    /// Record the codes being removed, then delete them from both tables.
    Delete { record: PathBuf, codes: Vec<String> },
}

pub fn plan_action(
    tables: &ConceptTables,
    workdir: &Path,
    missing: &[MissingConcept],
    delete: bool,
) -> ConceptAction {
    if !delete {
        ConceptAction::RecordFailed(workdir.join(&tables.failed_file))
    } else if missing.is_empty() {
        ConceptAction::Nothing
    } else {
        ConceptAction::Delete {
            record: workdir.join(&tables.deleted_file),
            codes: missing.iter().map(|m| m.code.clone()).collect(),
        }
    }
}

// MAX(trade_date) is NULL on an empty table.
fn latest_trade_date(max: Option<String>, table: &str) -> Result<String, SyncError> {
    max.filter(|d| !d.trim().is_empty())
        .ok_or_else(|| SyncError::EmptyTable(table.to_string()))
}

fn require_concepts(concepts: &[(String, String)], table: &str) -> Result<(), SyncError> {
    if concepts.is_empty() {
        Err(SyncError::EmptyTable(table.to_string()))
    } else {
        Ok(())
    }
}

fn write_record(path: &Path, missing: &[MissingConcept]) -> Result<(), SyncError> {
    std::fs::write(path, render_missing(missing))?;
    Ok(())
}

async fn delete_codes(
    tx: &mut sqlx::Transaction<'_, MySql>,
    table: &str,
    codes: &[String],
) -> Result<u64, SyncError> {
    let mut deleted = 0;
    for chunk in codes.chunks(DELETE_CHUNK) {
        let mut builder: QueryBuilder<MySql> =
            QueryBuilder::new(format!("DELETE FROM `{table}` WHERE concept_code IN ("));
        let mut separated = builder.separated(", ");
        for code in chunk {
            separated.push_bind(code);
        }
        separated.push_unseparated(")");
        deleted += builder.build().execute(&mut **tx).await?.rows_affected();
    }
    Ok(deleted)
}

/// Compares the concept list against the latest trade date of the daily
/// table. Without `delete` the missing concepts go to the failure file
/// (written even when empty); with `delete` they are removed from both
/// tables and recorded in the deleted file.
pub async fn check_missing_concepts(
    pool: &MySqlPool,
    tables: &ConceptTables,
    workdir: &Path,
    delete: bool,
) -> Result<ConceptCheck, SyncError> {
    validate_table_name(&tables.list_table)?;
    validate_table_name(&tables.daily_table)?;

    let latest: Option<String> = sqlx::query_scalar(&format!(
        "SELECT CAST(MAX(trade_date) AS CHAR) FROM `{}`",
        tables.daily_table
    ))
    .fetch_one(pool)
    .await?;
    let latest = latest_trade_date(latest, &tables.daily_table)?;

    let concepts: Vec<(String, String)> = sqlx::query_as(&format!(
        "SELECT CAST(concept_code AS CHAR), CAST(concept_name AS CHAR) FROM `{}` \
         WHERE concept_code IS NOT NULL AND concept_name IS NOT NULL ORDER BY concept_code",
        tables.list_table
    ))
    .fetch_all(pool)
    .await?;
    require_concepts(&concepts, &tables.list_table)?;

    let present: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT DISTINCT CAST(concept_code AS CHAR) FROM `{}` \
         WHERE trade_date = ? AND concept_code IS NOT NULL",
        tables.daily_table
    ))
    .bind(&latest)
    .fetch_all(pool)
    .await?;
    let present: HashSet<String> = present.into_iter().collect();

    let mut check = ConceptCheck {
        latest_trade_date: latest,
        total: concepts.len(),
        missing: missing_concepts(&concepts, &present),
        deleted_daily_rows: 0,
        deleted_list_rows: 0,
        output: None,
    };

    match plan_action(tables, workdir, &check.missing, delete) {
        ConceptAction::RecordFailed(path) => {
            write_record(&path, &check.missing)?;
            info!(
                trade_date = %check.latest_trade_date,
                missing = check.missing.len(),
                path = %path.display(),
                "missing concepts written"
            );
            check.output = Some(path);
        }
        ConceptAction::Nothing => {
            info!(trade_date = %check.latest_trade_date, "no incomplete concepts to delete");
        }
        ConceptAction::Delete { record, codes } => {
            write_record(&record, &check.missing)?;

            let mut tx = pool.begin().await?;
            check.deleted_daily_rows = delete_codes(&mut tx, &tables.daily_table, &codes).await?;
            check.deleted_list_rows = delete_codes(&mut tx, &tables.list_table, &codes).await?;
            tx.commit().await?;

            info!(
                trade_date = %check.latest_trade_date,
                missing = codes.len(),
                daily_rows = check.deleted_daily_rows,
                list_rows = check.deleted_list_rows,
                path = %record.display(),
                "incomplete concepts deleted"
            );
            check.output = Some(record);
        }
    }
    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concepts(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(c, n)| (c.to_string(), n.to_string()))
            .collect()
    }

    #[test]
    fn missing_is_list_minus_present_sorted_by_code() {
        let all = concepts(&[("885003", "机器人"), ("885001", "人工智能"), ("885002", "芯片")]);
        let present: HashSet<String> = ["885002".to_string()].into_iter().collect();

        let missing = missing_concepts(&all, &present);

        let codes: Vec<_> = missing.iter().map(|m| m.code.as_str()).collect();
        assert_eq!(codes, vec!["885001", "885003"]);
        assert_eq!(missing[0].name, "人工智能");
    }

    #[test]
    fn nothing_missing_when_all_present() {
        let all = concepts(&[("885001", "人工智能")]);
        let present: HashSet<String> = ["885001".to_string()].into_iter().collect();
        assert!(missing_concepts(&all, &present).is_empty());
    }

    fn missing(pairs: &[(&str, &str)]) -> Vec<MissingConcept> {
        pairs
            .iter()
            .map(|(code, name)| MissingConcept {
                code: code.to_string(),
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn render_uses_name_then_code() {
        let text = render_missing(&missing(&[("885001", "人工智能"), ("885009", " ")]));
        assert_eq!(text, "人工智能\t885001\n885009\t885009\n");
    }

    #[test]
    fn render_keeps_every_code_of_a_shared_name() {
        let text = render_missing(&missing(&[("885001", "芯片"), ("885002", "芯片")]));
        assert_eq!(text, "芯片\t885001\n芯片\t885002\n");
    }

    #[test]
    fn without_delete_failed_file_is_recorded_even_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tables = ConceptTables::default();

        let action = plan_action(&tables, dir.path(), &[], false);
        let ConceptAction::RecordFailed(path) = action else {
            panic!("expected RecordFailed, got {action:?}");
        };
        assert_eq!(path, dir.path().join("failed_concepts.txt"));

        write_record(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn delete_with_nothing_missing_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let action = plan_action(&ConceptTables::default(), dir.path(), &[], true);
        assert_eq!(action, ConceptAction::Nothing);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn delete_records_every_code() {
        let dir = tempfile::tempdir().unwrap();
        let gone = missing(&[("885001", "芯片"), ("885002", "芯片")]);

        let action = plan_action(&ConceptTables::default(), dir.path(), &gone, true);
        let ConceptAction::Delete { record, codes } = action else {
            panic!("expected Delete, got {action:?}");
        };
        assert_eq!(record, dir.path().join("deleted_concepts.txt"));
        assert_eq!(codes, vec!["885001", "885002"]);

        write_record(&record, &gone).unwrap();
        let written = std::fs::read_to_string(&record).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(!dir.path().join("failed_concepts.txt").exists());
    }

    #[test]
    fn empty_daily_table_is_an_error() {
        for max in [None, Some(String::new())] {
            let err = latest_trade_date(max, "ths_concept_index_daily").unwrap_err();
            assert!(matches!(err, SyncError::EmptyTable(t) if t == "ths_concept_index_daily"));
        }
        assert_eq!(
            latest_trade_date(Some("2024-05-10".into()), "d").unwrap(),
            "2024-05-10"
        );
    }

    #[test]
    fn empty_list_table_is_an_error() {
        let err = require_concepts(&[], "ths_concept_list").unwrap_err();
        assert!(matches!(err, SyncError::EmptyTable(t) if t == "ths_concept_list"));
        assert!(require_concepts(&concepts(&[("885001", "芯片")]), "ths_concept_list").is_ok());
    }
}
