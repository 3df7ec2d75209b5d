//! Table swap and row-count status.
//!
//! The sync utilities build fresh data into `<table>_new` and the swap
//! replaces the live table in one `RENAME TABLE` statement, which MySQL
//! applies atomically: readers see either the old or the new table, never a
//! gap between a DROP and a RENAME.

use std::collections::HashSet;

use serde::Serialize;
use sqlx::MySqlPool;
use tracing::info;

use crate::error::SyncError;
use crate::pipeline::TablePair;

const BACKUP_SUFFIX: &str = "__swap_old";
const MAX_IDENTIFIER_LEN: usize = 64;

/// Only ASCII letters, digits and underscores, at most 64 characters.
pub fn validate_table_name(name: &str) -> Result<(), SyncError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidTableName(name.to_string()))
    }
}

fn backup_name(table: &str) -> String {
    format!("{table}{BACKUP_SUFFIX}")
}

fn quote(name: &str) -> String {
    format!("`{name}`")
}

/// The statements a swap will issue, decided from which tables exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapPlan {
    /// Backups left behind by an interrupted swap; dropped first.
    pub stale_backups: Vec<String>,
    pub renames: Vec<(String, String)>,
    /// Previous live tables, dropped once the rename has committed.
    pub backups: Vec<String>,
    pub swapped: Vec<TablePair>,
    pub skipped: Vec<TablePair>,
    pub unchanged: Vec<TablePair>,
}

impl SwapPlan {
    /// Plans the swap. Nothing is dropped or renamed when a new table is
    /// missing and `skip_missing` is off.
    pub fn build(
        pairs: &[TablePair],
        skip_missing: bool,
        exists: impl Fn(&str) -> bool,
    ) -> Result<Self, SyncError> {
        let mut targets = HashSet::new();
        for pair in pairs {
            validate_table_name(&pair.new)?;
            validate_table_name(&pair.old)?;
            validate_table_name(&backup_name(&pair.old))?;
            if !targets.insert(pair.old.as_str()) {
                return Err(SyncError::Config(format!(
                    "table `{}` is the target of more than one swap",
                    pair.old
                )));
            }
        }

        let mut plan = SwapPlan::default();
        for pair in pairs {
            if pair.new == pair.old {
                plan.unchanged.push(pair.clone());
                continue;
            }
            if !exists(&pair.new) {
                if skip_missing {
                    plan.skipped.push(pair.clone());
                    continue;
                }
                return Err(SyncError::TableMissing(pair.new.clone()));
            }

            if exists(&pair.old) {
                let backup = backup_name(&pair.old);
                if exists(&backup) {
                    plan.stale_backups.push(backup.clone());
                }
                plan.renames.push((pair.old.clone(), backup.clone()));
                plan.backups.push(backup);
            }
            plan.renames.push((pair.new.clone(), pair.old.clone()));
            plan.swapped.push(pair.clone());
        }
        Ok(plan)
    }

    pub fn rename_sql(&self) -> Option<String> {
        if self.renames.is_empty() {
            return None;
        }
        let clauses: Vec<String> = self
            .renames
            .iter()
            .map(|(from, to)| format!("{} TO {}", quote(from), quote(to)))
            .collect();
        Some(format!("RENAME TABLE {}", clauses.join(", ")))
    }

    fn drop_sql(tables: &[String]) -> Option<String> {
        if tables.is_empty() {
            return None;
        }
        let names: Vec<String> = tables.iter().map(|t| quote(t)).collect();
        Some(format!("DROP TABLE IF EXISTS {}", names.join(", ")))
    }

    pub fn stale_drop_sql(&self) -> Option<String> {
        Self::drop_sql(&self.stale_backups)
    }

    pub fn backup_drop_sql(&self) -> Option<String> {
        Self::drop_sql(&self.backups)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SwapSummary {
    pub swapped: Vec<TablePair>,
    pub skipped: Vec<TablePair>,
    pub unchanged: Vec<TablePair>,
}

async fn table_exists(pool: &MySqlPool, name: &str) -> Result<bool, SyncError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Replaces each `old` table with its `new` counterpart.
pub async fn swap_tables(
    pool: &MySqlPool,
    pairs: &[TablePair],
    skip_missing: bool,
) -> Result<SwapSummary, SyncError> {
    let mut candidates = Vec::new();
    for pair in pairs {
        validate_table_name(&pair.new)?;
        validate_table_name(&pair.old)?;
        candidates.extend([pair.new.clone(), pair.old.clone(), backup_name(&pair.old)]);
    }

    let mut existing = HashSet::new();
    for name in candidates {
        if table_exists(pool, &name).await? {
            existing.insert(name);
        }
    }

    let plan = SwapPlan::build(pairs, skip_missing, |name| existing.contains(name))?;
    for pair in &plan.skipped {
        info!(new = %pair.new, old = %pair.old, "new table not found; skipping swap");
    }
    for pair in &plan.unchanged {
        info!(table = %pair.old, "new and old table names are identical; nothing to do");
    }

    if let Some(sql) = plan.stale_drop_sql() {
        info!(%sql, "dropping backups from an interrupted swap");
        sqlx::query(&sql).execute(pool).await?;
    }
    if let Some(sql) = plan.rename_sql() {
        info!(%sql, "swapping tables");
        sqlx::query(&sql).execute(pool).await?;
    }
    if let Some(sql) = plan.backup_drop_sql() {
        info!(%sql, "dropping previous tables");
        sqlx::query(&sql).execute(pool).await?;
    }
    for pair in &plan.swapped {
        info!(new = %pair.new, old = %pair.old, "swap complete");
    }

    Ok(SwapSummary {
        swapped: plan.swapped,
        skipped: plan.skipped,
        unchanged: plan.unchanged,
    })
}

/// Row count of a table, or `None` when it does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatus {
    pub name: String,
    pub rows: Option<i64>,
}

pub async fn table_status(pool: &MySqlPool, names: &[String]) -> Result<Vec<TableStatus>, SyncError> {
    let mut statuses = Vec::with_capacity(names.len());
    for name in names {
        validate_table_name(name)?;
        let rows = if table_exists(pool, name).await? {
            let sql = format!("SELECT COUNT(*) FROM {}", quote(name));
            Some(sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await?)
        } else {
            None
        };
        statuses.push(TableStatus {
            name: name.clone(),
            rows,
        });
    }
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(new: &str, old: &str) -> TablePair {
        TablePair {
            new: new.into(),
            old: old.into(),
        }
    }

    fn existing(names: &[&str]) -> impl Fn(&str) -> bool {
        let set: HashSet<String> = names.iter().map(|s| s.to_string()).collect();
        move |name: &str| set.contains(name)
    }

    #[test]
    fn table_names_are_restricted() {
        assert!(validate_table_name("daily_qfq_new").is_ok());
        assert!(validate_table_name("ths_concept_index_daily").is_ok());
        for bad in ["", "daily-qfq", "daily qfq", "x`; DROP TABLE y", "表"] {
            assert!(
                matches!(validate_table_name(bad), Err(SyncError::InvalidTableName(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_table_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn swap_with_existing_old_is_one_atomic_rename() {
        let plan = SwapPlan::build(
            &[pair("daily_qfq_new", "daily_qfq")],
            false,
            existing(&["daily_qfq_new", "daily_qfq"]),
        )
        .unwrap();

        assert_eq!(
            plan.rename_sql().unwrap(),
            "RENAME TABLE `daily_qfq` TO `daily_qfq__swap_old`, `daily_qfq_new` TO `daily_qfq`"
        );
        assert_eq!(
            plan.backup_drop_sql().unwrap(),
            "DROP TABLE IF EXISTS `daily_qfq__swap_old`"
        );
        assert!(plan.stale_drop_sql().is_none());
        assert_eq!(plan.swapped.len(), 1);
    }

    #[test]
    fn swap_without_old_table_just_renames() {
        let plan = SwapPlan::build(
            &[pair("daily_qfq_new", "daily_qfq")],
            false,
            existing(&["daily_qfq_new"]),
        )
        .unwrap();

        assert_eq!(plan.rename_sql().unwrap(), "RENAME TABLE `daily_qfq_new` TO `daily_qfq`");
        assert!(plan.backup_drop_sql().is_none());
    }

    #[test]
    fn missing_new_table_fails_before_touching_old() {
        let err = SwapPlan::build(
            &[pair("daily_qfq_new", "daily_qfq")],
            false,
            existing(&["daily_qfq"]),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::TableMissing(t) if t == "daily_qfq_new"));
    }

    #[test]
    fn missing_new_table_can_be_skipped() {
        let plan = SwapPlan::build(
            &[
                pair("ths_concept_index_daily_new", "ths_concept_index_daily"),
                pair("ths_concept_list_new", "ths_concept_list"),
            ],
            true,
            existing(&["ths_concept_list_new", "ths_concept_list", "ths_concept_index_daily"]),
        )
        .unwrap();

        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].new, "ths_concept_index_daily_new");
        assert_eq!(
            plan.rename_sql().unwrap(),
            "RENAME TABLE `ths_concept_list` TO `ths_concept_list__swap_old`, \
             `ths_concept_list_new` TO `ths_concept_list`"
        );
    }

    #[test]
    fn identical_names_are_a_no_op() {
        let plan = SwapPlan::build(&[pair("daily", "daily")], false, existing(&[])).unwrap();
        assert_eq!(plan.unchanged.len(), 1);
        assert!(plan.rename_sql().is_none());
    }

    #[test]
    fn stale_backup_is_dropped_first() {
        let plan = SwapPlan::build(
            &[pair("daily_new", "daily")],
            false,
            existing(&["daily_new", "daily", "daily__swap_old"]),
        )
        .unwrap();
        assert_eq!(
            plan.stale_drop_sql().unwrap(),
            "DROP TABLE IF EXISTS `daily__swap_old`"
        );
    }

    #[test]
    fn duplicate_targets_rejected() {
        let err = SwapPlan::build(
            &[pair("a_new", "a"), pair("b_new", "a")],
            false,
            existing(&["a_new", "b_new"]),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn overlong_backup_name_rejected() {
        let old = "t".repeat(60);
        let err = SwapPlan::build(&[pair("x", &old)], false, existing(&["x"])).unwrap_err();
        assert!(matches!(err, SyncError::InvalidTableName(_)));
    }
}
