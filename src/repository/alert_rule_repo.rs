// ==========================================
// 物料批次追溯引擎 - 预警规则仓储
// ==========================================
// 职责: 规则的增改、启停与候选查询
// 说明: 候选集合的优先级裁决由引擎层 RuleResolver 负责
// ==========================================

use crate::domain::alert::MaterialAlertRule;
use crate::domain::types::AlertType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_ts, get_enum, get_ts};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const RULE_COLUMNS: &str = r#"
    rule_id, material_id, category_id, alert_type, threshold_type,
    threshold_value, safety_days, lead_time_days, buffer_ratio,
    priority, is_active, created_at, updated_at
"#;

fn map_rule_row(row: &rusqlite::Row) -> rusqlite::Result<MaterialAlertRule> {
    Ok(MaterialAlertRule {
        rule_id: row.get(0)?,
        material_id: row.get(1)?,
        category_id: row.get(2)?,
        alert_type: get_enum(row, 3)?,
        threshold_type: get_enum(row, 4)?,
        threshold_value: row.get(5)?,
        safety_days: row.get(6)?,
        lead_time_days: row.get(7)?,
        buffer_ratio: row.get(8)?,
        priority: row.get(9)?,
        is_active: row.get::<_, i32>(10)? != 0,
        created_at: get_ts(row, 11)?,
        updated_at: get_ts(row, 12)?,
    })
}

// ==========================================
// AlertRuleRepository - 预警规则仓储
// ==========================================
pub struct AlertRuleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AlertRuleRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, rule: &MaterialAlertRule) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO material_alert_rule (
                rule_id, material_id, category_id, alert_type, threshold_type,
                threshold_value, safety_days, lead_time_days, buffer_ratio,
                priority, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                rule.rule_id,
                rule.material_id,
                rule.category_id,
                rule.alert_type.to_db_str(),
                rule.threshold_type.to_db_str(),
                rule.threshold_value,
                rule.safety_days,
                rule.lead_time_days,
                rule.buffer_ratio,
                rule.priority,
                rule.is_active as i32,
                fmt_ts(rule.created_at),
                fmt_ts(rule.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 覆盖更新规则（作用域与类型一并更新）
    pub fn update(&self, rule: &MaterialAlertRule) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE material_alert_rule
            SET material_id = ?1, category_id = ?2, alert_type = ?3, threshold_type = ?4,
                threshold_value = ?5, safety_days = ?6, lead_time_days = ?7, buffer_ratio = ?8,
                priority = ?9, is_active = ?10, updated_at = ?11
            WHERE rule_id = ?12
            "#,
            params![
                rule.material_id,
                rule.category_id,
                rule.alert_type.to_db_str(),
                rule.threshold_type.to_db_str(),
                rule.threshold_value,
                rule.safety_days,
                rule.lead_time_days,
                rule.buffer_ratio,
                rule.priority,
                rule.is_active as i32,
                fmt_ts(rule.updated_at),
                rule.rule_id,
            ],
        )?;
        if rows != 1 {
            return Err(RepositoryError::NotFound {
                entity: "MaterialAlertRule".to_string(),
                id: rule.rule_id.clone(),
            });
        }
        Ok(())
    }

    pub fn set_active(&self, rule_id: &str, is_active: bool, at: NaiveDateTime) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE material_alert_rule SET is_active = ?1, updated_at = ?2 WHERE rule_id = ?3",
            params![is_active as i32, fmt_ts(at), rule_id],
        )?;
        if rows != 1 {
            return Err(RepositoryError::NotFound {
                entity: "MaterialAlertRule".to_string(),
                id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn find_by_id(&self, rule_id: &str) -> RepositoryResult<Option<MaterialAlertRule>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM material_alert_rule WHERE rule_id = ?1", RULE_COLUMNS);
        Ok(conn.query_row(&sql, params![rule_id], map_rule_row).optional()?)
    }

    /// 候选规则: 指定类型下、启用中、作用域命中（物料/分类/全局）
    pub fn list_candidates(
        &self,
        material_id: &str,
        category_id: Option<&str>,
        alert_type: AlertType,
    ) -> RepositoryResult<Vec<MaterialAlertRule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM material_alert_rule
            WHERE alert_type = ?1 AND is_active = 1
              AND (
                    material_id = ?2
                 OR (material_id IS NULL AND ?3 IS NOT NULL AND category_id = ?3)
                 OR (material_id IS NULL AND category_id IS NULL)
              )
            "#,
            RULE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rules = stmt
            .query_map(params![alert_type.to_db_str(), material_id, category_id], map_rule_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<MaterialAlertRule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM material_alert_rule ORDER BY alert_type, priority DESC, rule_id",
            RULE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rules = stmt
            .query_map([], map_rule_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_connection;
    use crate::domain::types::ThresholdType;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn rule(id: &str, material: Option<&str>, category: Option<&str>, priority: i32) -> MaterialAlertRule {
        MaterialAlertRule {
            rule_id: id.to_string(),
            material_id: material.map(|s| s.to_string()),
            category_id: category.map(|s| s.to_string()),
            alert_type: AlertType::LowStock,
            threshold_type: ThresholdType::Percentage,
            threshold_value: 20.0,
            safety_days: 0.0,
            lead_time_days: 0.0,
            buffer_ratio: 1.0,
            priority,
            is_active: true,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn setup() -> AlertRuleRepository {
        AlertRuleRepository::new(Arc::new(Mutex::new(open_memory_connection().unwrap())))
    }

    #[test]
    fn test_candidates_match_scope() {
        let repo = setup();
        repo.insert(&rule("r-mat", Some("M1"), None, 1)).unwrap();
        repo.insert(&rule("r-other-mat", Some("M2"), None, 1)).unwrap();
        repo.insert(&rule("r-cat", None, Some("CAT-A"), 1)).unwrap();
        repo.insert(&rule("r-other-cat", None, Some("CAT-B"), 1)).unwrap();
        repo.insert(&rule("r-global", None, None, 1)).unwrap();

        let mut ids: Vec<String> = repo
            .list_candidates("M1", Some("CAT-A"), AlertType::LowStock)
            .unwrap()
            .into_iter()
            .map(|r| r.rule_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["r-cat", "r-global", "r-mat"]);

        // 无分类物料只命中物料级与全局
        let ids: Vec<String> = repo
            .list_candidates("M3", None, AlertType::LowStock)
            .unwrap()
            .into_iter()
            .map(|r| r.rule_id)
            .collect();
        assert_eq!(ids, vec!["r-global"]);
    }

    #[test]
    fn test_inactive_rule_is_not_candidate() {
        let repo = setup();
        repo.insert(&rule("r1", Some("M1"), None, 1)).unwrap();
        repo.set_active("r1", false, ts()).unwrap();

        assert!(repo
            .list_candidates("M1", None, AlertType::LowStock)
            .unwrap()
            .is_empty());
        assert!(!repo.find_by_id("r1").unwrap().unwrap().is_active);
    }

    #[test]
    fn test_update_missing_rule_is_not_found() {
        let repo = setup();
        let err = repo.update(&rule("nope", None, None, 0)).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
