// ==========================================
// 物料批次追溯引擎 - 预警仓储
// ==========================================
// 红线: 同一 (material_id, alert_type) 至多一条 ACTIVE（部分唯一索引兜底）
// 说明: 评估流程的读-改-写全部走 *_in 系列，在同一事务内完成
// ==========================================

use crate::domain::alert::MaterialAlert;
use crate::domain::types::{AlertStatus, AlertType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_ts, get_enum, get_opt_ts, get_ts};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const ALERT_COLUMNS: &str = r#"
    alert_id, alert_no, material_id, alert_type, alert_level, status,
    current_stock, safety_stock, shortage_qty, avg_daily_consumption, days_to_stockout,
    trigger_value, threshold_value, rule_id, message, trigger_count,
    resolved_by, resolved_at, resolution_note, created_at, updated_at
"#;

fn map_alert_row(row: &rusqlite::Row) -> rusqlite::Result<MaterialAlert> {
    Ok(MaterialAlert {
        alert_id: row.get(0)?,
        alert_no: row.get(1)?,
        material_id: row.get(2)?,
        alert_type: get_enum(row, 3)?,
        alert_level: get_enum(row, 4)?,
        status: get_enum(row, 5)?,
        current_stock: row.get(6)?,
        safety_stock: row.get(7)?,
        shortage_qty: row.get(8)?,
        avg_daily_consumption: row.get(9)?,
        days_to_stockout: row.get(10)?,
        trigger_value: row.get(11)?,
        threshold_value: row.get(12)?,
        rule_id: row.get(13)?,
        message: row.get(14)?,
        trigger_count: row.get(15)?,
        resolved_by: row.get(16)?,
        resolved_at: get_opt_ts(row, 17)?,
        resolution_note: row.get(18)?,
        created_at: get_ts(row, 19)?,
        updated_at: get_ts(row, 20)?,
    })
}

// ==========================================
// AlertRepository - 预警仓储
// ==========================================
pub struct AlertRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AlertRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    /// 查询 (material_id, alert_type) 的 ACTIVE 预警
    pub fn find_active_in(
        conn: &Connection,
        material_id: &str,
        alert_type: AlertType,
    ) -> RepositoryResult<Option<MaterialAlert>> {
        let sql = format!(
            "SELECT {} FROM material_alert WHERE material_id = ?1 AND alert_type = ?2 AND status = 'ACTIVE'",
            ALERT_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![material_id, alert_type.to_db_str()], map_alert_row)
            .optional()?)
    }

    pub fn find_by_id_in(conn: &Connection, alert_id: &str) -> RepositoryResult<Option<MaterialAlert>> {
        let sql = format!("SELECT {} FROM material_alert WHERE alert_id = ?1", ALERT_COLUMNS);
        Ok(conn.query_row(&sql, params![alert_id], map_alert_row).optional()?)
    }

    pub fn insert_in(conn: &Connection, alert: &MaterialAlert) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO material_alert (
                alert_id, alert_no, material_id, alert_type, alert_level, status,
                current_stock, safety_stock, shortage_qty, avg_daily_consumption, days_to_stockout,
                trigger_value, threshold_value, rule_id, message, trigger_count,
                resolved_by, resolved_at, resolution_note, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            "#,
            params![
                alert.alert_id,
                alert.alert_no,
                alert.material_id,
                alert.alert_type.to_db_str(),
                alert.alert_level.to_db_str(),
                alert.status.to_db_str(),
                alert.current_stock,
                alert.safety_stock,
                alert.shortage_qty,
                alert.avg_daily_consumption,
                alert.days_to_stockout,
                alert.trigger_value,
                alert.threshold_value,
                alert.rule_id,
                alert.message,
                alert.trigger_count,
                alert.resolved_by,
                alert.resolved_at.map(fmt_ts),
                alert.resolution_note,
                fmt_ts(alert.created_at),
                fmt_ts(alert.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 刷新 ACTIVE 预警的快照字段（不改 alert_no / created_at / status）
    pub fn update_active_in(conn: &Connection, alert: &MaterialAlert) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE material_alert
            SET alert_level = ?1, current_stock = ?2, safety_stock = ?3, shortage_qty = ?4,
                avg_daily_consumption = ?5, days_to_stockout = ?6,
                trigger_value = ?7, threshold_value = ?8, rule_id = ?9,
                message = ?10, trigger_count = ?11, updated_at = ?12
            WHERE alert_id = ?13 AND status = 'ACTIVE'
            "#,
            params![
                alert.alert_level.to_db_str(),
                alert.current_stock,
                alert.safety_stock,
                alert.shortage_qty,
                alert.avg_daily_consumption,
                alert.days_to_stockout,
                alert.trigger_value,
                alert.threshold_value,
                alert.rule_id,
                alert.message,
                alert.trigger_count,
                fmt_ts(alert.updated_at),
                alert.alert_id,
            ],
        )?;
        if rows != 1 {
            return Err(RepositoryError::ConcurrentModification {
                entity: "MaterialAlert".to_string(),
                id: alert.alert_id.clone(),
            });
        }
        Ok(())
    }

    /// 关闭 ACTIVE 预警（RESOLVED / IGNORED / CLOSED）
    pub fn close_in(
        conn: &Connection,
        alert_id: &str,
        status: AlertStatus,
        resolved_by: Option<&str>,
        resolution_note: Option<&str>,
        at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE material_alert
            SET status = ?1, resolved_by = ?2, resolution_note = ?3,
                resolved_at = ?4, updated_at = ?4
            WHERE alert_id = ?5 AND status = 'ACTIVE'
            "#,
            params![status.to_db_str(), resolved_by, resolution_note, fmt_ts(at), alert_id],
        )?;
        if rows != 1 {
            return Err(RepositoryError::ConcurrentModification {
                entity: "MaterialAlert".to_string(),
                id: alert_id.to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_by_id(&self, alert_id: &str) -> RepositoryResult<Option<MaterialAlert>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, alert_id)
    }

    /// ACTIVE 预警列表（可按物料过滤）
    pub fn list_active(&self, material_id: Option<&str>) -> RepositoryResult<Vec<MaterialAlert>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM material_alert
            WHERE status = 'ACTIVE' AND (?1 IS NULL OR material_id = ?1)
            ORDER BY material_id, alert_type
            "#,
            ALERT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let alerts = stmt
            .query_map(params![material_id], map_alert_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    /// 物料全部预警历史（新到旧）
    pub fn list_by_material(&self, material_id: &str) -> RepositoryResult<Vec<MaterialAlert>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM material_alert WHERE material_id = ?1 ORDER BY created_at DESC, rowid DESC",
            ALERT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let alerts = stmt
            .query_map(params![material_id], map_alert_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_connection;
    use crate::domain::types::AlertLevel;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn make_alert(id: &str, alert_type: AlertType) -> MaterialAlert {
        MaterialAlert {
            alert_id: id.to_string(),
            alert_no: format!("ALT-{}", id),
            material_id: "M1".to_string(),
            alert_type,
            alert_level: AlertLevel::Warning,
            status: AlertStatus::Active,
            current_stock: 50.0,
            safety_stock: Some(100.0),
            shortage_qty: Some(50.0),
            avg_daily_consumption: None,
            days_to_stockout: None,
            trigger_value: Some(50.0),
            threshold_value: Some(100.0),
            rule_id: None,
            message: "库存低于安全库存".to_string(),
            trigger_count: 1,
            resolved_by: None,
            resolved_at: None,
            resolution_note: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn setup() -> (Arc<Mutex<Connection>>, AlertRepository) {
        let conn = Arc::new(Mutex::new(open_memory_connection().unwrap()));
        (conn.clone(), AlertRepository::new(conn))
    }

    #[test]
    fn test_second_active_alert_is_rejected() {
        let (conn, _repo) = setup();
        let c = conn.lock().unwrap();
        AlertRepository::insert_in(&c, &make_alert("a1", AlertType::Shortage)).unwrap();
        let err = AlertRepository::insert_in(&c, &make_alert("a2", AlertType::Shortage)).unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));

        // 不同类型互不影响
        AlertRepository::insert_in(&c, &make_alert("a3", AlertType::LowStock)).unwrap();
    }

    #[test]
    fn test_close_then_new_active_allowed() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            AlertRepository::insert_in(&c, &make_alert("a1", AlertType::Shortage)).unwrap();
            AlertRepository::close_in(&c, "a1", AlertStatus::Resolved, Some("张三"), Some("已补货"), now())
                .unwrap();
            AlertRepository::insert_in(&c, &make_alert("a2", AlertType::Shortage)).unwrap();
        }

        let closed = repo.find_by_id("a1").unwrap().unwrap();
        assert_eq!(closed.status, AlertStatus::Resolved);
        assert_eq!(closed.resolved_by.as_deref(), Some("张三"));
        assert_eq!(closed.resolved_at, Some(now()));

        let active = repo.list_active(Some("M1")).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_id, "a2");
        assert_eq!(repo.list_by_material("M1").unwrap().len(), 2);
    }

    #[test]
    fn test_update_active_refreshes_snapshot() {
        let (conn, _repo) = setup();
        let c = conn.lock().unwrap();
        let mut alert = make_alert("a1", AlertType::LowStock);
        AlertRepository::insert_in(&c, &alert).unwrap();

        alert.alert_level = AlertLevel::Critical;
        alert.current_stock = 10.0;
        alert.trigger_count = 2;
        AlertRepository::update_active_in(&c, &alert).unwrap();

        let found = AlertRepository::find_active_in(&c, "M1", AlertType::LowStock)
            .unwrap()
            .unwrap();
        assert_eq!(found.alert_level, AlertLevel::Critical);
        assert_eq!(found.current_stock, 10.0);
        assert_eq!(found.trigger_count, 2);
    }

    #[test]
    fn test_close_non_active_is_conflict() {
        let (conn, _repo) = setup();
        let c = conn.lock().unwrap();
        AlertRepository::insert_in(&c, &make_alert("a1", AlertType::Shortage)).unwrap();
        AlertRepository::close_in(&c, "a1", AlertStatus::Ignored, None, None, now()).unwrap();
        let err = AlertRepository::close_in(&c, "a1", AlertStatus::Closed, None, None, now()).unwrap_err();
        assert!(matches!(err, RepositoryError::ConcurrentModification { .. }));
    }
}
