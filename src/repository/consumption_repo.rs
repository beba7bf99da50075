// ==========================================
// 物料批次追溯引擎 - 消耗台账仓储
// ==========================================
// 红线: 只追加（表级触发器禁止 UPDATE/DELETE）
// 红线: Repository 不含业务逻辑，只做数据映射
// ==========================================

use crate::domain::analytics::MaterialCostSummary;
use crate::domain::consumption::MaterialConsumption;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_ts, get_enum, get_ts};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const CONSUMPTION_COLUMNS: &str = r#"
    consumption_id, consumption_no, material_id, batch_id,
    consumption_qty, standard_qty, variance_qty, variance_rate, is_waste,
    consumption_type, project_id, work_order_id,
    unit_price, total_cost, consumed_at, operator, remark, created_at
"#;

fn map_consumption_row(row: &rusqlite::Row) -> rusqlite::Result<MaterialConsumption> {
    Ok(MaterialConsumption {
        consumption_id: row.get(0)?,
        consumption_no: row.get(1)?,
        material_id: row.get(2)?,
        batch_id: row.get(3)?,
        consumption_qty: row.get(4)?,
        standard_qty: row.get(5)?,
        variance_qty: row.get(6)?,
        variance_rate: row.get(7)?,
        is_waste: row.get::<_, i32>(8)? != 0,
        consumption_type: get_enum(row, 9)?,
        project_id: row.get(10)?,
        work_order_id: row.get(11)?,
        unit_price: row.get(12)?,
        total_cost: row.get(13)?,
        consumed_at: get_ts(row, 14)?,
        operator: row.get(15)?,
        remark: row.get(16)?,
        created_at: get_ts(row, 17)?,
    })
}

/// 窗口内消耗汇总
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConsumptionTotals {
    pub total_qty: f64,
    pub waste_qty: f64,
    pub record_count: i64,
}

// ==========================================
// ConsumptionRepository - 消耗台账仓储
// ==========================================
pub struct ConsumptionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConsumptionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn query_list(
        conn: &Connection,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> RepositoryResult<Vec<MaterialConsumption>> {
        let sql = format!(
            "SELECT {} FROM material_consumption WHERE {} ORDER BY consumed_at, created_at, rowid",
            CONSUMPTION_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, map_consumption_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    /// 追加消耗记录
    pub fn insert_in(conn: &Connection, record: &MaterialConsumption) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO material_consumption (
                consumption_id, consumption_no, material_id, batch_id,
                consumption_qty, standard_qty, variance_qty, variance_rate, is_waste,
                consumption_type, project_id, work_order_id,
                unit_price, total_cost, consumed_at, operator, remark, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
            params![
                record.consumption_id,
                record.consumption_no,
                record.material_id,
                record.batch_id,
                record.consumption_qty,
                record.standard_qty,
                record.variance_qty,
                record.variance_rate,
                record.is_waste as i32,
                record.consumption_type.to_db_str(),
                record.project_id,
                record.work_order_id,
                record.unit_price,
                record.total_cost,
                fmt_ts(record.consumed_at),
                record.operator,
                record.remark,
                fmt_ts(record.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn exists_no_in(conn: &Connection, consumption_no: &str) -> RepositoryResult<bool> {
        let hit = conn
            .query_row(
                "SELECT 1 FROM material_consumption WHERE consumption_no = ?1 LIMIT 1",
                params![consumption_no],
                |_row| Ok(true),
            )
            .optional()?;
        Ok(hit.unwrap_or(false))
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn find_by_no(&self, consumption_no: &str) -> RepositoryResult<Option<MaterialConsumption>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM material_consumption WHERE consumption_no = ?1",
            CONSUMPTION_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![consumption_no], map_consumption_row)
            .optional()?)
    }

    /// 批次下全部消耗（时间正序）
    pub fn list_by_batch(&self, batch_id: &str) -> RepositoryResult<Vec<MaterialConsumption>> {
        let conn = self.get_conn()?;
        Self::query_list(&conn, "batch_id = ?1", &[&batch_id])
    }

    pub fn list_by_project(&self, project_id: &str) -> RepositoryResult<Vec<MaterialConsumption>> {
        let conn = self.get_conn()?;
        Self::query_list(&conn, "project_id = ?1", &[&project_id])
    }

    pub fn list_by_work_order(&self, work_order_id: &str) -> RepositoryResult<Vec<MaterialConsumption>> {
        let conn = self.get_conn()?;
        Self::query_list(&conn, "work_order_id = ?1", &[&work_order_id])
    }

    /// 物料在 [start, end) 内的数量汇总
    pub fn totals_for_material(
        &self,
        material_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<ConsumptionTotals> {
        let conn = self.get_conn()?;
        let totals = conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(consumption_qty), 0),
                COALESCE(SUM(CASE WHEN is_waste = 1 THEN consumption_qty ELSE 0 END), 0),
                COUNT(*)
            FROM material_consumption
            WHERE material_id = ?1 AND consumed_at >= ?2 AND consumed_at < ?3
            "#,
            params![material_id, fmt_ts(start), fmt_ts(end)],
            |row| {
                Ok(ConsumptionTotals {
                    total_qty: row.get(0)?,
                    waste_qty: row.get(1)?,
                    record_count: row.get(2)?,
                })
            },
        )?;
        Ok(totals)
    }

    /// 按物料汇总成本（降序，截断 top_n）
    pub fn cost_by_material(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        top_n: usize,
    ) -> RepositoryResult<Vec<MaterialCostSummary>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT c.material_id, m.code, m.name,
                   SUM(c.consumption_qty) AS total_qty,
                   SUM(c.total_cost) AS total_cost,
                   COUNT(*) AS record_count
            FROM material_consumption c
            LEFT JOIN material m ON m.material_id = c.material_id
            WHERE c.consumed_at >= ?1 AND c.consumed_at < ?2
            GROUP BY c.material_id
            ORDER BY total_cost DESC, c.material_id
            LIMIT ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![fmt_ts(start), fmt_ts(end), top_n as i64], |row| {
                Ok(MaterialCostSummary {
                    material_id: row.get(0)?,
                    material_code: row.get(1)?,
                    material_name: row.get(2)?,
                    total_qty: row.get(3)?,
                    total_cost: row.get(4)?,
                    record_count: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// 损耗记录: is_waste 或 variance_rate >= min_variance_rate
    pub fn list_waste(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        min_variance_rate: f64,
    ) -> RepositoryResult<Vec<MaterialConsumption>> {
        let conn = self.get_conn()?;
        Self::query_list(
            &conn,
            r#"consumed_at >= ?1 AND consumed_at < ?2
               AND (is_waste = 1 OR (variance_rate IS NOT NULL AND variance_rate >= ?3))"#,
            &[&fmt_ts(start), &fmt_ts(end), &min_variance_rate],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_connection;
    use crate::domain::types::ConsumptionType;
    use chrono::NaiveDate;

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn setup() -> (Arc<Mutex<Connection>>, ConsumptionRepository) {
        let conn = open_memory_connection().unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO material (material_id, code, name, unit, standard_price) VALUES ('M1', 'C1', '钢板', 't', 10);
            INSERT INTO material (material_id, code, name, unit, standard_price) VALUES ('M2', 'C2', '焊丝', 'kg', 2);
            "#,
        )
        .unwrap();
        let conn = Arc::new(Mutex::new(conn));
        (conn.clone(), ConsumptionRepository::new(conn))
    }

    fn record(no: &str, material: &str, qty: f64, price: f64, at: NaiveDateTime) -> MaterialConsumption {
        MaterialConsumption {
            consumption_id: format!("id-{}", no),
            consumption_no: no.to_string(),
            material_id: material.to_string(),
            batch_id: None,
            consumption_qty: qty,
            standard_qty: None,
            variance_qty: None,
            variance_rate: None,
            is_waste: false,
            consumption_type: ConsumptionType::Production,
            project_id: Some("P1".to_string()),
            work_order_id: None,
            unit_price: price,
            total_cost: qty * price,
            consumed_at: at,
            operator: None,
            remark: None,
            created_at: at,
        }
    }

    #[test]
    fn test_insert_and_find_by_no() {
        let (conn, repo) = setup();
        let r = record("NO-1", "M1", 5.0, 10.0, ts(1, 8));
        ConsumptionRepository::insert_in(&conn.lock().unwrap(), &r).unwrap();

        assert_eq!(repo.find_by_no("NO-1").unwrap(), Some(r));
        assert!(ConsumptionRepository::exists_no_in(&conn.lock().unwrap(), "NO-1").unwrap());
        assert!(!ConsumptionRepository::exists_no_in(&conn.lock().unwrap(), "NO-2").unwrap());
    }

    #[test]
    fn test_totals_respect_window() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            ConsumptionRepository::insert_in(&c, &record("A", "M1", 5.0, 10.0, ts(1, 8))).unwrap();
            let mut waste = record("B", "M1", 3.0, 10.0, ts(2, 8));
            waste.is_waste = true;
            ConsumptionRepository::insert_in(&c, &waste).unwrap();
            ConsumptionRepository::insert_in(&c, &record("C", "M1", 7.0, 10.0, ts(9, 8))).unwrap();
        }

        let totals = repo.totals_for_material("M1", ts(1, 0), ts(3, 0)).unwrap();
        assert_eq!(totals.total_qty, 8.0);
        assert_eq!(totals.waste_qty, 3.0);
        assert_eq!(totals.record_count, 2);
    }

    #[test]
    fn test_cost_by_material_sorted_desc_and_truncated() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            ConsumptionRepository::insert_in(&c, &record("A", "M1", 5.0, 10.0, ts(1, 8))).unwrap();
            ConsumptionRepository::insert_in(&c, &record("B", "M2", 100.0, 2.0, ts(1, 9))).unwrap();
        }

        let all = repo.cost_by_material(ts(1, 0), ts(2, 0), 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].material_id, "M2");
        assert_eq!(all[0].total_cost, 200.0);
        assert_eq!(all[1].material_code.as_deref(), Some("C1"));

        let top1 = repo.cost_by_material(ts(1, 0), ts(2, 0), 1).unwrap();
        assert_eq!(top1.len(), 1);
    }
}
