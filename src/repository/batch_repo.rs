// ==========================================
// 物料批次追溯引擎 - 批次仓储
// ==========================================
// 红线: Repository 不含业务逻辑，只做数据映射
// 说明: *_in 系列函数在调用方事务内执行
// ==========================================

use crate::domain::batch::MaterialBatch;
use crate::domain::types::BatchStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{build_in_clause, fmt_date, fmt_ts, get_enum, get_opt_date, get_ts};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const BATCH_COLUMNS: &str = r#"
    batch_id, batch_no, barcode, material_id,
    initial_qty, current_qty, consumed_qty, reserved_qty,
    quality_status, status, lock_reason,
    production_date, expire_date, supplier_name,
    created_at, updated_at
"#;

fn map_batch_row(row: &rusqlite::Row) -> rusqlite::Result<MaterialBatch> {
    Ok(MaterialBatch {
        batch_id: row.get(0)?,
        batch_no: row.get(1)?,
        barcode: row.get(2)?,
        material_id: row.get(3)?,
        initial_qty: row.get(4)?,
        current_qty: row.get(5)?,
        consumed_qty: row.get(6)?,
        reserved_qty: row.get(7)?,
        quality_status: get_enum(row, 8)?,
        status: get_enum(row, 9)?,
        lock_reason: row.get(10)?,
        production_date: get_opt_date(row, 11)?,
        expire_date: get_opt_date(row, 12)?,
        supplier_name: row.get(13)?,
        created_at: get_ts(row, 14)?,
        updated_at: get_ts(row, 15)?,
    })
}

/// 批次数量变更（一次扣减的落库值）
#[derive(Debug, Clone, Copy)]
pub struct BatchQtyUpdate<'a> {
    pub batch_id: &'a str,
    /// 读取时的 current_qty（乐观守卫）
    pub expected_current_qty: f64,
    pub current_qty: f64,
    pub consumed_qty: f64,
    pub reserved_qty: f64,
    pub status: BatchStatus,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// BatchRepository - 批次仓储
// ==========================================
pub struct BatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchRepository {
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

    /// 插入批次
    pub fn insert_in(conn: &Connection, batch: &MaterialBatch) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO material_batch (
                batch_id, batch_no, barcode, material_id,
                initial_qty, current_qty, consumed_qty, reserved_qty,
                quality_status, status, lock_reason,
                production_date, expire_date, supplier_name,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                batch.batch_id,
                batch.batch_no,
                batch.barcode,
                batch.material_id,
                batch.initial_qty,
                batch.current_qty,
                batch.consumed_qty,
                batch.reserved_qty,
                batch.quality_status.to_db_str(),
                batch.status.to_db_str(),
                batch.lock_reason,
                batch.production_date.map(fmt_date),
                batch.expire_date.map(fmt_date),
                batch.supplier_name,
                fmt_ts(batch.created_at),
                fmt_ts(batch.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id_in(conn: &Connection, batch_id: &str) -> RepositoryResult<Option<MaterialBatch>> {
        let sql = format!("SELECT {} FROM material_batch WHERE batch_id = ?1", BATCH_COLUMNS);
        Ok(conn.query_row(&sql, params![batch_id], map_batch_row).optional()?)
    }

    pub fn find_by_batch_no_in(conn: &Connection, batch_no: &str) -> RepositoryResult<Option<MaterialBatch>> {
        let sql = format!("SELECT {} FROM material_batch WHERE batch_no = ?1", BATCH_COLUMNS);
        Ok(conn.query_row(&sql, params![batch_no], map_batch_row).optional()?)
    }

    pub fn find_by_barcode_in(conn: &Connection, barcode: &str) -> RepositoryResult<Option<MaterialBatch>> {
        let sql = format!("SELECT {} FROM material_batch WHERE barcode = ?1", BATCH_COLUMNS);
        Ok(conn.query_row(&sql, params![barcode], map_batch_row).optional()?)
    }

    /// 扣减数量（带状态守卫）
    ///
    /// # 守卫
    /// - status 必须仍为 ACTIVE
    /// - current_qty 必须仍等于读取时的值
    /// - 落库后 current_qty >= 0（由表 CHECK 约束兜底）
    ///
    /// # 返回
    /// - Err(ConcurrentModification): 守卫未命中（批次已被并发修改）
    pub fn update_quantities_in(conn: &Connection, update: &BatchQtyUpdate) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE material_batch
            SET current_qty = ?1, consumed_qty = ?2, reserved_qty = ?3,
                status = ?4, updated_at = ?5
            WHERE batch_id = ?6 AND status = 'ACTIVE' AND ABS(current_qty - ?7) <= 1e-9
            "#,
            params![
                update.current_qty,
                update.consumed_qty,
                update.reserved_qty,
                update.status.to_db_str(),
                fmt_ts(update.updated_at),
                update.batch_id,
                update.expected_current_qty,
            ],
        )?;

        if rows != 1 {
            return Err(RepositoryError::ConcurrentModification {
                entity: "MaterialBatch".to_string(),
                id: update.batch_id.to_string(),
            });
        }
        Ok(())
    }

    /// 状态迁移（from -> to，from 不匹配视为并发冲突）
    pub fn update_status_in(
        conn: &Connection,
        batch_id: &str,
        from: BatchStatus,
        to: BatchStatus,
        lock_reason: Option<&str>,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE material_batch
            SET status = ?1, lock_reason = ?2, updated_at = ?3
            WHERE batch_id = ?4 AND status = ?5
            "#,
            params![
                to.to_db_str(),
                lock_reason,
                fmt_ts(updated_at),
                batch_id,
                from.to_db_str(),
            ],
        )?;

        if rows != 1 {
            return Err(RepositoryError::ConcurrentModification {
                entity: "MaterialBatch".to_string(),
                id: batch_id.to_string(),
            });
        }
        Ok(())
    }

    /// 更新预留数量
    pub fn update_reserved_in(
        conn: &Connection,
        batch_id: &str,
        reserved_qty: f64,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE material_batch SET reserved_qty = ?1, updated_at = ?2 WHERE batch_id = ?3",
            params![reserved_qty, fmt_ts(updated_at), batch_id],
        )?;
        if rows != 1 {
            return Err(RepositoryError::NotFound {
                entity: "MaterialBatch".to_string(),
                id: batch_id.to_string(),
            });
        }
        Ok(())
    }

    /// 已过期仍为 ACTIVE 的批次
    pub fn list_active_expired_before_in(
        conn: &Connection,
        today: NaiveDate,
    ) -> RepositoryResult<Vec<MaterialBatch>> {
        let sql = format!(
            r#"
            SELECT {} FROM material_batch
            WHERE status = 'ACTIVE' AND expire_date IS NOT NULL AND expire_date < ?1
            ORDER BY expire_date, batch_no
            "#,
            BATCH_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![fmt_date(today)], map_batch_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }

    // ==========================================
    // 独立查询
    // ==========================================

    pub fn find_by_id(&self, batch_id: &str) -> RepositoryResult<Option<MaterialBatch>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, batch_id)
    }

    /// 按批次号或条码查询（批次号优先）
    pub fn find_by_key(&self, key: &str) -> RepositoryResult<Option<MaterialBatch>> {
        let conn = self.get_conn()?;
        if let Some(batch) = Self::find_by_batch_no_in(&conn, key)? {
            return Ok(Some(batch));
        }
        Self::find_by_barcode_in(&conn, key)
    }

    pub fn list_by_material(&self, material_id: &str) -> RepositoryResult<Vec<MaterialBatch>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM material_batch WHERE material_id = ?1 ORDER BY created_at, batch_no",
            BATCH_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![material_id], map_batch_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }

    /// 按批次ID集合批量查询（按批次号排序）
    pub fn list_by_ids(&self, batch_ids: &[String]) -> RepositoryResult<Vec<MaterialBatch>> {
        if batch_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM material_batch WHERE {} ORDER BY batch_no",
            BATCH_COLUMNS,
            build_in_clause("batch_id", batch_ids)
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(rusqlite::params_from_iter(batch_ids.iter()), map_batch_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }
}
