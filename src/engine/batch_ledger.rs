// ==========================================
// 物料批次追溯引擎 - 批次台账引擎
// ==========================================
// 职责: 批次生命周期与数量变更
// 红线: initial_qty == current_qty + consumed_qty
// 红线: current_qty >= 0，reserved_qty <= current_qty
// ==========================================
// 状态机:
//   ACTIVE -> DEPLETED (终态，数量归零)
//   ACTIVE -> EXPIRED  (终态，按到期日)
//   ACTIVE <-> LOCKED  (锁定期间禁止消耗)
// ==========================================

use crate::domain::batch::{BatchRef, MaterialBatch, NewBatch, QTY_EPSILON};
use crate::domain::types::{BatchStatus, QualityStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::numbering::new_id;
use crate::engine::registry::MasterDataProvider;
use crate::engine::now_ts;
use crate::repository::{run_in_write_tx, BatchQtyUpdate, BatchRepository};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument};

const ENTITY: &str = "MaterialBatch";

// ==========================================
// BatchLedger - 批次台账
// ==========================================
pub struct BatchLedger {
    conn: Arc<Mutex<Connection>>,
    batch_repo: Arc<BatchRepository>,
    master_data: Arc<dyn MasterDataProvider>,
}

impl BatchLedger {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        batch_repo: Arc<BatchRepository>,
        master_data: Arc<dyn MasterDataProvider>,
    ) -> Self {
        Self {
            conn,
            batch_repo,
            master_data,
        }
    }

    // ==========================================
    // 入库
    // ==========================================

    /// 创建批次
    ///
    /// # 校验
    /// - batch_no 非空，initial_qty > 0
    /// - expire_date >= production_date（两者均有时）
    /// - 物料存在
    /// - batch_no / barcode 唯一
    #[instrument(skip(self, spec), fields(batch_no = %spec.batch_no))]
    pub fn create_batch(&self, spec: NewBatch) -> EngineResult<MaterialBatch> {
        let batch_no = spec.batch_no.trim().to_string();
        if batch_no.is_empty() {
            return Err(EngineError::validation("batch_no", "批次号不能为空"));
        }
        if !spec.initial_qty.is_finite() || spec.initial_qty <= 0.0 {
            return Err(EngineError::validation(
                "initial_qty",
                format!("入库数量必须大于 0，实际 {}", spec.initial_qty),
            ));
        }
        if let (Some(produced), Some(expires)) = (spec.production_date, spec.expire_date) {
            if expires < produced {
                return Err(EngineError::validation(
                    "expire_date",
                    format!("到期日 {} 早于生产日期 {}", expires, produced),
                ));
            }
        }
        let barcode = spec
            .barcode
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if self.master_data.get_material(&spec.material_id)?.is_none() {
            return Err(EngineError::not_found("Material", &spec.material_id));
        }

        let now = now_ts();
        let batch = MaterialBatch {
            batch_id: new_id(),
            batch_no,
            barcode,
            material_id: spec.material_id,
            initial_qty: spec.initial_qty,
            current_qty: spec.initial_qty,
            consumed_qty: 0.0,
            reserved_qty: 0.0,
            quality_status: spec.quality_status.unwrap_or(QualityStatus::Qualified),
            status: BatchStatus::Active,
            lock_reason: None,
            production_date: spec.production_date,
            expire_date: spec.expire_date,
            supplier_name: spec.supplier_name,
            created_at: now,
            updated_at: now,
        };

        run_in_write_tx(&self.conn, |tx| -> EngineResult<()> {
            if BatchRepository::find_by_batch_no_in(tx, &batch.batch_no)?.is_some() {
                return Err(EngineError::duplicate(ENTITY, "batch_no", &batch.batch_no));
            }
            if let Some(code) = batch.barcode.as_deref() {
                if BatchRepository::find_by_barcode_in(tx, code)?.is_some() {
                    return Err(EngineError::duplicate(ENTITY, "barcode", code));
                }
            }
            BatchRepository::insert_in(tx, &batch)?;
            Ok(())
        })?;

        info!(
            batch_id = %batch.batch_id,
            material_id = %batch.material_id,
            initial_qty = batch.initial_qty,
            "批次已入库"
        );
        Ok(batch)
    }

    // ==========================================
    // 消耗扣减（在调用方事务内执行）
    // ==========================================

    /// 解析消耗目标批次
    ///
    /// # 返回
    /// - Err(NotFound): 批次不存在
    /// - Err(Validation): 批次不属于该物料
    /// - Err(InvalidState): 批次非 ACTIVE
    pub fn resolve_for_consumption_in(
        conn: &Connection,
        material_id: &str,
        batch_ref: &BatchRef,
    ) -> EngineResult<MaterialBatch> {
        let found = match batch_ref {
            BatchRef::Id(id) => BatchRepository::find_by_id_in(conn, id)?,
            BatchRef::Barcode(code) => BatchRepository::find_by_barcode_in(conn, code)?,
        };
        let batch = found.ok_or_else(|| EngineError::not_found(ENTITY, batch_ref.as_str()))?;

        if batch.material_id != material_id {
            return Err(EngineError::validation(
                "batch",
                format!(
                    "批次 {} 属于物料 {}，与消耗物料 {} 不符",
                    batch.batch_no, batch.material_id, material_id
                ),
            ));
        }
        if batch.status != BatchStatus::Active {
            return Err(EngineError::invalid_state(ENTITY, &batch.batch_no, batch.status, "consume"));
        }
        Ok(batch)
    }

    /// 扣减批次数量
    ///
    /// # 规则
    /// - 0 < qty <= current_qty，否则 InsufficientStock（不做部分扣减）
    /// - current_qty 归零时置 DEPLETED
    /// - reserved_qty 截断到新的 current_qty
    pub fn apply_consumption_in(
        conn: &Connection,
        batch: &MaterialBatch,
        qty: f64,
        at: NaiveDateTime,
    ) -> EngineResult<MaterialBatch> {
        if !qty.is_finite() || qty <= 0.0 {
            return Err(EngineError::validation(
                "consumption_qty",
                format!("消耗数量必须大于 0，实际 {}", qty),
            ));
        }
        if qty > batch.current_qty + QTY_EPSILON {
            return Err(EngineError::InsufficientStock {
                batch_no: batch.batch_no.clone(),
                requested: qty,
                available: batch.current_qty,
            });
        }

        let mut updated = batch.clone();
        let remaining = batch.current_qty - qty;
        if remaining <= QTY_EPSILON {
            updated.current_qty = 0.0;
            updated.consumed_qty = batch.initial_qty;
            updated.status = BatchStatus::Depleted;
        } else {
            updated.current_qty = remaining;
            updated.consumed_qty = batch.consumed_qty + qty;
        }
        updated.reserved_qty = batch.reserved_qty.min(updated.current_qty);
        updated.updated_at = at;

        BatchRepository::update_quantities_in(
            conn,
            &BatchQtyUpdate {
                batch_id: &updated.batch_id,
                expected_current_qty: batch.current_qty,
                current_qty: updated.current_qty,
                consumed_qty: updated.consumed_qty,
                reserved_qty: updated.reserved_qty,
                status: updated.status,
                updated_at: at,
            },
        )?;

        if updated.status == BatchStatus::Depleted {
            info!(batch_id = %updated.batch_id, batch_no = %updated.batch_no, "批次已耗尽");
        }
        Ok(updated)
    }

    // ==========================================
    // 管理操作
    // ==========================================

    /// 标记过期（仅 ACTIVE）
    pub fn mark_expired(&self, batch_id: &str) -> EngineResult<MaterialBatch> {
        self.transition(batch_id, "expire", BatchStatus::Active, BatchStatus::Expired, None)
    }

    /// 锁定（ACTIVE -> LOCKED）
    pub fn lock(&self, batch_id: &str, reason: Option<&str>) -> EngineResult<MaterialBatch> {
        self.transition(batch_id, "lock", BatchStatus::Active, BatchStatus::Locked, reason)
    }

    /// 解锁（LOCKED -> ACTIVE）
    pub fn unlock(&self, batch_id: &str) -> EngineResult<MaterialBatch> {
        self.transition(batch_id, "unlock", BatchStatus::Locked, BatchStatus::Active, None)
    }

    fn transition(
        &self,
        batch_id: &str,
        action: &str,
        from: BatchStatus,
        to: BatchStatus,
        reason: Option<&str>,
    ) -> EngineResult<MaterialBatch> {
        let now = now_ts();
        let batch = run_in_write_tx(&self.conn, |tx| -> EngineResult<MaterialBatch> {
            let mut batch = BatchRepository::find_by_id_in(tx, batch_id)?
                .ok_or_else(|| EngineError::not_found(ENTITY, batch_id))?;
            if batch.status != from {
                return Err(EngineError::invalid_state(ENTITY, batch_id, batch.status, action));
            }
            BatchRepository::update_status_in(tx, batch_id, from, to, reason, now)?;
            batch.status = to;
            batch.lock_reason = reason.map(str::to_string);
            batch.updated_at = now;
            Ok(batch)
        })?;

        info!(batch_id = %batch_id, action, from = %from, to = %to, "批次状态变更");
        Ok(batch)
    }

    /// 设置预留数量（仅记录，不阻断消耗）
    pub fn set_reserved(&self, batch_id: &str, qty: f64) -> EngineResult<MaterialBatch> {
        let now = now_ts();
        run_in_write_tx(&self.conn, |tx| -> EngineResult<MaterialBatch> {
            let mut batch = BatchRepository::find_by_id_in(tx, batch_id)?
                .ok_or_else(|| EngineError::not_found(ENTITY, batch_id))?;
            if !qty.is_finite() || qty < 0.0 || qty > batch.current_qty + QTY_EPSILON {
                return Err(EngineError::validation(
                    "reserved_qty",
                    format!("预留数量须在 [0, {}] 内，实际 {}", batch.current_qty, qty),
                ));
            }
            let qty = qty.min(batch.current_qty);
            BatchRepository::update_reserved_in(tx, batch_id, qty, now)?;
            batch.reserved_qty = qty;
            batch.updated_at = now;
            Ok(batch)
        })
    }

    /// 将到期日早于 today 的 ACTIVE 批次全部置为 EXPIRED
    pub fn expire_due_batches(&self, today: NaiveDate) -> EngineResult<Vec<MaterialBatch>> {
        let now = now_ts();
        let expired = run_in_write_tx(&self.conn, |tx| -> EngineResult<Vec<MaterialBatch>> {
            let mut due = BatchRepository::list_active_expired_before_in(tx, today)?;
            for batch in due.iter_mut() {
                BatchRepository::update_status_in(
                    tx,
                    &batch.batch_id,
                    BatchStatus::Active,
                    BatchStatus::Expired,
                    None,
                    now,
                )?;
                batch.status = BatchStatus::Expired;
                batch.updated_at = now;
            }
            Ok(due)
        })?;

        if !expired.is_empty() {
            info!(count = expired.len(), %today, "批次过期扫描完成");
        }
        Ok(expired)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_batch(&self, batch_id: &str) -> EngineResult<MaterialBatch> {
        self.batch_repo
            .find_by_id(batch_id)?
            .ok_or_else(|| EngineError::not_found(ENTITY, batch_id))
    }

    /// 按批次号或条码查询
    pub fn find_by_key(&self, key: &str) -> EngineResult<MaterialBatch> {
        self.batch_repo
            .find_by_key(key)?
            .ok_or_else(|| EngineError::not_found(ENTITY, key))
    }

    pub fn list_by_material(&self, material_id: &str) -> EngineResult<Vec<MaterialBatch>> {
        Ok(self.batch_repo.list_by_material(material_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_connection;
    use crate::domain::material::Material;
    use crate::engine::error::ErrorKind;
    use crate::repository::MaterialRepository;

    fn setup() -> (Arc<Mutex<Connection>>, BatchLedger) {
        let conn = Arc::new(Mutex::new(open_memory_connection().unwrap()));
        let materials = Arc::new(MaterialRepository::new(conn.clone()));
        materials
            .upsert_materials(&[
                Material::new("M1", "STEEL-01", "钢板", "t"),
                Material::new("M2", "WIRE-01", "焊丝", "kg"),
            ])
            .unwrap();
        let ledger = BatchLedger::new(
            conn.clone(),
            Arc::new(BatchRepository::new(conn.clone())),
            materials,
        );
        (conn, ledger)
    }

    fn new_batch(no: &str, qty: f64) -> NewBatch {
        NewBatch {
            batch_no: no.to_string(),
            material_id: "M1".to_string(),
            initial_qty: qty,
            ..Default::default()
        }
    }

    fn consume(conn: &Arc<Mutex<Connection>>, batch: &MaterialBatch, qty: f64) -> EngineResult<MaterialBatch> {
        run_in_write_tx(conn, |tx| {
            BatchLedger::apply_consumption_in(tx, batch, qty, now_ts())
        })
    }

    #[test]
    fn test_create_batch_initial_state() {
        let (_conn, ledger) = setup();
        let batch = ledger.create_batch(new_batch("B1", 1000.0)).unwrap();
        assert_eq!(batch.current_qty, 1000.0);
        assert_eq!(batch.consumed_qty, 0.0);
        assert_eq!(batch.status, BatchStatus::Active);
        assert!(batch.is_balanced());
        assert_eq!(ledger.get_batch(&batch.batch_id).unwrap(), batch);
    }

    #[test]
    fn test_create_batch_rejects_duplicates() {
        let (_conn, ledger) = setup();
        let mut spec = new_batch("B1", 10.0);
        spec.barcode = Some("BC-1".to_string());
        ledger.create_batch(spec).unwrap();

        let err = ledger.create_batch(new_batch("B1", 5.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);

        let mut spec = new_batch("B2", 5.0);
        spec.barcode = Some("BC-1".to_string());
        let err = ledger.create_batch(spec).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { ref field, .. } if field == "barcode"));
    }

    #[test]
    fn test_create_batch_validation() {
        let (_conn, ledger) = setup();
        assert_eq!(
            ledger.create_batch(new_batch("B1", 0.0)).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ledger.create_batch(new_batch("  ", 1.0)).unwrap_err().kind(),
            ErrorKind::Validation
        );

        let mut spec = new_batch("B1", 1.0);
        spec.production_date = NaiveDate::from_ymd_opt(2026, 5, 1);
        spec.expire_date = NaiveDate::from_ymd_opt(2026, 4, 1);
        assert_eq!(ledger.create_batch(spec).unwrap_err().kind(), ErrorKind::Validation);

        let mut spec = new_batch("B1", 1.0);
        spec.material_id = "NOPE".to_string();
        assert_eq!(ledger.create_batch(spec).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_consume_to_depletion() {
        let (conn, ledger) = setup();
        let batch = ledger.create_batch(new_batch("B1", 1000.0)).unwrap();

        let after = consume(&conn, &batch, 400.0).unwrap();
        assert_eq!(after.current_qty, 600.0);
        assert_eq!(after.consumed_qty, 400.0);
        assert_eq!(after.status, BatchStatus::Active);

        let after = consume(&conn, &after, 600.0).unwrap();
        assert_eq!(after.current_qty, 0.0);
        assert_eq!(after.status, BatchStatus::Depleted);
        assert!(after.is_balanced());
        assert_eq!(ledger.get_batch(&batch.batch_id).unwrap().status, BatchStatus::Depleted);
    }

    #[test]
    fn test_over_consumption_leaves_batch_unchanged() {
        let (conn, ledger) = setup();
        let batch = ledger.create_batch(new_batch("B1", 100.0)).unwrap();

        let err = consume(&conn, &batch, 100.5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(ledger.get_batch(&batch.batch_id).unwrap(), batch);
    }

    #[test]
    fn test_reserved_is_clamped_on_consumption() {
        let (conn, ledger) = setup();
        let batch = ledger.create_batch(new_batch("B1", 100.0)).unwrap();
        let batch = ledger.set_reserved(&batch.batch_id, 80.0).unwrap();

        let after = consume(&conn, &batch, 50.0).unwrap();
        assert_eq!(after.reserved_qty, 50.0);
        assert!(after.is_balanced());
    }

    #[test]
    fn test_set_reserved_out_of_range() {
        let (_conn, ledger) = setup();
        let batch = ledger.create_batch(new_batch("B1", 100.0)).unwrap();
        assert_eq!(
            ledger.set_reserved(&batch.batch_id, 101.0).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ledger.set_reserved(&batch.batch_id, -1.0).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_resolve_for_consumption_checks() {
        let (conn, ledger) = setup();
        let mut spec = new_batch("B1", 10.0);
        spec.barcode = Some("BC-1".to_string());
        let batch = ledger.create_batch(spec).unwrap();
        let c = conn.lock().unwrap();

        let found =
            BatchLedger::resolve_for_consumption_in(&c, "M1", &BatchRef::Barcode("BC-1".to_string())).unwrap();
        assert_eq!(found.batch_id, batch.batch_id);

        let err = BatchLedger::resolve_for_consumption_in(&c, "M2", &BatchRef::Id(batch.batch_id.clone()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = BatchLedger::resolve_for_consumption_in(&c, "M1", &BatchRef::Id("missing".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_lock_blocks_consumption_until_unlock() {
        let (conn, ledger) = setup();
        let batch = ledger.create_batch(new_batch("B1", 10.0)).unwrap();
        let locked = ledger.lock(&batch.batch_id, Some("质检复核")).unwrap();
        assert_eq!(locked.status, BatchStatus::Locked);

        {
            let c = conn.lock().unwrap();
            let err = BatchLedger::resolve_for_consumption_in(&c, "M1", &BatchRef::Id(batch.batch_id.clone()))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        }

        // 锁定状态不能再次锁定或过期
        assert_eq!(ledger.lock(&batch.batch_id, None).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(ledger.mark_expired(&batch.batch_id).unwrap_err().kind(), ErrorKind::InvalidState);

        let unlocked = ledger.unlock(&batch.batch_id).unwrap();
        assert_eq!(unlocked.status, BatchStatus::Active);
        assert!(unlocked.lock_reason.is_none());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let (_conn, ledger) = setup();
        let batch = ledger.create_batch(new_batch("B1", 10.0)).unwrap();
        ledger.mark_expired(&batch.batch_id).unwrap();

        assert_eq!(ledger.unlock(&batch.batch_id).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(ledger.lock(&batch.batch_id, None).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(ledger.mark_expired("missing").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_expire_due_batches() {
        let (_conn, ledger) = setup();
        let mut early = new_batch("B1", 10.0);
        early.expire_date = NaiveDate::from_ymd_opt(2026, 1, 10);
        let early = ledger.create_batch(early).unwrap();
        let mut later = new_batch("B2", 10.0);
        later.expire_date = NaiveDate::from_ymd_opt(2026, 12, 31);
        ledger.create_batch(later).unwrap();

        let expired = ledger
            .expire_due_batches(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap())
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].batch_id, early.batch_id);
        assert_eq!(ledger.find_by_key("B1").unwrap().status, BatchStatus::Expired);
        assert_eq!(ledger.find_by_key("B2").unwrap().status, BatchStatus::Active);
        assert_eq!(ledger.list_by_material("M1").unwrap().len(), 2);
    }
}
