// ==========================================
// 物料批次追溯引擎 - 消耗登记
// ==========================================
// 职责: 生成只追加的消耗记录，驱动批次扣减
// 红线: 批次扣减与消耗记录同事务，失败整体回滚
// 红线: 预警刷新在提交后执行，失败只记日志
// ==========================================

use crate::domain::alert::AlertRefresh;
use crate::domain::batch::MaterialBatch;
use crate::domain::consumption::{ConsumptionInput, ConsumptionResult, MaterialConsumption, VarianceOutcome};
use crate::domain::types::ConsumptionType;
use crate::engine::alert::AlertEngine;
use crate::engine::batch_ledger::BatchLedger;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::now_ts;
use crate::engine::numbering::{new_id, next_consumption_no};
use crate::engine::registry::MasterDataProvider;
use crate::perf::PerfGuard;
use crate::repository::{run_in_write_tx, ConsumptionRepository};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

const ENTITY: &str = "MaterialConsumption";

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// 计算差异与损耗标记
///
/// - 有标准用量: variance = qty - standard；rate = variance / standard x 100（保留4位）
/// - |rate| > threshold 记为损耗（等于阈值不算）
/// - WASTE 类型恒为损耗
pub fn compute_variance(
    consumption_qty: f64,
    standard_qty: Option<f64>,
    threshold: f64,
    consumption_type: ConsumptionType,
) -> VarianceOutcome {
    let forced = consumption_type == ConsumptionType::Waste;
    match standard_qty {
        Some(standard) if standard > 0.0 => {
            let variance_qty = round4(consumption_qty - standard);
            let variance_rate = round4((consumption_qty - standard) / standard * 100.0);
            VarianceOutcome {
                variance_qty: Some(variance_qty),
                variance_rate: Some(variance_rate),
                is_waste: forced || variance_rate.abs() > threshold,
            }
        }
        _ => VarianceOutcome {
            variance_qty: None,
            variance_rate: None,
            is_waste: forced,
        },
    }
}

// ==========================================
// ConsumptionRecorder - 消耗登记
// ==========================================
pub struct ConsumptionRecorder {
    conn: Arc<Mutex<Connection>>,
    master_data: Arc<dyn MasterDataProvider>,
    consumption_repo: Arc<ConsumptionRepository>,
    waste_variance_threshold: f64,
    alert_engine: Option<Arc<AlertEngine>>,
}

impl ConsumptionRecorder {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        master_data: Arc<dyn MasterDataProvider>,
        consumption_repo: Arc<ConsumptionRepository>,
        waste_variance_threshold: f64,
    ) -> Self {
        Self {
            conn,
            master_data,
            consumption_repo,
            waste_variance_threshold,
            alert_engine: None,
        }
    }

    /// 挂接预警引擎（提交后刷新）
    pub fn with_alert_engine(mut self, alert_engine: Arc<AlertEngine>) -> Self {
        self.alert_engine = Some(alert_engine);
        self
    }

    /// 登记消耗
    ///
    /// # 流程
    /// 1. 参数校验，查物料（单价缺省取标准单价）
    /// 2. 事务内: 单号查重 -> 解析批次 -> 扣减 -> 写消耗记录
    /// 3. 提交后尽力刷新该物料预警
    ///
    /// # 返回
    /// - Err(Validation): 必填缺失、数量/单价/标准用量非法、批次物料不符
    /// - Err(NotFound): 物料或批次不存在
    /// - Err(InvalidState): 批次非 ACTIVE
    /// - Err(InsufficientStock): 超出批次余量
    /// - Err(DuplicateKey): 消耗单号重复
    #[instrument(skip(self, input), fields(material_id = ?input.material_id))]
    pub fn record_consumption(&self, input: ConsumptionInput) -> EngineResult<ConsumptionResult> {
        let _perf = PerfGuard::new("record_consumption");
        let material_id = input
            .material_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::validation("material_id", "物料ID不能为空"))?
            .to_string();
        let qty = input
            .consumption_qty
            .ok_or_else(|| EngineError::validation("consumption_qty", "消耗数量不能为空"))?;
        if !qty.is_finite() || qty <= 0.0 {
            return Err(EngineError::validation(
                "consumption_qty",
                format!("消耗数量必须大于 0，实际 {}", qty),
            ));
        }
        if let Some(standard) = input.standard_qty {
            if !standard.is_finite() || standard <= 0.0 {
                return Err(EngineError::validation(
                    "standard_qty",
                    format!("标准用量必须大于 0，实际 {}", standard),
                ));
            }
        }
        if let Some(price) = input.unit_price {
            if !price.is_finite() || price < 0.0 {
                return Err(EngineError::validation(
                    "unit_price",
                    format!("单价不能为负，实际 {}", price),
                ));
            }
        }

        // 主数据在事务外读取（仓储自带锁）
        let material = self
            .master_data
            .get_material(&material_id)?
            .ok_or_else(|| EngineError::not_found("Material", &material_id))?;

        let now = now_ts();
        let consumption_type = input.consumption_type.unwrap_or_default();
        let unit_price = input.unit_price.unwrap_or(material.standard_price);
        let variance = compute_variance(qty, input.standard_qty, self.waste_variance_threshold, consumption_type);
        let consumption_no = match input.consumption_no.as_deref().map(str::trim) {
            Some(no) if !no.is_empty() => no.to_string(),
            _ => next_consumption_no(now),
        };

        let mut record = MaterialConsumption {
            consumption_id: new_id(),
            consumption_no,
            material_id: material_id.clone(),
            batch_id: None,
            consumption_qty: qty,
            standard_qty: input.standard_qty,
            variance_qty: variance.variance_qty,
            variance_rate: variance.variance_rate,
            is_waste: variance.is_waste,
            consumption_type,
            project_id: input.project_id,
            work_order_id: input.work_order_id,
            unit_price,
            total_cost: qty * unit_price,
            consumed_at: input.consumed_at.unwrap_or(now),
            operator: input.operator,
            remark: input.remark,
            created_at: now,
        };

        let batch_ref = input.batch;
        let (record, batch) = run_in_write_tx(
            &self.conn,
            |tx| -> EngineResult<(MaterialConsumption, Option<MaterialBatch>)> {
                if ConsumptionRepository::exists_no_in(tx, &record.consumption_no)? {
                    return Err(EngineError::duplicate(ENTITY, "consumption_no", &record.consumption_no));
                }

                let batch = match &batch_ref {
                    Some(r) => {
                        let target = BatchLedger::resolve_for_consumption_in(tx, &material_id, r)?;
                        let updated = BatchLedger::apply_consumption_in(tx, &target, qty, now)?;
                        record.batch_id = Some(updated.batch_id.clone());
                        Some(updated)
                    }
                    None => None,
                };

                ConsumptionRepository::insert_in(tx, &record)?;
                Ok((record, batch))
            },
        )?;

        info!(
            consumption_no = %record.consumption_no,
            batch_id = ?record.batch_id,
            qty = record.consumption_qty,
            is_waste = record.is_waste,
            "消耗已登记"
        );

        // 补录的 consumed_at 可能早于当前，刷新按当日评估
        let alert_refresh = self.refresh_alerts(&material_id, now.date());

        Ok(ConsumptionResult {
            consumption: record,
            batch,
            alert_refresh,
        })
    }

    fn refresh_alerts(&self, material_id: &str, today: chrono::NaiveDate) -> AlertRefresh {
        let Some(engine) = &self.alert_engine else {
            return AlertRefresh::Skipped;
        };
        match engine.evaluate_material(material_id, today) {
            Ok(evaluation) => AlertRefresh::Refreshed {
                changes: evaluation.changes.len(),
            },
            Err(e) => {
                warn!(material_id, error = %e, "消耗后预警刷新失败（已忽略）");
                AlertRefresh::Failed { message: e.to_string() }
            }
        }
    }

    pub fn get_consumption(&self, consumption_no: &str) -> EngineResult<MaterialConsumption> {
        self.consumption_repo
            .find_by_no(consumption_no)?
            .ok_or_else(|| EngineError::not_found(ENTITY, consumption_no))
    }
}
