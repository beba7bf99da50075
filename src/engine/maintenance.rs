// ==========================================
// 物料批次追溯引擎 - 维护任务
// ==========================================
// 职责: 全量预警重算 + 过期扫描
// 说明: 由外部调度器显式调用，引擎内不起后台线程
// ==========================================

use crate::engine::alert::AlertEngine;
use crate::engine::batch_ledger::BatchLedger;
use crate::engine::error::EngineResult;
use crate::perf::PerfGuard;
use crate::repository::MaterialRepository;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// 维护任务汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceSummary {
    pub today: Option<NaiveDate>,
    pub expired_batches: usize,
    pub materials_evaluated: usize,
    pub alert_changes: usize,
    /// 单物料评估失败不中断整体，记录 (material_id, 错误信息)
    pub failures: Vec<(String, String)>,
}

pub struct MaintenanceRunner {
    ledger: Arc<BatchLedger>,
    alert_engine: Arc<AlertEngine>,
    material_repo: Arc<MaterialRepository>,
}

impl MaintenanceRunner {
    pub fn new(
        ledger: Arc<BatchLedger>,
        alert_engine: Arc<AlertEngine>,
        material_repo: Arc<MaterialRepository>,
    ) -> Self {
        Self {
            ledger,
            alert_engine,
            material_repo,
        }
    }

    /// 先逐物料重算预警，再做过期扫描
    ///
    /// 过期预警只看 ACTIVE 批次，须在过期扫描之前评估
    pub fn run(&self, today: NaiveDate) -> EngineResult<MaintenanceSummary> {
        let _perf = PerfGuard::new("maintenance_run");

        let mut summary = MaintenanceSummary {
            today: Some(today),
            ..Default::default()
        };

        for material_id in self.material_repo.list_material_ids()? {
            match self.alert_engine.evaluate_material(&material_id, today) {
                Ok(evaluation) => {
                    summary.materials_evaluated += 1;
                    summary.alert_changes += evaluation.changes.len();
                }
                Err(e) => {
                    warn!(material_id = %material_id, error = %e, "物料预警重算失败");
                    summary.failures.push((material_id, e.to_string()));
                }
            }
        }

        summary.expired_batches = self.ledger.expire_due_batches(today)?.len();

        info!(
            expired_batches = summary.expired_batches,
            materials_evaluated = summary.materials_evaluated,
            alert_changes = summary.alert_changes,
            failures = summary.failures.len(),
            "维护任务完成"
        );
        Ok(summary)
    }
}
