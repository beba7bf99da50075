// ==========================================
// 物料批次追溯引擎 - 消耗分析引擎
// ==========================================
// 职责: 日均消耗、周转、成本与损耗聚合
// 口径: 统计窗口为以 as_of 结束的自然日闭区间
// ==========================================

use crate::domain::analytics::{DateWindow, MaterialCostSummary, TurnoverMetrics, WasteAnalysis};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::registry::MasterDataProvider;
use crate::engine::traceability::LabelCache;
use crate::repository::{ConsumptionRepository, ConsumptionTotals};
use chrono::NaiveDate;
use std::sync::Arc;

// ==========================================
// AnalyticsEngine - 消耗分析
// ==========================================
pub struct AnalyticsEngine {
    consumption_repo: Arc<ConsumptionRepository>,
    master_data: Arc<dyn MasterDataProvider>,
}

impl AnalyticsEngine {
    pub fn new(
        consumption_repo: Arc<ConsumptionRepository>,
        master_data: Arc<dyn MasterDataProvider>,
    ) -> Self {
        Self {
            consumption_repo,
            master_data,
        }
    }

    fn window_totals(
        &self,
        material_id: &str,
        window_days: u32,
        as_of: NaiveDate,
    ) -> EngineResult<ConsumptionTotals> {
        if window_days == 0 {
            return Err(EngineError::validation("window_days", "统计窗口必须大于 0 天"));
        }
        let (start, end) = DateWindow::ending_on(as_of, window_days).bounds();
        Ok(self
            .consumption_repo
            .totals_for_material(material_id, start, end)?)
    }

    /// 日均消耗 = 窗口内消耗总量 / 窗口天数
    pub fn avg_daily_consumption(
        &self,
        material_id: &str,
        window_days: u32,
        as_of: NaiveDate,
    ) -> EngineResult<f64> {
        let totals = self.window_totals(material_id, window_days, as_of)?;
        Ok(totals.total_qty / f64::from(window_days))
    }

    /// 周转率 = 窗口内消耗总量 / 平均库存（以当前库存近似）
    ///
    /// 平均库存 <= 0 时周转率记 0；周转率为 0 时周转天数记 0
    pub fn turnover_rate(
        &self,
        material_id: &str,
        window_days: u32,
        as_of: NaiveDate,
    ) -> EngineResult<TurnoverMetrics> {
        let material = self
            .master_data
            .get_material(material_id)?
            .ok_or_else(|| EngineError::not_found("Material", material_id))?;
        let totals = self.window_totals(material_id, window_days, as_of)?;

        let average_stock = material.current_stock;
        let turnover_rate = if average_stock > 0.0 {
            totals.total_qty / average_stock
        } else {
            0.0
        };
        let turnover_days = if turnover_rate > 0.0 {
            f64::from(window_days) / turnover_rate
        } else {
            0.0
        };

        Ok(TurnoverMetrics {
            window_days,
            consumed_qty: totals.total_qty,
            average_stock,
            turnover_rate,
            turnover_days,
        })
    }

    /// 损耗占比（%）= 损耗量 / 总消耗量 x 100；无消耗记 0
    pub fn waste_ratio(&self, material_id: &str, window_days: u32, as_of: NaiveDate) -> EngineResult<f64> {
        let totals = self.window_totals(material_id, window_days, as_of)?;
        if totals.total_qty <= 0.0 {
            return Ok(0.0);
        }
        Ok(totals.waste_qty / totals.total_qty * 100.0)
    }

    /// 按物料成本排名
    pub fn cost_analysis(&self, window: DateWindow, top_n: usize) -> EngineResult<Vec<MaterialCostSummary>> {
        validate_window(&window)?;
        if top_n == 0 {
            return Ok(Vec::new());
        }
        let (start, end) = window.bounds();
        Ok(self.consumption_repo.cost_by_material(start, end, top_n)?)
    }

    /// 损耗明细（is_waste 或 variance_rate >= min_variance_rate），附项目/工单名称
    pub fn waste_analysis(&self, window: DateWindow, min_variance_rate: f64) -> EngineResult<WasteAnalysis> {
        validate_window(&window)?;
        if !min_variance_rate.is_finite() {
            return Err(EngineError::validation("min_variance_rate", "必须为有限数值"));
        }
        let (start, end) = window.bounds();
        let records = self.consumption_repo.list_waste(start, end, min_variance_rate)?;

        let total_waste_qty = records.iter().map(|c| c.consumption_qty).sum();
        let total_waste_cost = records.iter().map(|c| c.total_cost).sum();

        let mut labels = LabelCache::new(self.master_data.as_ref());
        let entries = labels.enrich_all(records)?;

        Ok(WasteAnalysis {
            window,
            min_variance_rate,
            entries,
            total_waste_qty,
            total_waste_cost,
        })
    }
}

fn validate_window(window: &DateWindow) -> EngineResult<()> {
    if window.end < window.start {
        return Err(EngineError::validation(
            "window",
            format!("结束日期 {} 早于开始日期 {}", window.end, window.start),
        ));
    }
    Ok(())
}
