// ==========================================
// 物料批次追溯引擎 - 分析结果模型
// ==========================================

use crate::domain::trace::TraceEntry;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

// ==========================================
// DateWindow - 日期窗口（含首尾）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// 以 as_of 结尾的 days 天窗口
    ///
    /// days=30, as_of=2026-01-30 -> [2026-01-01, 2026-01-30]
    pub fn ending_on(as_of: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: as_of - Duration::days(span),
            end: as_of,
        }
    }

    /// 左闭右开的时间戳区间 [start 00:00, end+1 00:00)
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        (
            self.start.and_time(NaiveTime::MIN),
            (self.end + Duration::days(1)).and_time(NaiveTime::MIN),
        )
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// 周转指标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnoverMetrics {
    pub window_days: u32,
    pub consumed_qty: f64,
    pub average_stock: f64,
    pub turnover_rate: f64,
    pub turnover_days: f64,
}

/// 单物料成本汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialCostSummary {
    pub material_id: String,
    pub material_code: Option<String>,
    pub material_name: Option<String>,
    pub total_qty: f64,
    pub total_cost: f64,
    pub record_count: i64,
}

/// 损耗分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteAnalysis {
    pub window: DateWindow,
    pub min_variance_rate: f64,
    pub entries: Vec<TraceEntry>,
    pub total_waste_qty: f64,
    pub total_waste_cost: f64,
}
