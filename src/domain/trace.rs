// ==========================================
// 物料批次追溯引擎 - 追溯视图模型
// ==========================================
// 正向: 批次 -> 消耗 -> 项目/工单
// 反向: 项目/工单 -> 消耗 -> 批次
// ==========================================

use crate::domain::batch::MaterialBatch;
use crate::domain::consumption::MaterialConsumption;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 带项目/工单名称的消耗记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub consumption: MaterialConsumption,
    pub project_label: Option<String>,
    pub work_order_label: Option<String>,
}

/// 反向追溯目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceTarget {
    Project(String),
    WorkOrder(String),
}

/// 反向追溯结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackwardTrace {
    pub target: TraceTarget,
    pub entries: Vec<TraceEntry>,
    /// 去重后的批次ID（升序）
    pub batch_ids: Vec<String>,
}

/// 追溯汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenealogySummary {
    pub material_code: Option<String>,
    pub material_name: Option<String>,
    pub record_count: usize,
    pub total_consumed: f64,
    pub distinct_projects: usize,
    pub distinct_work_orders: usize,
    pub first_consumed_at: Option<NaiveDateTime>,
    pub last_consumed_at: Option<NaiveDateTime>,
}

/// 批次全链路追溯包
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchGenealogy {
    pub batch: MaterialBatch,
    pub trail: Vec<TraceEntry>,
    pub summary: GenealogySummary,
}
