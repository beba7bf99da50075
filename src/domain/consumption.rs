// ==========================================
// 物料批次追溯引擎 - 消耗台账模型
// ==========================================
// 红线: 消耗记录只追加，不更新、不删除
// ==========================================

use crate::domain::alert::AlertRefresh;
use crate::domain::batch::{BatchRef, MaterialBatch};
use crate::domain::types::ConsumptionType;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// MaterialConsumption - 消耗记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialConsumption {
    pub consumption_id: String,
    pub consumption_no: String, // 消耗单号（唯一）
    pub material_id: String,
    pub batch_id: Option<String>, // None = 未追踪批次

    // ===== 数量与差异 =====
    pub consumption_qty: f64,
    pub standard_qty: Option<f64>,
    pub variance_qty: Option<f64>,
    pub variance_rate: Option<f64>, // 百分比
    pub is_waste: bool,

    // ===== 归属 =====
    pub consumption_type: ConsumptionType,
    pub project_id: Option<String>,
    pub work_order_id: Option<String>,

    // ===== 成本 =====
    pub unit_price: f64,
    pub total_cost: f64,

    // ===== 审计 =====
    pub consumed_at: NaiveDateTime,
    pub operator: Option<String>,
    pub remark: Option<String>,
    pub created_at: NaiveDateTime,
}

impl MaterialConsumption {
    /// 是否关联批次
    pub fn is_tracked(&self) -> bool {
        self.batch_id.is_some()
    }
}

// ==========================================
// ConsumptionInput - 消耗登记输入
// ==========================================
// material_id / consumption_qty 为必填，缺失时返回 ValidationError
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumptionInput {
    pub material_id: Option<String>,
    pub consumption_qty: Option<f64>,
    pub batch: Option<BatchRef>,
    pub standard_qty: Option<f64>,
    pub consumption_type: Option<ConsumptionType>,
    pub project_id: Option<String>,
    pub work_order_id: Option<String>,
    pub unit_price: Option<f64>,
    pub consumption_no: Option<String>,
    pub consumed_at: Option<NaiveDateTime>,
    pub operator: Option<String>,
    pub remark: Option<String>,
}

impl ConsumptionInput {
    /// 快捷构造（必填字段）
    pub fn new(material_id: &str, consumption_qty: f64) -> Self {
        Self {
            material_id: Some(material_id.to_string()),
            consumption_qty: Some(consumption_qty),
            ..Default::default()
        }
    }

    pub fn with_batch_id(mut self, batch_id: &str) -> Self {
        self.batch = Some(BatchRef::Id(batch_id.to_string()));
        self
    }

    pub fn with_barcode(mut self, barcode: &str) -> Self {
        self.batch = Some(BatchRef::Barcode(barcode.to_string()));
        self
    }

    pub fn with_standard_qty(mut self, standard_qty: f64) -> Self {
        self.standard_qty = Some(standard_qty);
        self
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }

    pub fn with_work_order(mut self, work_order_id: &str) -> Self {
        self.work_order_id = Some(work_order_id.to_string());
        self
    }

    pub fn with_type(mut self, consumption_type: ConsumptionType) -> Self {
        self.consumption_type = Some(consumption_type);
        self
    }

    pub fn with_consumption_no(mut self, consumption_no: &str) -> Self {
        self.consumption_no = Some(consumption_no.to_string());
        self
    }

    pub fn with_unit_price(mut self, unit_price: f64) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    pub fn consumed_at(mut self, ts: NaiveDateTime) -> Self {
        self.consumed_at = Some(ts);
        self
    }
}

// ==========================================
// VarianceOutcome - 差异计算结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceOutcome {
    pub variance_qty: Option<f64>,
    pub variance_rate: Option<f64>,
    pub is_waste: bool,
}

// ==========================================
// ConsumptionResult - 消耗登记结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionResult {
    pub consumption: MaterialConsumption,
    /// 扣减后的批次快照（未追踪消耗为 None）
    pub batch: Option<MaterialBatch>,
    /// 预警刷新结果（尽力而为，不影响消耗结果）
    pub alert_refresh: AlertRefresh,
}
