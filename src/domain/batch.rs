// ==========================================
// 物料批次追溯引擎 - 批次领域模型
// ==========================================
// 红线: current_qty + consumed_qty == initial_qty
// 红线: current_qty >= 0, reserved_qty <= current_qty
// 写入方: 仅 BatchLedger / ConsumptionRecorder
// ==========================================

use crate::domain::types::{BatchStatus, QualityStatus};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// 台账数量比较容差
pub const QTY_EPSILON: f64 = 1e-9;

// ==========================================
// MaterialBatch - 物料批次
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialBatch {
    // ===== 主键与标识 =====
    pub batch_id: String,
    pub batch_no: String,        // 批次号（唯一）
    pub barcode: Option<String>, // 条码（唯一，可空）
    pub material_id: String,

    // ===== 数量台账 =====
    pub initial_qty: f64,
    pub current_qty: f64,
    pub consumed_qty: f64,
    pub reserved_qty: f64,

    // ===== 状态 =====
    pub quality_status: QualityStatus,
    pub status: BatchStatus,
    pub lock_reason: Option<String>,

    // ===== 日期 =====
    pub production_date: Option<NaiveDate>,
    pub expire_date: Option<NaiveDate>,
    pub supplier_name: Option<String>,

    // ===== 审计字段 =====
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl MaterialBatch {
    /// 台账守恒检查
    pub fn is_balanced(&self) -> bool {
        (self.current_qty + self.consumed_qty - self.initial_qty).abs() <= QTY_EPSILON
            && self.current_qty >= 0.0
            && self.reserved_qty <= self.current_qty + QTY_EPSILON
    }

    /// 是否已过期（按日期，不看状态）
    pub fn is_past_expiry(&self, today: NaiveDate) -> bool {
        matches!(self.expire_date, Some(d) if d < today)
    }

    /// 可用数量（扣除预留后，仅供展示）
    pub fn available_qty(&self) -> f64 {
        (self.current_qty - self.reserved_qty).max(0.0)
    }
}

// ==========================================
// NewBatch - 入库建批参数
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBatch {
    pub batch_no: String,
    pub barcode: Option<String>,
    pub material_id: String,
    pub initial_qty: f64,
    pub quality_status: Option<QualityStatus>,
    pub production_date: Option<NaiveDate>,
    pub expire_date: Option<NaiveDate>,
    pub supplier_name: Option<String>,
}

// ==========================================
// BatchRef - 消耗时的批次引用
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchRef {
    Id(String),
    Barcode(String),
}

impl BatchRef {
    pub fn as_str(&self) -> &str {
        match self {
            BatchRef::Id(v) | BatchRef::Barcode(v) => v.as_str(),
        }
    }
}
