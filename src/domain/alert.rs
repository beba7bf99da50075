// ==========================================
// 物料批次追溯引擎 - 预警与预警规则模型
// ==========================================
// 红线: 同一 (material_id, alert_type) 至多一条 ACTIVE 预警
// ==========================================

use crate::domain::types::{AlertLevel, AlertStatus, AlertType, ThresholdType};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// MaterialAlert - 物料预警
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialAlert {
    pub alert_id: String,
    pub alert_no: String,
    pub material_id: String,
    pub alert_type: AlertType,
    pub alert_level: AlertLevel,
    pub status: AlertStatus,

    // ===== 触发快照 =====
    pub current_stock: f64,
    pub safety_stock: Option<f64>,
    pub shortage_qty: Option<f64>,
    pub avg_daily_consumption: Option<f64>,
    pub days_to_stockout: Option<f64>,
    pub trigger_value: Option<f64>,   // 触发时的实际指标值
    pub threshold_value: Option<f64>, // 生效规则阈值
    pub rule_id: Option<String>,      // None = 默认规则
    pub message: String,
    pub trigger_count: i64,

    // ===== 处理信息 =====
    pub resolved_by: Option<String>,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolution_note: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// MaterialAlertRule - 预警规则
// ==========================================
// 作用域: material_id 非空 = 物料级; category_id 非空 = 分类级; 均为空 = 全局
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialAlertRule {
    pub rule_id: String,
    pub material_id: Option<String>,
    pub category_id: Option<String>,
    pub alert_type: AlertType,
    pub threshold_type: ThresholdType,
    pub threshold_value: f64,
    pub safety_days: f64,
    pub lead_time_days: f64,
    pub buffer_ratio: f64,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl MaterialAlertRule {
    /// 规则作用域
    pub fn scope(&self) -> RuleScope {
        if self.material_id.is_some() {
            RuleScope::Material
        } else if self.category_id.is_some() {
            RuleScope::Category
        } else {
            RuleScope::Global
        }
    }
}

// ==========================================
// RuleScope - 规则作用域
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleScope {
    Material,
    Category,
    Global,
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::Material => write!(f, "MATERIAL"),
            RuleScope::Category => write!(f, "CATEGORY"),
            RuleScope::Global => write!(f, "GLOBAL"),
        }
    }
}

// ==========================================
// RuleThreshold - 阈值配置（默认规则与生效规则共用）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleThreshold {
    pub threshold_type: ThresholdType,
    pub threshold_value: f64,
    pub safety_days: f64,
    pub lead_time_days: f64,
    pub buffer_ratio: f64,
}

impl From<&MaterialAlertRule> for RuleThreshold {
    fn from(rule: &MaterialAlertRule) -> Self {
        Self {
            threshold_type: rule.threshold_type,
            threshold_value: rule.threshold_value,
            safety_days: rule.safety_days,
            lead_time_days: rule.lead_time_days,
            buffer_ratio: rule.buffer_ratio,
        }
    }
}

// ==========================================
// EffectiveRule - 合并后的生效规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveRule {
    pub alert_type: AlertType,
    pub threshold: RuleThreshold,
    pub origin: RuleOrigin,
}

impl EffectiveRule {
    pub fn rule_id(&self) -> Option<&str> {
        match &self.origin {
            RuleOrigin::Configured { rule_id, .. } => Some(rule_id.as_str()),
            RuleOrigin::Default => None,
        }
    }
}

/// 生效规则来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleOrigin {
    Configured { rule_id: String, scope: RuleScope },
    Default,
}

// ==========================================
// NewAlertRule - 新建规则参数
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub material_id: Option<String>,
    pub category_id: Option<String>,
    pub alert_type: AlertType,
    pub threshold_type: ThresholdType,
    pub threshold_value: f64,
    pub safety_days: f64,
    pub lead_time_days: f64,
    pub buffer_ratio: f64,
    pub priority: i32,
}

// ==========================================
// AlertCandidate - 单项评估命中结果（尚未落库）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub alert_type: AlertType,
    pub alert_level: AlertLevel,
    pub shortage_qty: Option<f64>,
    pub trigger_value: Option<f64>,
    pub threshold_value: Option<f64>,
    pub rule_id: Option<String>,
    pub message: String,
}

// ==========================================
// AlertChange - 评估落库动作
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertChangeKind {
    Created,
    Updated,
    AutoResolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertChange {
    pub kind: AlertChangeKind,
    pub alert: MaterialAlert,
    /// 更新时是否升级了级别
    pub escalated: bool,
}

// ==========================================
// MaterialEvaluation - 单物料评估结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialEvaluation {
    pub material_id: String,
    pub current_stock: f64,
    pub safety_stock: Option<f64>,
    pub avg_daily_consumption: f64,
    pub days_to_stockout: Option<f64>,
    pub changes: Vec<AlertChange>,
}

// ==========================================
// AlertRefresh - 消耗后预警刷新状态
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertRefresh {
    Skipped,
    Refreshed { changes: usize },
    Failed { message: String },
}
