// ==========================================
// 物料批次追溯引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、值对象
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod alert;
pub mod analytics;
pub mod batch;
pub mod consumption;
pub mod material;
pub mod trace;
pub mod types;

// 重导出核心类型
pub use alert::{
    AlertCandidate, AlertChange, AlertChangeKind, AlertRefresh, EffectiveRule, MaterialAlert,
    MaterialAlertRule, MaterialEvaluation, NewAlertRule, RuleOrigin, RuleScope, RuleThreshold,
};
pub use analytics::{DateWindow, MaterialCostSummary, TurnoverMetrics, WasteAnalysis};
pub use batch::{BatchRef, MaterialBatch, NewBatch, QTY_EPSILON};
pub use consumption::{ConsumptionInput, ConsumptionResult, MaterialConsumption, VarianceOutcome};
pub use material::Material;
pub use trace::{BackwardTrace, BatchGenealogy, GenealogySummary, TraceEntry, TraceTarget};
pub use types::{
    AlertLevel, AlertStatus, AlertType, BatchStatus, ConsumptionType, QualityStatus, ThresholdType,
};
