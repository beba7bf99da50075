// ==========================================
// 物料批次追溯引擎 - 引擎层
// ==========================================
// 职责: 批次台账、消耗登记、规则解析、预警、追溯与分析
// 红线: Engine 不直接拼业务外 SQL，数据访问走 Repository
// ==========================================

pub mod alert;
pub mod analytics;
pub mod batch_ledger;
pub mod consumption;
pub mod error;
pub mod maintenance;
pub mod numbering;
pub mod registry;
pub mod repositories;
pub mod rule_resolver;
pub mod traceability;

use chrono::{NaiveDateTime, SubsecRound, Utc};

// 重导出核心引擎
pub use alert::{AlertEngine, AlertNotifier, NoOpAlertNotifier, StockSnapshot, SYSTEM_ACTOR};
pub use analytics::AnalyticsEngine;
pub use batch_ledger::BatchLedger;
pub use consumption::{compute_variance, ConsumptionRecorder};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use maintenance::{MaintenanceRunner, MaintenanceSummary};
pub use registry::MasterDataProvider;
pub use repositories::TraceRepositories;
pub use rule_resolver::{RuleResolver, RuleScopeStrategy};
pub use traceability::TraceabilityIndex;

/// 当前 UTC 时间（秒级）
pub fn now_ts() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(0)
}
