// ==========================================
// 物料批次追溯引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 批次追溯与消耗预警引擎（由外部 API 层调用）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 引擎配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// SQL 性能追踪
pub mod perf;

// 应用层 - 引擎装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AlertLevel, AlertStatus, AlertType, BatchStatus, ConsumptionType, QualityStatus, ThresholdType,
};

// 领域实体
pub use domain::{
    BatchRef, ConsumptionInput, ConsumptionResult, Material, MaterialAlert, MaterialAlertRule,
    MaterialBatch, MaterialConsumption, NewAlertRule, NewBatch,
};

// 引擎
pub use engine::{
    AlertEngine, AnalyticsEngine, BatchLedger, ConsumptionRecorder, EngineError, EngineResult,
    ErrorKind, MaintenanceRunner, RuleResolver, TraceabilityIndex,
};

// 应用
pub use app::EngineState;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "物料批次追溯引擎";
