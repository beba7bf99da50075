// ==========================================
// 物料批次追溯引擎 - 配置层
// ==========================================
// 职责: 引擎参数与默认规则集管理,支持 config_kv 覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod engine_config;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use engine_config::{DefaultRuleSet, EngineConfig};
