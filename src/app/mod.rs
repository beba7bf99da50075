// ==========================================
// 物料批次追溯引擎 - 应用层
// ==========================================
// 职责: 引擎装配，供外部 API 层与运维工具使用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, EngineState};
