// ==========================================
// 物料批次追溯引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod alert_repo;
pub mod alert_rule_repo;
pub mod batch_repo;
pub mod consumption_repo;
pub mod error;
pub mod material_repo;
pub mod row_utils;
pub mod tx;

// 重导出核心仓储
pub use alert_repo::AlertRepository;
pub use alert_rule_repo::AlertRuleRepository;
pub use batch_repo::{BatchQtyUpdate, BatchRepository};
pub use consumption_repo::{ConsumptionRepository, ConsumptionTotals};
pub use error::{RepositoryError, RepositoryResult};
pub use material_repo::MaterialRepository;
pub use tx::run_in_write_tx;
