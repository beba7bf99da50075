// ==========================================
// 物料批次追溯引擎 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合各引擎所需的 Repository，共享同一连接
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::repository::{
    AlertRepository, AlertRuleRepository, BatchRepository, ConsumptionRepository,
    MaterialRepository,
};

/// 追溯引擎仓储集合
///
/// # 包含的仓储
/// - `material_repo`: 物料/项目/工单主数据（只读镜像）
/// - `batch_repo`: 批次台账
/// - `consumption_repo`: 消耗台账
/// - `alert_repo`: 预警
/// - `rule_repo`: 预警规则
#[derive(Clone)]
pub struct TraceRepositories {
    pub conn: Arc<Mutex<Connection>>,
    pub material_repo: Arc<MaterialRepository>,
    pub batch_repo: Arc<BatchRepository>,
    pub consumption_repo: Arc<ConsumptionRepository>,
    pub alert_repo: Arc<AlertRepository>,
    pub rule_repo: Arc<AlertRuleRepository>,
}

impl TraceRepositories {
    /// 基于共享连接创建全部仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            material_repo: Arc::new(MaterialRepository::new(conn.clone())),
            batch_repo: Arc::new(BatchRepository::new(conn.clone())),
            consumption_repo: Arc::new(ConsumptionRepository::new(conn.clone())),
            alert_repo: Arc::new(AlertRepository::new(conn.clone())),
            rule_repo: Arc::new(AlertRuleRepository::new(conn.clone())),
            conn,
        }
    }
}
