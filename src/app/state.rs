// ==========================================
// 物料批次追溯引擎 - 应用状态
// ==========================================
// 职责: 打开数据库、加载配置、装配全部引擎
// 说明: 所有仓储与引擎共享同一连接
// ==========================================

use std::sync::{Arc, Mutex};

use anyhow::Context;

use crate::config::{ConfigManager, EngineConfig};
use crate::db::{ensure_schema, open_sqlite_connection};
use crate::engine::{
    AlertEngine, AlertNotifier, AnalyticsEngine, BatchLedger, ConsumptionRecorder,
    MaintenanceRunner, MasterDataProvider, NoOpAlertNotifier, RuleResolver, RuleScopeStrategy,
    TraceRepositories, TraceabilityIndex,
};

/// 引擎状态
///
/// 供外部 API 层持有的全部引擎实例
pub struct EngineState {
    /// 数据库路径
    pub db_path: String,

    /// 生效配置（启动时加载）
    pub config: EngineConfig,

    pub config_manager: Arc<ConfigManager>,
    pub repos: TraceRepositories,

    pub batch_ledger: Arc<BatchLedger>,
    pub recorder: Arc<ConsumptionRecorder>,
    pub rules: Arc<RuleResolver>,
    pub alerts: Arc<AlertEngine>,
    pub traceability: Arc<TraceabilityIndex>,
    pub analytics: Arc<AnalyticsEngine>,
    pub maintenance: Arc<MaintenanceRunner>,
}

impl EngineState {
    /// 使用空操作通知者打开
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        Self::open_with_notifier(db_path, Arc::new(NoOpAlertNotifier))
    }

    /// 打开数据库并装配引擎
    ///
    /// # 步骤
    /// 1. 打开连接（统一 PRAGMA + SQL 追踪）并建表
    /// 2. 从 config_kv 加载配置
    /// 3. 构建仓储、引擎
    pub fn open_with_notifier(db_path: &str, notifier: Arc<dyn AlertNotifier>) -> anyhow::Result<Self> {
        tracing::info!("初始化EngineState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(db_path)
            .with_context(|| format!("无法打开数据库: {}", db_path))?;
        ensure_schema(&conn).context("数据库建表失败")?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone())?);
        let config = config_manager.load_engine_config().context("加载引擎配置失败")?;

        // ==========================================
        // 仓储
        // ==========================================
        let repos = TraceRepositories::new(conn.clone());
        let master_data: Arc<dyn MasterDataProvider> = repos.material_repo.clone();

        // ==========================================
        // 引擎
        // ==========================================
        let batch_ledger = Arc::new(BatchLedger::new(
            conn.clone(),
            repos.batch_repo.clone(),
            master_data.clone(),
        ));
        let analytics = Arc::new(AnalyticsEngine::new(
            repos.consumption_repo.clone(),
            master_data.clone(),
        ));
        let rules = Arc::new(RuleResolver::new(
            repos.rule_repo.clone(),
            RuleScopeStrategy::default(),
            config.default_rules.clone(),
        ));
        let alerts = Arc::new(AlertEngine::new(
            conn.clone(),
            master_data.clone(),
            repos.batch_repo.clone(),
            repos.alert_repo.clone(),
            rules.clone(),
            analytics.clone(),
            config.clone(),
            notifier,
        ));
        let recorder = Arc::new(
            ConsumptionRecorder::new(
                conn.clone(),
                master_data.clone(),
                repos.consumption_repo.clone(),
                config.waste_variance_threshold,
            )
            .with_alert_engine(alerts.clone()),
        );
        let traceability = Arc::new(TraceabilityIndex::new(
            repos.batch_repo.clone(),
            repos.consumption_repo.clone(),
            master_data,
        ));
        let maintenance = Arc::new(MaintenanceRunner::new(
            batch_ledger.clone(),
            alerts.clone(),
            repos.material_repo.clone(),
        ));

        tracing::info!("EngineState初始化完成");

        Ok(Self {
            db_path: db_path.to_string(),
            config,
            config_manager,
            repos,
            batch_ledger,
            recorder,
            rules,
            alerts,
            traceability,
            analytics,
            maintenance,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先级: MATERIAL_TRACE_DB_PATH > 用户数据目录 > ./material_trace.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("MATERIAL_TRACE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./material_trace.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("material-trace");
        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("material_trace.db");
        }
    }

    path.to_string_lossy().to_string()
}
