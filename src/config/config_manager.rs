// ==========================================
// 物料批次追溯引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::engine_config::{DefaultRuleSet, EngineConfig};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        tracing::info!("配置已更新: {} = {}", key, value);
        Ok(())
    }

    /// 按类型解析配置值，缺失时返回默认
    fn get_parsed_or<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|e| RepositoryError::FieldValueError {
                    field: key.to_string(),
                    message: format!("无法解析配置值 '{}': {}", raw, e),
                }),
        }
    }

    /// 加载引擎配置（config_kv 覆写 + 默认值）
    pub fn load_engine_config(&self) -> RepositoryResult<EngineConfig> {
        let defaults = EngineConfig::default();

        let default_rules = match self.get_global_config_value(config_keys::DEFAULT_RULES)? {
            None => defaults.default_rules,
            Some(raw) => serde_json::from_str::<DefaultRuleSet>(&raw).map_err(|e| {
                RepositoryError::FieldValueError {
                    field: config_keys::DEFAULT_RULES.to_string(),
                    message: e.to_string(),
                }
            })?,
        };

        let config = EngineConfig {
            waste_variance_threshold: self.get_parsed_or(
                config_keys::WASTE_VARIANCE_THRESHOLD,
                defaults.waste_variance_threshold,
            )?,
            avg_consumption_window_days: self.get_parsed_or(
                config_keys::AVG_CONSUMPTION_WINDOW_DAYS,
                defaults.avg_consumption_window_days,
            )?,
            waste_window_days: self
                .get_parsed_or(config_keys::WASTE_WINDOW_DAYS, defaults.waste_window_days)?,
            turnover_window_days: self.get_parsed_or(
                config_keys::TURNOVER_WINDOW_DAYS,
                defaults.turnover_window_days,
            )?,
            auto_resolve_cleared: self.get_parsed_or(
                config_keys::AUTO_RESOLVE_CLEARED,
                defaults.auto_resolve_cleared,
            )?,
            default_rules,
        };

        tracing::debug!(?config, "引擎配置已加载");
        Ok(config)
    }

    /// 获取所有 global 配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let config_map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;

        serde_json::to_string(&json!(config_map)).map_err(|e| RepositoryError::InternalError(e.to_string()))
    }
}

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    // 损耗
    pub const WASTE_VARIANCE_THRESHOLD: &str = "waste_variance_threshold";
    pub const WASTE_WINDOW_DAYS: &str = "waste_window_days";

    // 消耗统计
    pub const AVG_CONSUMPTION_WINDOW_DAYS: &str = "avg_consumption_window_days";
    pub const TURNOVER_WINDOW_DAYS: &str = "turnover_window_days";

    // 预警
    pub const AUTO_RESOLVE_CLEARED: &str = "auto_resolve_cleared";
    pub const DEFAULT_RULES: &str = "default_rules"; // DefaultRuleSet (JSON)
}
