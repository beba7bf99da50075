// ==========================================
// 物料批次追溯引擎 - 引擎层错误类型
// ==========================================
// 职责: 业务错误分类（携带结构化上下文），并将存储层错误归类
// 分类: VALIDATION / NOT_FOUND / INSUFFICIENT_STOCK / DUPLICATE_KEY / INVALID_STATE / STORAGE
// ==========================================

use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 输入校验 =====
    #[error("参数校验失败 (field={field}): {message}")]
    Validation { field: String, message: String },

    // ===== 资源不存在 =====
    #[error("{entity} 不存在: {key}")]
    NotFound { entity: String, key: String },

    // ===== 库存不足 =====
    #[error("批次 {batch_no} 库存不足: 请求={requested}, 可用={available}")]
    InsufficientStock {
        batch_no: String,
        requested: f64,
        available: f64,
    },

    // ===== 唯一键冲突 =====
    #[error("{entity}.{field} 重复: {value}")]
    DuplicateKey {
        entity: String,
        field: String,
        value: String,
    },

    // ===== 状态不允许 =====
    #[error("{entity}({id}) 当前状态 {state} 不允许执行 {action}")]
    InvalidState {
        entity: String,
        id: String,
        state: String,
        action: String,
    },

    // ===== 存储层 =====
    #[error(transparent)]
    Storage(RepositoryError),
}

/// 错误类别（供 API 层映射状态码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientStock,
    DuplicateKey,
    InvalidState,
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorKind::DuplicateKey => "DUPLICATE_KEY",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Storage => "STORAGE",
        };
        f.write_str(s)
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation { .. } => ErrorKind::Validation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            EngineError::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            EngineError::InvalidState { .. } => ErrorKind::InvalidState,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &str, key: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            key: key.to_string(),
        }
    }

    pub fn duplicate(entity: &str, field: &str, value: &str) -> Self {
        EngineError::DuplicateKey {
            entity: entity.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn invalid_state(entity: &str, id: &str, state: impl fmt::Display, action: &str) -> Self {
        EngineError::InvalidState {
            entity: entity.to_string(),
            id: id.to_string(),
            state: state.to_string(),
            action: action.to_string(),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
// 唯一约束 -> DuplicateKey（兜底：预检查之外由存储层拦截的并发重复）
// NotFound -> NotFound
// 其余保持为 Storage
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::UniqueConstraintViolation(msg) => {
                // SQLite 消息形如 "UNIQUE constraint failed: material_batch.batch_no"
                let target = msg.rsplit(": ").next().unwrap_or("").trim().to_string();
                let (entity, field) = match target.split_once('.') {
                    Some((table, column)) => (table.to_string(), column.to_string()),
                    None => ("unknown".to_string(), target.clone()),
                };
                EngineError::DuplicateKey {
                    entity,
                    field,
                    value: msg,
                }
            }
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, key: id },
            other => EngineError::Storage(other),
        }
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
