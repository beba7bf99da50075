// ==========================================
// 物料批次追溯引擎 - 领域类型定义
// ==========================================
// 约定: 数据库存储统一使用 SCREAMING_SNAKE_CASE 字符串
// 约定: 解析失败返回 Err(String)，由仓储层转换为列转换错误
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 批次状态 (Batch Status)
// ==========================================
// 状态机: ACTIVE -> DEPLETED (终态)
//         ACTIVE -> EXPIRED  (终态)
//         ACTIVE <-> LOCKED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Active,   // 可用
    Depleted, // 已耗尽
    Expired,  // 已过期
    Locked,   // 已锁定（禁止消耗）
}

impl BatchStatus {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "ACTIVE",
            BatchStatus::Depleted => "DEPLETED",
            BatchStatus::Expired => "EXPIRED",
            BatchStatus::Locked => "LOCKED",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Depleted | BatchStatus::Expired)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ACTIVE" => Ok(BatchStatus::Active),
            "DEPLETED" => Ok(BatchStatus::Depleted),
            "EXPIRED" => Ok(BatchStatus::Expired),
            "LOCKED" => Ok(BatchStatus::Locked),
            other => Err(format!("未知批次状态: {}", other)),
        }
    }
}

// ==========================================
// 质检状态 (Quality Status)
// ==========================================
// 仅作记录，不参与消耗校验
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityStatus {
    Pending,     // 待检
    Qualified,   // 合格
    Unqualified, // 不合格
}

impl QualityStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            QualityStatus::Pending => "PENDING",
            QualityStatus::Qualified => "QUALIFIED",
            QualityStatus::Unqualified => "UNQUALIFIED",
        }
    }
}

impl Default for QualityStatus {
    fn default() -> Self {
        QualityStatus::Qualified
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for QualityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(QualityStatus::Pending),
            "QUALIFIED" => Ok(QualityStatus::Qualified),
            "UNQUALIFIED" => Ok(QualityStatus::Unqualified),
            other => Err(format!("未知质检状态: {}", other)),
        }
    }
}

// ==========================================
// 消耗类型 (Consumption Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumptionType {
    Production, // 生产领用
    Testing,    // 试验/检测
    Waste,      // 报废损耗
    Rework,     // 返工
    Other,      // 其他
}

impl ConsumptionType {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConsumptionType::Production => "PRODUCTION",
            ConsumptionType::Testing => "TESTING",
            ConsumptionType::Waste => "WASTE",
            ConsumptionType::Rework => "REWORK",
            ConsumptionType::Other => "OTHER",
        }
    }
}

impl Default for ConsumptionType {
    fn default() -> Self {
        ConsumptionType::Production
    }
}

impl fmt::Display for ConsumptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for ConsumptionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PRODUCTION" => Ok(ConsumptionType::Production),
            "TESTING" => Ok(ConsumptionType::Testing),
            "WASTE" => Ok(ConsumptionType::Waste),
            "REWORK" => Ok(ConsumptionType::Rework),
            "OTHER" => Ok(ConsumptionType::Other),
            other => Err(format!("未知消耗类型: {}", other)),
        }
    }
}

// ==========================================
// 预警类型 (Alert Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Shortage,   // 缺货
    LowStock,   // 低库存
    Expired,    // 过期/临期
    SlowMoving, // 呆滞
    HighWaste,  // 高损耗
}

impl AlertType {
    /// 评估顺序
    pub const ALL: [AlertType; 5] = [
        AlertType::Shortage,
        AlertType::LowStock,
        AlertType::Expired,
        AlertType::SlowMoving,
        AlertType::HighWaste,
    ];

    pub fn to_db_str(&self) -> &'static str {
        match self {
            AlertType::Shortage => "SHORTAGE",
            AlertType::LowStock => "LOW_STOCK",
            AlertType::Expired => "EXPIRED",
            AlertType::SlowMoving => "SLOW_MOVING",
            AlertType::HighWaste => "HIGH_WASTE",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SHORTAGE" => Ok(AlertType::Shortage),
            "LOW_STOCK" => Ok(AlertType::LowStock),
            "EXPIRED" => Ok(AlertType::Expired),
            "SLOW_MOVING" => Ok(AlertType::SlowMoving),
            "HIGH_WASTE" => Ok(AlertType::HighWaste),
            other => Err(format!("未知预警类型: {}", other)),
        }
    }
}

// ==========================================
// 预警级别 (Alert Level)
// ==========================================
// 顺序: Info < Warning < Critical < Urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Urgent,
}

impl AlertLevel {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
            AlertLevel::Urgent => "URGENT",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INFO" => Ok(AlertLevel::Info),
            "WARNING" => Ok(AlertLevel::Warning),
            "CRITICAL" => Ok(AlertLevel::Critical),
            "URGENT" => Ok(AlertLevel::Urgent),
            other => Err(format!("未知预警级别: {}", other)),
        }
    }
}

// ==========================================
// 预警状态 (Alert Status)
// ==========================================
// 状态机: ACTIVE -> RESOLVED / IGNORED / CLOSED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Resolved,
    Ignored,
    Closed,
}

impl AlertStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "ACTIVE",
            AlertStatus::Resolved => "RESOLVED",
            AlertStatus::Ignored => "IGNORED",
            AlertStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ACTIVE" => Ok(AlertStatus::Active),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            "IGNORED" => Ok(AlertStatus::Ignored),
            "CLOSED" => Ok(AlertStatus::Closed),
            other => Err(format!("未知预警状态: {}", other)),
        }
    }
}

// ==========================================
// 阈值类型 (Threshold Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdType {
    Percentage, // 百分比
    Fixed,      // 固定数量
    Days,       // 天数
}

impl ThresholdType {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ThresholdType::Percentage => "PERCENTAGE",
            ThresholdType::Fixed => "FIXED",
            ThresholdType::Days => "DAYS",
        }
    }
}

impl fmt::Display for ThresholdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for ThresholdType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PERCENTAGE" => Ok(ThresholdType::Percentage),
            "FIXED" => Ok(ThresholdType::Fixed),
            "DAYS" => Ok(ThresholdType::Days),
            other => Err(format!("未知阈值类型: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_status_roundtrip_db_str() {
        for status in [
            BatchStatus::Active,
            BatchStatus::Depleted,
            BatchStatus::Expired,
            BatchStatus::Locked,
        ] {
            assert_eq!(status.to_db_str().parse::<BatchStatus>().unwrap(), status);
        }
        assert!("UNKNOWN".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(BatchStatus::Depleted.is_terminal());
        assert!(BatchStatus::Expired.is_terminal());
        assert!(!BatchStatus::Locked.is_terminal());
        assert!(!BatchStatus::Active.is_terminal());
    }

    #[test]
    fn test_alert_level_ordering() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Critical);
        assert!(AlertLevel::Critical < AlertLevel::Urgent);
    }

    #[test]
    fn test_alert_type_parse_is_case_insensitive() {
        assert_eq!("low_stock".parse::<AlertType>().unwrap(), AlertType::LowStock);
        assert_eq!(" HIGH_WASTE ".parse::<AlertType>().unwrap(), AlertType::HighWaste);
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&AlertType::SlowMoving).unwrap();
        assert_eq!(json, "\"SLOW_MOVING\"");
        let parsed: ConsumptionType = serde_json::from_str("\"REWORK\"").unwrap();
        assert_eq!(parsed, ConsumptionType::Rework);
    }
}
