// ==========================================
// 物料批次追溯引擎 - 引擎配置
// ==========================================
// 职责: 引擎运行参数与默认预警规则集
// 存储: config_kv 表覆写，缺省取 Default
// ==========================================

use crate::domain::alert::RuleThreshold;
use crate::domain::types::{AlertType, ThresholdType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// DefaultRuleSet - 默认预警规则集
// ==========================================
// 某类型无任何生效规则时回落到这里；此处也缺失则该类型不评估
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultRuleSet {
    rules: BTreeMap<AlertType, RuleThreshold>,
}

impl DefaultRuleSet {
    /// 空规则集（不提供任何默认）
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn with(mut self, alert_type: AlertType, threshold: RuleThreshold) -> Self {
        self.rules.insert(alert_type, threshold);
        self
    }

    pub fn get(&self, alert_type: AlertType) -> Option<&RuleThreshold> {
        self.rules.get(&alert_type)
    }
}

impl Default for DefaultRuleSet {
    /// 出厂默认
    ///
    /// - SHORTAGE: 库存 <= 0
    /// - LOW_STOCK: 安全库存 = 日均 x (7 + 3) x 1.2，占比 <= 30% 升级 CRITICAL
    /// - EXPIRED: 仅已过期批次（不做临期提醒）
    /// - HIGH_WASTE: 损耗占比 > 10%
    /// - SLOW_MOVING 无默认，需显式配置规则
    fn default() -> Self {
        Self::empty()
            .with(
                AlertType::Shortage,
                threshold(ThresholdType::Fixed, 0.0, 0.0, 0.0, 1.0),
            )
            .with(
                AlertType::LowStock,
                threshold(ThresholdType::Percentage, 30.0, 7.0, 3.0, 1.2),
            )
            .with(
                AlertType::Expired,
                threshold(ThresholdType::Days, 0.0, 0.0, 0.0, 1.0),
            )
            .with(
                AlertType::HighWaste,
                threshold(ThresholdType::Percentage, 10.0, 0.0, 0.0, 1.0),
            )
    }
}

fn threshold(
    threshold_type: ThresholdType,
    threshold_value: f64,
    safety_days: f64,
    lead_time_days: f64,
    buffer_ratio: f64,
) -> RuleThreshold {
    RuleThreshold {
        threshold_type,
        threshold_value,
        safety_days,
        lead_time_days,
        buffer_ratio,
    }
}

// ==========================================
// EngineConfig - 引擎运行参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// |variance_rate| 超过该百分比判定为损耗
    pub waste_variance_threshold: f64,
    /// 日均消耗统计窗口（天）
    pub avg_consumption_window_days: u32,
    /// HIGH_WASTE 统计窗口（天）
    pub waste_window_days: u32,
    /// SLOW_MOVING 周转统计窗口（天）
    pub turnover_window_days: u32,
    /// 条件解除后自动关闭 ACTIVE 预警
    pub auto_resolve_cleared: bool,
    pub default_rules: DefaultRuleSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            waste_variance_threshold: 10.0,
            avg_consumption_window_days: 30,
            waste_window_days: 30,
            turnover_window_days: 90,
            auto_resolve_cleared: false,
            default_rules: DefaultRuleSet::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rule_set_has_no_slow_moving() {
        let rules = DefaultRuleSet::default();
        assert!(rules.get(AlertType::SlowMoving).is_none());
        assert_eq!(
            rules.get(AlertType::LowStock).map(|t| t.threshold_value),
            Some(30.0)
        );
        assert!(rules.get(AlertType::Shortage).is_some());
        assert!(rules.get(AlertType::Expired).is_some());
        assert!(rules.get(AlertType::HighWaste).is_some());
    }

    #[test]
    fn test_default_rule_set_json_roundtrip() {
        let rules = DefaultRuleSet::default();
        let raw = serde_json::to_string(&rules).unwrap();
        assert!(raw.contains("LOW_STOCK"));
        let back: DefaultRuleSet = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, rules);
    }

    #[test]
    fn test_engine_config_partial_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"auto_resolve_cleared": true}"#).unwrap();
        assert!(cfg.auto_resolve_cleared);
        assert_eq!(cfg.waste_variance_threshold, 10.0);
        assert_eq!(cfg.turnover_window_days, 90);
    }
}
