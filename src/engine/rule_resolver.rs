// ==========================================
// 物料批次追溯引擎 - 预警规则解析
// ==========================================
// 职责: 多作用域规则合并，输出单一生效阈值
// 优先级: 物料级 > 分类级 > 全局 > 默认规则集
// 同作用域: priority 高者胜 -> updated_at 新者胜 -> rule_id 字典序
// ==========================================

use crate::config::DefaultRuleSet;
use crate::domain::alert::{
    EffectiveRule, MaterialAlertRule, NewAlertRule, RuleOrigin, RuleScope, RuleThreshold,
};
use crate::domain::types::AlertType;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::now_ts;
use crate::engine::numbering::new_id;
use crate::repository::AlertRuleRepository;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

// ==========================================
// RuleScopeStrategy - 作用域优先顺序
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleScopeStrategy {
    order: Vec<RuleScope>,
}

impl Default for RuleScopeStrategy {
    fn default() -> Self {
        Self {
            order: vec![RuleScope::Material, RuleScope::Category, RuleScope::Global],
        }
    }
}

impl RuleScopeStrategy {
    pub fn new(order: Vec<RuleScope>) -> Self {
        Self { order }
    }

    /// 从候选集合中选出生效规则
    ///
    /// 候选不要求预先过滤：类型/启用/作用域匹配在这里再判一次
    pub fn select<'a>(
        &self,
        candidates: &'a [MaterialAlertRule],
        material_id: &str,
        category_id: Option<&str>,
        alert_type: AlertType,
    ) -> Option<&'a MaterialAlertRule> {
        self.order.iter().find_map(|scope| {
            candidates
                .iter()
                .filter(|r| r.is_active && r.alert_type == alert_type && r.scope() == *scope)
                .filter(|r| match scope {
                    RuleScope::Material => r.material_id.as_deref() == Some(material_id),
                    RuleScope::Category => category_id.is_some() && r.category_id.as_deref() == category_id,
                    RuleScope::Global => true,
                })
                .min_by(|a, b| rank(a, b))
        })
    }
}

/// 同作用域内排序（小者优先）
fn rank(a: &MaterialAlertRule, b: &MaterialAlertRule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
}

// ==========================================
// RuleResolver - 规则解析与维护
// ==========================================
pub struct RuleResolver {
    rule_repo: Arc<AlertRuleRepository>,
    strategy: RuleScopeStrategy,
    defaults: DefaultRuleSet,
}

impl RuleResolver {
    pub fn new(
        rule_repo: Arc<AlertRuleRepository>,
        strategy: RuleScopeStrategy,
        defaults: DefaultRuleSet,
    ) -> Self {
        Self {
            rule_repo,
            strategy,
            defaults,
        }
    }

    /// 解析生效规则
    ///
    /// # 返回
    /// - Some: 已配置规则或默认规则
    /// - None: 无规则且无默认，该类型不评估
    pub fn resolve(
        &self,
        material_id: &str,
        category_id: Option<&str>,
        alert_type: AlertType,
    ) -> EngineResult<Option<EffectiveRule>> {
        let candidates = self
            .rule_repo
            .list_candidates(material_id, category_id, alert_type)?;

        if let Some(rule) = self
            .strategy
            .select(&candidates, material_id, category_id, alert_type)
        {
            debug!(
                material_id,
                alert_type = %alert_type,
                rule_id = %rule.rule_id,
                scope = %rule.scope(),
                "命中配置规则"
            );
            return Ok(Some(EffectiveRule {
                alert_type,
                threshold: RuleThreshold::from(rule),
                origin: RuleOrigin::Configured {
                    rule_id: rule.rule_id.clone(),
                    scope: rule.scope(),
                },
            }));
        }

        Ok(self.defaults.get(alert_type).map(|threshold| {
            debug!(material_id, alert_type = %alert_type, "使用默认规则");
            EffectiveRule {
                alert_type,
                threshold: *threshold,
                origin: RuleOrigin::Default,
            }
        }))
    }

    // ==========================================
    // 规则维护
    // ==========================================

    pub fn register_rule(&self, spec: NewAlertRule) -> EngineResult<MaterialAlertRule> {
        validate_rule(&spec)?;
        let now = now_ts();
        let rule = MaterialAlertRule {
            rule_id: new_id(),
            material_id: normalize(spec.material_id),
            category_id: normalize(spec.category_id),
            alert_type: spec.alert_type,
            threshold_type: spec.threshold_type,
            threshold_value: spec.threshold_value,
            safety_days: spec.safety_days,
            lead_time_days: spec.lead_time_days,
            buffer_ratio: spec.buffer_ratio,
            priority: spec.priority,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.rule_repo.insert(&rule)?;
        info!(rule_id = %rule.rule_id, alert_type = %rule.alert_type, scope = %rule.scope(), "预警规则已创建");
        Ok(rule)
    }

    /// 覆盖更新规则参数（保留启用状态与创建时间）
    pub fn update_rule(&self, rule_id: &str, spec: NewAlertRule) -> EngineResult<MaterialAlertRule> {
        validate_rule(&spec)?;
        let existing = self.get_rule(rule_id)?;
        let rule = MaterialAlertRule {
            rule_id: existing.rule_id,
            material_id: normalize(spec.material_id),
            category_id: normalize(spec.category_id),
            alert_type: spec.alert_type,
            threshold_type: spec.threshold_type,
            threshold_value: spec.threshold_value,
            safety_days: spec.safety_days,
            lead_time_days: spec.lead_time_days,
            buffer_ratio: spec.buffer_ratio,
            priority: spec.priority,
            is_active: existing.is_active,
            created_at: existing.created_at,
            updated_at: now_ts(),
        };
        self.rule_repo.update(&rule)?;
        info!(rule_id, "预警规则已更新");
        Ok(rule)
    }

    pub fn set_rule_active(&self, rule_id: &str, is_active: bool) -> EngineResult<MaterialAlertRule> {
        self.rule_repo.set_active(rule_id, is_active, now_ts())?;
        info!(rule_id, is_active, "预警规则启停");
        self.get_rule(rule_id)
    }

    pub fn get_rule(&self, rule_id: &str) -> EngineResult<MaterialAlertRule> {
        self.rule_repo
            .find_by_id(rule_id)?
            .ok_or_else(|| EngineError::not_found("MaterialAlertRule", rule_id))
    }

    pub fn list_rules(&self) -> EngineResult<Vec<MaterialAlertRule>> {
        Ok(self.rule_repo.list_all()?)
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_rule(spec: &NewAlertRule) -> EngineResult<()> {
    let non_negative = [
        ("threshold_value", spec.threshold_value),
        ("safety_days", spec.safety_days),
        ("lead_time_days", spec.lead_time_days),
    ];
    for (field, value) in non_negative {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::validation(field, format!("不能为负数，实际 {}", value)));
        }
    }
    if !spec.buffer_ratio.is_finite() || spec.buffer_ratio <= 0.0 {
        return Err(EngineError::validation(
            "buffer_ratio",
            format!("必须大于 0，实际 {}", spec.buffer_ratio),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_connection;
    use crate::domain::types::ThresholdType;
    use crate::engine::error::ErrorKind;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use std::sync::Mutex;

    fn ts(offset_min: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            + Duration::minutes(offset_min)
    }

    fn rule(id: &str, material: Option<&str>, category: Option<&str>, priority: i32, value: f64) -> MaterialAlertRule {
        MaterialAlertRule {
            rule_id: id.to_string(),
            material_id: material.map(str::to_string),
            category_id: category.map(str::to_string),
            alert_type: AlertType::LowStock,
            threshold_type: ThresholdType::Percentage,
            threshold_value: value,
            safety_days: 0.0,
            lead_time_days: 0.0,
            buffer_ratio: 1.0,
            priority,
            is_active: true,
            created_at: ts(0),
            updated_at: ts(0),
        }
    }

    fn spec(material: Option<&str>, value: f64) -> NewAlertRule {
        NewAlertRule {
            material_id: material.map(str::to_string),
            category_id: None,
            alert_type: AlertType::LowStock,
            threshold_type: ThresholdType::Percentage,
            threshold_value: value,
            safety_days: 7.0,
            lead_time_days: 3.0,
            buffer_ratio: 1.0,
            priority: 0,
        }
    }

    // ===== 策略（纯函数） =====

    #[test]
    fn test_material_scope_beats_higher_priority_global() {
        let strategy = RuleScopeStrategy::default();
        let rules = vec![rule("g", None, None, 99, 20.0), rule("m", Some("M1"), None, 0, 30.0)];
        let hit = strategy.select(&rules, "M1", None, AlertType::LowStock).unwrap();
        assert_eq!(hit.rule_id, "m");
    }

    #[test]
    fn test_category_scope_beats_global() {
        let strategy = RuleScopeStrategy::default();
        let rules = vec![rule("g", None, None, 5, 20.0), rule("c", None, Some("CAT"), 0, 25.0)];
        assert_eq!(
            strategy.select(&rules, "M1", Some("CAT"), AlertType::LowStock).unwrap().rule_id,
            "c"
        );
        // 分类不匹配时回落全局
        assert_eq!(
            strategy.select(&rules, "M1", Some("OTHER"), AlertType::LowStock).unwrap().rule_id,
            "g"
        );
    }

    #[test]
    fn test_same_scope_tie_breaks() {
        let strategy = RuleScopeStrategy::default();
        let mut older = rule("b", None, None, 1, 20.0);
        older.updated_at = ts(0);
        let mut newer = rule("c", None, None, 1, 21.0);
        newer.updated_at = ts(10);
        let low = rule("a", None, None, 0, 22.0);
        let rules = vec![older.clone(), newer, low];
        assert_eq!(strategy.select(&rules, "M1", None, AlertType::LowStock).unwrap().rule_id, "c");

        let mut twin = older.clone();
        twin.rule_id = "a".to_string();
        let rules = vec![older, twin];
        assert_eq!(strategy.select(&rules, "M1", None, AlertType::LowStock).unwrap().rule_id, "a");
    }

    #[test]
    fn test_custom_order_and_inactive_rules() {
        let strategy = RuleScopeStrategy::new(vec![RuleScope::Global, RuleScope::Material]);
        let mut inactive_global = rule("g", None, None, 0, 20.0);
        inactive_global.is_active = false;
        let rules = vec![inactive_global, rule("m", Some("M1"), None, 0, 30.0)];
        assert_eq!(strategy.select(&rules, "M1", None, AlertType::LowStock).unwrap().rule_id, "m");
        assert!(strategy.select(&rules, "M1", None, AlertType::HighWaste).is_none());
    }

    // ===== 解析（带仓储） =====

    fn make_resolver(defaults: DefaultRuleSet) -> RuleResolver {
        let conn = Arc::new(Mutex::new(open_memory_connection().unwrap()));
        RuleResolver::new(
            Arc::new(AlertRuleRepository::new(conn)),
            RuleScopeStrategy::default(),
            defaults,
        )
    }

    #[test]
    fn test_resolve_material_rule_overrides_global() {
        let resolver = make_resolver(DefaultRuleSet::default());
        resolver.register_rule(spec(None, 20.0)).unwrap();
        let material_rule = resolver.register_rule(spec(Some("M1"), 30.0)).unwrap();

        let effective = resolver.resolve("M1", None, AlertType::LowStock).unwrap().unwrap();
        assert_eq!(effective.threshold.threshold_value, 30.0);
        assert_eq!(effective.rule_id(), Some(material_rule.rule_id.as_str()));

        let other = resolver.resolve("M2", None, AlertType::LowStock).unwrap().unwrap();
        assert_eq!(other.threshold.threshold_value, 20.0);
    }

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let resolver = make_resolver(DefaultRuleSet::default());
        let effective = resolver.resolve("M1", None, AlertType::LowStock).unwrap().unwrap();
        assert_eq!(effective.origin, RuleOrigin::Default);
        assert!(resolver.resolve("M1", None, AlertType::SlowMoving).unwrap().is_none());

        let empty = make_resolver(DefaultRuleSet::empty());
        assert!(empty.resolve("M1", None, AlertType::LowStock).unwrap().is_none());
    }

    #[test]
    fn test_disabled_rule_is_ignored() {
        let resolver = make_resolver(DefaultRuleSet::empty());
        let r = resolver.register_rule(spec(Some("M1"), 30.0)).unwrap();
        resolver.set_rule_active(&r.rule_id, false).unwrap();
        assert!(resolver.resolve("M1", None, AlertType::LowStock).unwrap().is_none());

        resolver.set_rule_active(&r.rule_id, true).unwrap();
        assert!(resolver.resolve("M1", None, AlertType::LowStock).unwrap().is_some());
    }

    #[test]
    fn test_update_rule_and_validation() {
        let resolver = make_resolver(DefaultRuleSet::empty());
        let r = resolver.register_rule(spec(Some("M1"), 30.0)).unwrap();
        let updated = resolver.update_rule(&r.rule_id, spec(Some("M1"), 40.0)).unwrap();
        assert_eq!(updated.threshold_value, 40.0);
        assert_eq!(resolver.list_rules().unwrap().len(), 1);

        let mut bad = spec(None, 10.0);
        bad.buffer_ratio = 0.0;
        assert_eq!(resolver.register_rule(bad).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(
            resolver.register_rule(spec(None, -1.0)).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            resolver.update_rule("missing", spec(None, 1.0)).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
