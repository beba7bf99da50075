// ==========================================
// 预警引擎集成测试
// ==========================================
// 职责: 验证阈值评估、去重落库、规则优先级、人工处理与自动关闭
// ==========================================


use material_trace::app::EngineState;
use material_trace::domain::{
    AlertChange, AlertChangeKind, AlertLevel, AlertStatus, AlertType, NewAlertRule, RuleOrigin,
    RuleScope, ThresholdType,
};
use material_trace::engine::{AlertNotifier, ErrorKind, SYSTEM_ACTOR};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use test_helpers::{create_auto_resolve_state, create_test_state, seed_material, today};

fn low_stock_rule(material_id: Option<&str>, value: f64) -> NewAlertRule {
    NewAlertRule {
        material_id: material_id.map(str::to_string),
        category_id: None,
        alert_type: AlertType::LowStock,
        threshold_type: ThresholdType::Percentage,
        threshold_value: value,
        safety_days: 7.0,
        lead_time_days: 3.0,
        buffer_ratio: 1.2,
        priority: 0,
    }
}

// ==========================================
// 低库存与去重
// ==========================================

#[test]
fn test_low_stock_alert_created_with_shortage() {
    let (_temp, state) = create_test_state().unwrap();
    seed_material(&state, "M1", 50.0, Some(100.0), 1.0);

    let evaluation = state.alerts.evaluate_material("M1", today()).unwrap();
    assert_eq!(evaluation.safety_stock, Some(100.0));
    assert_eq!(evaluation.days_to_stockout, None);
    assert_eq!(evaluation.changes.len(), 1);

    let change = &evaluation.changes[0];
    assert_eq!(change.kind, AlertChangeKind::Created);
    assert_eq!(change.alert.alert_type, AlertType::LowStock);
    assert_eq!(change.alert.alert_level, AlertLevel::Warning);
    assert_eq!(change.alert.shortage_qty, Some(50.0));
    assert!(change.alert.alert_no.starts_with("MA"));
}

#[test]
fn test_repeated_trigger_updates_single_active_alert() {
    let (_temp, state) = create_test_state().unwrap();
    seed_material(&state, "M1", 50.0, Some(100.0), 1.0);

    state.alerts.evaluate_material("M1", today()).unwrap();
    let second = state.alerts.evaluate_material("M1", today()).unwrap();
    assert_eq!(second.changes.len(), 1);
    assert_eq!(second.changes[0].kind, AlertChangeKind::Updated);
    assert!(!second.changes[0].escalated);

    let active = state.alerts.list_active_alerts(Some("M1")).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].trigger_count, 2);
}

#[test]
fn test_escalation_when_stock_drops() {
    let (_temp, state) = create_test_state().unwrap();
    seed_material(&state, "M1", 50.0, Some(100.0), 1.0);
    state.alerts.evaluate_material("M1", today()).unwrap();

    seed_material(&state, "M1", 10.0, Some(100.0), 1.0);
    let evaluation = state.alerts.evaluate_material("M1", today()).unwrap();
    let change = &evaluation.changes[0];
    assert_eq!(change.kind, AlertChangeKind::Updated);
    assert!(change.escalated);
    assert_eq!(change.alert.alert_level, AlertLevel::Critical);
    assert_eq!(change.alert.shortage_qty, Some(90.0));
}

#[test]
fn test_zero_stock_raises_shortage_only() {
    let (_temp, state) = create_test_state().unwrap();
    seed_material(&state, "M1", 0.0, Some(100.0), 1.0);

    let evaluation = state.alerts.evaluate_material("M1", today()).unwrap();
    let types: Vec<AlertType> = evaluation.changes.iter().map(|c| c.alert.alert_type).collect();
    assert_eq!(types, vec![AlertType::Shortage]);
    assert_eq!(evaluation.changes[0].alert.alert_level, AlertLevel::Urgent);
}

#[test]
fn test_idle_empty_material_raises_nothing() {
    let (_temp, state) = create_test_state().unwrap();
    seed_material(&state, "M1", 0.0, None, 1.0);

    let evaluation = state.alerts.evaluate_material("M1", today()).unwrap();
    assert!(evaluation.changes.is_empty());
    assert!(state.alerts.list_active_alerts(Some("M1")).unwrap().is_empty());
}

#[test]
fn test_unknown_material_is_not_found() {
    let (_temp, state) = create_test_state().unwrap();
    let err = state.alerts.evaluate_material("NOPE", today()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ==========================================
// 规则优先级
// ==========================================

#[test]
fn test_material_rule_overrides_global_rule() {
    let (_temp, state) = create_test_state().unwrap();
    seed_material(&state, "M1", 25.0, Some(100.0), 1.0);

    state.rules.register_rule(low_stock_rule(None, 20.0)).unwrap();
    let specific = state.rules.register_rule(low_stock_rule(Some("M1"), 30.0)).unwrap();

    let effective = state
        .rules
        .resolve("M1", None, AlertType::LowStock)
        .unwrap()
        .unwrap();
    assert_eq!(effective.threshold.threshold_value, 30.0);
    assert_eq!(
        effective.origin,
        RuleOrigin::Configured {
            rule_id: specific.rule_id.clone(),
            scope: RuleScope::Material,
        }
    );

    // 25% <= 30 -> CRITICAL（全局 20 下应为 WARNING）
    let evaluation = state.alerts.evaluate_material("M1", today()).unwrap();
    let alert = &evaluation.changes[0].alert;
    assert_eq!(alert.alert_level, AlertLevel::Critical);
    assert_eq!(alert.rule_id.as_deref(), Some(specific.rule_id.as_str()));
    assert_eq!(alert.threshold_value, Some(30.0));
}

#[test]
fn test_disabled_material_rule_falls_back_to_global() {
    let (_temp, state) = create_test_state().unwrap();
    seed_material(&state, "M1", 25.0, Some(100.0), 1.0);

    let global = state.rules.register_rule(low_stock_rule(None, 20.0)).unwrap();
    let specific = state.rules.register_rule(low_stock_rule(Some("M1"), 30.0)).unwrap();
    state.rules.set_rule_active(&specific.rule_id, false).unwrap();

    let effective = state
        .rules
        .resolve("M1", None, AlertType::LowStock)
        .unwrap()
        .unwrap();
    assert_eq!(effective.threshold.threshold_value, 20.0);
    assert_eq!(
        effective.origin,
        RuleOrigin::Configured {
            rule_id: global.rule_id,
            scope: RuleScope::Global,
        }
    );
}

// ==========================================
// 人工处理
// ==========================================

#[test]
fn test_resolve_alert_transitions() {
    let (_temp, state) = create_test_state().unwrap();
    seed_material(&state, "M1", 50.0, Some(100.0), 1.0);
    let evaluation = state.alerts.evaluate_material("M1", today()).unwrap();
    let alert_id = evaluation.changes[0].alert.alert_id.clone();

    let invalid = state
        .alerts
        .resolve_alert(&alert_id, AlertStatus::Active, None, "张三")
        .unwrap_err();
    assert_eq!(invalid.kind(), ErrorKind::Validation);

    let resolved = state
        .alerts
        .resolve_alert(&alert_id, AlertStatus::Resolved, Some("已补货"), "张三")
        .unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("张三"));
    assert!(resolved.resolved_at.is_some());

    let again = state
        .alerts
        .resolve_alert(&alert_id, AlertStatus::Ignored, None, "张三")
        .unwrap_err();
    assert_eq!(again.kind(), ErrorKind::InvalidState);

    let missing = state
        .alerts
        .resolve_alert("missing", AlertStatus::Closed, None, "张三")
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    // 关闭后再次触发会新建一条
    let next = state.alerts.evaluate_material("M1", today()).unwrap();
    assert_eq!(next.changes[0].kind, AlertChangeKind::Created);
    assert_eq!(state.alerts.alert_history("M1").unwrap().len(), 2);
}

// ==========================================
// 自动关闭
// ==========================================

#[test]
fn test_cleared_alert_kept_when_auto_resolve_disabled() {
    let (_temp, state) = create_test_state().unwrap();
    seed_material(&state, "M1", 50.0, Some(100.0), 1.0);
    state.alerts.evaluate_material("M1", today()).unwrap();

    seed_material(&state, "M1", 150.0, Some(100.0), 1.0);
    let evaluation = state.alerts.evaluate_material("M1", today()).unwrap();
    assert!(evaluation.changes.is_empty());
    assert_eq!(state.alerts.list_active_alerts(Some("M1")).unwrap().len(), 1);
}

#[test]
fn test_auto_resolve_closes_cleared_low_stock() {
    let (_temp, state) = create_auto_resolve_state().unwrap();
    seed_material(&state, "M1", 50.0, Some(100.0), 1.0);
    state.alerts.evaluate_material("M1", today()).unwrap();

    seed_material(&state, "M1", 150.0, Some(100.0), 1.0);
    let evaluation = state.alerts.evaluate_material("M1", today()).unwrap();
    assert_eq!(evaluation.changes.len(), 1);
    let change = &evaluation.changes[0];
    assert_eq!(change.kind, AlertChangeKind::AutoResolved);

    let stored = state.alerts.get_alert(&change.alert.alert_id).unwrap();
    assert_eq!(stored.status, AlertStatus::Resolved);
    assert_eq!(stored.resolved_by.as_deref(), Some(SYSTEM_ACTOR));
    assert!(state.alerts.list_active_alerts(Some("M1")).unwrap().is_empty());
}

// ==========================================
// 通知
// ==========================================

struct CountingNotifier {
    calls: AtomicUsize,
    fail: bool,
}

impl AlertNotifier for CountingNotifier {
    fn notify(&self, _change: &AlertChange) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("通道不可用".into());
        }
        Ok(())
    }
}

fn state_with_notifier(notifier: Arc<CountingNotifier>) -> (NamedTempFile, EngineState) {
    let temp = NamedTempFile::new().unwrap();
    let state = EngineState::open_with_notifier(temp.path().to_str().unwrap(), notifier).unwrap();
    (temp, state)
}

#[test]
fn test_notifier_receives_created_and_escalated_only() {
    let notifier = Arc::new(CountingNotifier {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let (_temp, state) = state_with_notifier(notifier.clone());
    seed_material(&state, "M1", 50.0, Some(100.0), 1.0);

    state.alerts.evaluate_material("M1", today()).unwrap();
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);

    // 同级更新不通知
    state.alerts.evaluate_material("M1", today()).unwrap();
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);

    // 升级通知
    seed_material(&state, "M1", 10.0, Some(100.0), 1.0);
    state.alerts.evaluate_material("M1", today()).unwrap();
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_notifier_failure_is_suppressed() {
    let notifier = Arc::new(CountingNotifier {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let (_temp, state) = state_with_notifier(notifier.clone());
    seed_material(&state, "M1", 50.0, Some(100.0), 1.0);

    let evaluation = state.alerts.evaluate_material("M1", today()).unwrap();
    assert_eq!(evaluation.changes.len(), 1);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.alerts.list_active_alerts(Some("M1")).unwrap().len(), 1);
}
