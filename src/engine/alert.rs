// ==========================================
// 物料批次追溯引擎 - 预警引擎
// ==========================================
// 职责: 阈值评估、预警去重落库、人工处理
// 红线: 同一 (material_id, alert_type) 至多一条 ACTIVE
// 说明: 读-改-写在同一 IMMEDIATE 事务内完成，部分唯一索引兜底
// ==========================================
// 评估项:
//   SHORTAGE    库存 <= 0 且有安全库存或需求      -> URGENT
//   LOW_STOCK   0 < 库存 < 安全库存                -> WARNING / CRITICAL
//   EXPIRED     存在已过期 ACTIVE 批次             -> CRITICAL
//               DAYS 规则下临期批次                -> WARNING
//   HIGH_WASTE  损耗占比 > 阈值                    -> WARNING / CRITICAL(>= 2x)
//   SLOW_MOVING 有库存且周转率 < 阈值              -> INFO
// ==========================================

use crate::config::EngineConfig;
use crate::domain::alert::{
    AlertCandidate, AlertChange, AlertChangeKind, EffectiveRule, MaterialAlert, MaterialEvaluation,
    RuleThreshold,
};
use crate::domain::analytics::TurnoverMetrics;
use crate::domain::batch::{MaterialBatch, QTY_EPSILON};
use crate::domain::material::Material;
use crate::domain::types::{AlertLevel, AlertStatus, AlertType, BatchStatus, ThresholdType};
use crate::engine::analytics::AnalyticsEngine;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::now_ts;
use crate::engine::numbering::{new_id, next_alert_no};
use crate::engine::registry::MasterDataProvider;
use crate::engine::rule_resolver::RuleResolver;
use crate::perf::PerfGuard;
use crate::repository::{run_in_write_tx, AlertRepository, BatchRepository};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// 自动关闭时记录的处理人
pub const SYSTEM_ACTOR: &str = "SYSTEM";

// ==========================================
// 通知 Trait
// ==========================================

/// 预警通知者
///
/// 只接收"新建"与"升级"两类变更；投递方式由实现方决定
pub trait AlertNotifier: Send + Sync {
    fn notify(&self, change: &AlertChange) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作通知者
#[derive(Debug, Clone, Default)]
pub struct NoOpAlertNotifier;

impl AlertNotifier for NoOpAlertNotifier {
    fn notify(&self, change: &AlertChange) -> Result<(), Box<dyn Error + Send + Sync>> {
        debug!(
            "NoOpAlertNotifier: 跳过通知 - alert_no={}, type={}",
            change.alert.alert_no, change.alert.alert_type
        );
        Ok(())
    }
}

// ==========================================
// StockSnapshot - 单物料评估输入
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct StockSnapshot {
    pub material_id: String,
    pub current_stock: f64,
    pub safety_stock: Option<f64>,
    pub avg_daily_consumption: f64,
    pub days_to_stockout: Option<f64>,
}

impl StockSnapshot {
    /// 构建快照
    ///
    /// 安全库存: 物料显式设置优先，否则 日均 x (安全天数 + 提前期) x 缓冲系数（取 LOW_STOCK 规则）
    pub fn build(material: &Material, avg_daily_consumption: f64, low_stock: Option<&RuleThreshold>) -> Self {
        let safety_stock = if material.has_explicit_safety_stock() {
            material.safety_stock
        } else {
            low_stock.map(|t| avg_daily_consumption * (t.safety_days + t.lead_time_days) * t.buffer_ratio)
        };
        let days_to_stockout = if avg_daily_consumption > 0.0 {
            Some(material.current_stock / avg_daily_consumption)
        } else {
            None
        };
        Self {
            material_id: material.material_id.clone(),
            current_stock: material.current_stock,
            safety_stock,
            avg_daily_consumption,
            days_to_stockout,
        }
    }

    fn safety_or_zero(&self) -> f64 {
        self.safety_stock.unwrap_or(0.0)
    }
}

// ==========================================
// 单项评估（纯函数）
// ==========================================

/// 缺货: 库存 <= 0 且物料有安全库存或近期需求，空置物料不报
pub fn evaluate_shortage(snapshot: &StockSnapshot, rule: &EffectiveRule) -> Option<AlertCandidate> {
    if snapshot.current_stock > QTY_EPSILON {
        return None;
    }
    if snapshot.safety_or_zero() <= QTY_EPSILON && snapshot.avg_daily_consumption <= 0.0 {
        return None;
    }
    let shortage = (snapshot.safety_or_zero() - snapshot.current_stock).max(0.0);
    Some(AlertCandidate {
        alert_type: AlertType::Shortage,
        alert_level: AlertLevel::Urgent,
        shortage_qty: Some(shortage),
        trigger_value: Some(snapshot.current_stock),
        threshold_value: Some(rule.threshold.threshold_value),
        rule_id: rule.rule_id().map(str::to_string),
        message: format!("物料 {} 已缺货，当前库存 {}", snapshot.material_id, snapshot.current_stock),
    })
}

pub fn evaluate_low_stock(snapshot: &StockSnapshot, rule: &EffectiveRule) -> Option<AlertCandidate> {
    let safety = snapshot.safety_or_zero();
    let stock = snapshot.current_stock;
    if stock <= QTY_EPSILON || stock >= safety {
        return None;
    }

    let t = &rule.threshold;
    let trigger = match t.threshold_type {
        ThresholdType::Percentage => Some(stock / safety * 100.0),
        ThresholdType::Fixed => Some(stock),
        ThresholdType::Days => snapshot.days_to_stockout,
    };
    let critical = matches!(trigger, Some(v) if v <= t.threshold_value);
    let level = if critical {
        AlertLevel::Critical
    } else {
        AlertLevel::Warning
    };

    Some(AlertCandidate {
        alert_type: AlertType::LowStock,
        alert_level: level,
        shortage_qty: Some(safety - stock),
        trigger_value: trigger,
        threshold_value: Some(t.threshold_value),
        rule_id: rule.rule_id().map(str::to_string),
        message: format!(
            "物料 {} 库存 {:.2} 低于安全库存 {:.2}，缺口 {:.2}",
            snapshot.material_id,
            stock,
            safety,
            safety - stock
        ),
    })
}

/// 过期/临期评估（batches 为该物料全部批次，这里只看 ACTIVE）
pub fn evaluate_expiry(
    material_id: &str,
    batches: &[MaterialBatch],
    today: NaiveDate,
    rule: &EffectiveRule,
) -> Option<AlertCandidate> {
    let active: Vec<&MaterialBatch> = batches
        .iter()
        .filter(|b| b.status == BatchStatus::Active)
        .collect();

    let expired: Vec<&MaterialBatch> = active.iter().copied().filter(|b| b.is_past_expiry(today)).collect();
    if !expired.is_empty() {
        let qty: f64 = expired.iter().map(|b| b.current_qty).sum();
        let nos: Vec<&str> = expired.iter().map(|b| b.batch_no.as_str()).collect();
        return Some(AlertCandidate {
            alert_type: AlertType::Expired,
            alert_level: AlertLevel::Critical,
            shortage_qty: None,
            trigger_value: Some(expired.len() as f64),
            threshold_value: Some(rule.threshold.threshold_value),
            rule_id: rule.rule_id().map(str::to_string),
            message: format!(
                "物料 {} 有 {} 个批次已过期（{}），涉及数量 {:.2}",
                material_id,
                expired.len(),
                nos.join(", "),
                qty
            ),
        });
    }

    let t = &rule.threshold;
    if t.threshold_type != ThresholdType::Days || t.threshold_value <= 0.0 {
        return None;
    }
    let horizon = today + Duration::days(t.threshold_value.floor() as i64);
    let nearest = active
        .iter()
        .filter_map(|b| b.expire_date)
        .filter(|d| *d >= today && *d <= horizon)
        .min()?;
    let days_left = (nearest - today).num_days();

    Some(AlertCandidate {
        alert_type: AlertType::Expired,
        alert_level: AlertLevel::Warning,
        shortage_qty: None,
        trigger_value: Some(days_left as f64),
        threshold_value: Some(t.threshold_value),
        rule_id: rule.rule_id().map(str::to_string),
        message: format!("物料 {} 有批次将在 {} 天内到期", material_id, days_left),
    })
}

pub fn evaluate_high_waste(material_id: &str, waste_ratio: f64, rule: &EffectiveRule) -> Option<AlertCandidate> {
    let threshold = rule.threshold.threshold_value;
    if waste_ratio <= threshold {
        return None;
    }
    let level = if waste_ratio >= threshold * 2.0 {
        AlertLevel::Critical
    } else {
        AlertLevel::Warning
    };
    Some(AlertCandidate {
        alert_type: AlertType::HighWaste,
        alert_level: level,
        shortage_qty: None,
        trigger_value: Some(waste_ratio),
        threshold_value: Some(threshold),
        rule_id: rule.rule_id().map(str::to_string),
        message: format!(
            "物料 {} 损耗占比 {:.2}% 超过阈值 {:.2}%",
            material_id, waste_ratio, threshold
        ),
    })
}

pub fn evaluate_slow_moving(
    snapshot: &StockSnapshot,
    turnover: &TurnoverMetrics,
    rule: &EffectiveRule,
) -> Option<AlertCandidate> {
    let threshold = rule.threshold.threshold_value;
    if snapshot.current_stock <= QTY_EPSILON || turnover.turnover_rate >= threshold {
        return None;
    }
    Some(AlertCandidate {
        alert_type: AlertType::SlowMoving,
        alert_level: AlertLevel::Info,
        shortage_qty: None,
        trigger_value: Some(turnover.turnover_rate),
        threshold_value: Some(threshold),
        rule_id: rule.rule_id().map(str::to_string),
        message: format!(
            "物料 {} 近 {} 天周转率 {:.4} 低于阈值 {:.4}",
            snapshot.material_id, turnover.window_days, turnover.turnover_rate, threshold
        ),
    })
}

// ==========================================
// AlertEngine - 预警引擎
// ==========================================
pub struct AlertEngine {
    conn: Arc<Mutex<Connection>>,
    master_data: Arc<dyn MasterDataProvider>,
    batch_repo: Arc<BatchRepository>,
    alert_repo: Arc<AlertRepository>,
    rules: Arc<RuleResolver>,
    analytics: Arc<AnalyticsEngine>,
    config: EngineConfig,
    notifier: Arc<dyn AlertNotifier>,
}

impl AlertEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        master_data: Arc<dyn MasterDataProvider>,
        batch_repo: Arc<BatchRepository>,
        alert_repo: Arc<AlertRepository>,
        rules: Arc<RuleResolver>,
        analytics: Arc<AnalyticsEngine>,
        config: EngineConfig,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            conn,
            master_data,
            batch_repo,
            alert_repo,
            rules,
            analytics,
            config,
            notifier,
        }
    }

    /// 评估单个物料并落库
    ///
    /// # 流程
    /// 1. 读取主数据、日均消耗、各类型生效规则
    /// 2. 纯函数评估各类型
    /// 3. 单事务内去重落库（新建 / 更新 / 自动关闭）
    /// 4. 提交后通知新建与升级的预警
    #[instrument(skip(self), fields(material_id = %material_id, today = %today))]
    pub fn evaluate_material(&self, material_id: &str, today: NaiveDate) -> EngineResult<MaterialEvaluation> {
        let _perf = PerfGuard::new("evaluate_material");
        let material = self
            .master_data
            .get_material(material_id)?
            .ok_or_else(|| EngineError::not_found("Material", material_id))?;

        let avg = self.analytics.avg_daily_consumption(
            material_id,
            self.config.avg_consumption_window_days,
            today,
        )?;

        let mut rules: Vec<EffectiveRule> = Vec::new();
        for alert_type in AlertType::ALL {
            if let Some(rule) = self
                .rules
                .resolve(material_id, material.category_id.as_deref(), alert_type)?
            {
                rules.push(rule);
            }
        }

        let low_stock_threshold = rules
            .iter()
            .find(|r| r.alert_type == AlertType::LowStock)
            .map(|r| r.threshold);
        let snapshot = StockSnapshot::build(&material, avg, low_stock_threshold.as_ref());

        // 逐类型评估（外部数据按需读取）
        let mut outcomes: Vec<(AlertType, Option<AlertCandidate>)> = Vec::with_capacity(rules.len());
        for rule in &rules {
            let candidate = match rule.alert_type {
                AlertType::Shortage => evaluate_shortage(&snapshot, rule),
                AlertType::LowStock => evaluate_low_stock(&snapshot, rule),
                AlertType::Expired => {
                    let batches = self.batch_repo.list_by_material(material_id)?;
                    evaluate_expiry(material_id, &batches, today, rule)
                }
                AlertType::HighWaste => {
                    let ratio =
                        self.analytics
                            .waste_ratio(material_id, self.config.waste_window_days, today)?;
                    evaluate_high_waste(material_id, ratio, rule)
                }
                AlertType::SlowMoving => {
                    let turnover = self.analytics.turnover_rate(
                        material_id,
                        self.config.turnover_window_days,
                        today,
                    )?;
                    evaluate_slow_moving(&snapshot, &turnover, rule)
                }
            };
            debug!(alert_type = %rule.alert_type, hit = candidate.is_some(), "评估完成");
            outcomes.push((rule.alert_type, candidate));
        }

        let changes = self.persist(&snapshot, outcomes)?;
        self.dispatch(&changes);

        Ok(MaterialEvaluation {
            material_id: material_id.to_string(),
            current_stock: snapshot.current_stock,
            safety_stock: snapshot.safety_stock,
            avg_daily_consumption: snapshot.avg_daily_consumption,
            days_to_stockout: snapshot.days_to_stockout,
            changes,
        })
    }

    fn persist(
        &self,
        snapshot: &StockSnapshot,
        outcomes: Vec<(AlertType, Option<AlertCandidate>)>,
    ) -> EngineResult<Vec<AlertChange>> {
        let now = now_ts();
        let auto_resolve = self.config.auto_resolve_cleared;

        run_in_write_tx(&self.conn, |tx| -> EngineResult<Vec<AlertChange>> {
            let mut changes = Vec::new();
            for (alert_type, candidate) in outcomes {
                let existing = AlertRepository::find_active_in(tx, &snapshot.material_id, alert_type)?;
                match (candidate, existing) {
                    (Some(candidate), Some(mut alert)) => {
                        let escalated = candidate.alert_level > alert.alert_level;
                        apply_candidate(&mut alert, snapshot, candidate, now);
                        alert.trigger_count += 1;
                        AlertRepository::update_active_in(tx, &alert)?;
                        changes.push(AlertChange {
                            kind: AlertChangeKind::Updated,
                            alert,
                            escalated,
                        });
                    }
                    (Some(candidate), None) => {
                        let alert = new_alert(snapshot, candidate, now);
                        AlertRepository::insert_in(tx, &alert)?;
                        info!(
                            alert_no = %alert.alert_no,
                            alert_type = %alert.alert_type,
                            level = %alert.alert_level,
                            "预警已创建"
                        );
                        changes.push(AlertChange {
                            kind: AlertChangeKind::Created,
                            alert,
                            escalated: false,
                        });
                    }
                    (None, Some(mut alert)) if auto_resolve => {
                        AlertRepository::close_in(
                            tx,
                            &alert.alert_id,
                            AlertStatus::Resolved,
                            Some(SYSTEM_ACTOR),
                            Some("条件已解除，自动关闭"),
                            now,
                        )?;
                        alert.status = AlertStatus::Resolved;
                        alert.resolved_by = Some(SYSTEM_ACTOR.to_string());
                        alert.resolved_at = Some(now);
                        alert.resolution_note = Some("条件已解除，自动关闭".to_string());
                        alert.updated_at = now;
                        info!(alert_no = %alert.alert_no, "预警已自动关闭");
                        changes.push(AlertChange {
                            kind: AlertChangeKind::AutoResolved,
                            alert,
                            escalated: false,
                        });
                    }
                    (None, _) => {}
                }
            }
            Ok(changes)
        })
    }

    fn dispatch(&self, changes: &[AlertChange]) {
        for change in changes {
            let notify = change.kind == AlertChangeKind::Created || change.escalated;
            if !notify {
                continue;
            }
            if let Err(e) = self.notifier.notify(change) {
                warn!(alert_no = %change.alert.alert_no, error = %e, "预警通知失败（已忽略）");
            }
        }
    }

    // ==========================================
    // 人工处理
    // ==========================================

    /// 处理预警: ACTIVE -> RESOLVED / IGNORED / CLOSED
    pub fn resolve_alert(
        &self,
        alert_id: &str,
        outcome: AlertStatus,
        note: Option<&str>,
        resolved_by: &str,
    ) -> EngineResult<MaterialAlert> {
        if outcome == AlertStatus::Active {
            return Err(EngineError::validation("outcome", "处理结果不能为 ACTIVE"));
        }
        if resolved_by.trim().is_empty() {
            return Err(EngineError::validation("resolved_by", "处理人不能为空"));
        }
        let now = now_ts();

        let alert = run_in_write_tx(&self.conn, |tx| -> EngineResult<MaterialAlert> {
            let mut alert = AlertRepository::find_by_id_in(tx, alert_id)?
                .ok_or_else(|| EngineError::not_found("MaterialAlert", alert_id))?;
            if alert.status != AlertStatus::Active {
                return Err(EngineError::invalid_state("MaterialAlert", alert_id, alert.status, "resolve"));
            }
            AlertRepository::close_in(tx, alert_id, outcome, Some(resolved_by), note, now)?;
            alert.status = outcome;
            alert.resolved_by = Some(resolved_by.to_string());
            alert.resolved_at = Some(now);
            alert.resolution_note = note.map(str::to_string);
            alert.updated_at = now;
            Ok(alert)
        })?;

        info!(alert_no = %alert.alert_no, outcome = %outcome, resolved_by, "预警已处理");
        Ok(alert)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_alert(&self, alert_id: &str) -> EngineResult<MaterialAlert> {
        self.alert_repo
            .find_by_id(alert_id)?
            .ok_or_else(|| EngineError::not_found("MaterialAlert", alert_id))
    }

    pub fn list_active_alerts(&self, material_id: Option<&str>) -> EngineResult<Vec<MaterialAlert>> {
        Ok(self.alert_repo.list_active(material_id)?)
    }

    pub fn alert_history(&self, material_id: &str) -> EngineResult<Vec<MaterialAlert>> {
        Ok(self.alert_repo.list_by_material(material_id)?)
    }
}

fn apply_candidate(alert: &mut MaterialAlert, snapshot: &StockSnapshot, candidate: AlertCandidate, now: NaiveDateTime) {
    alert.alert_level = candidate.alert_level;
    alert.current_stock = snapshot.current_stock;
    alert.safety_stock = snapshot.safety_stock;
    alert.shortage_qty = candidate.shortage_qty;
    alert.avg_daily_consumption = Some(snapshot.avg_daily_consumption);
    alert.days_to_stockout = snapshot.days_to_stockout;
    alert.trigger_value = candidate.trigger_value;
    alert.threshold_value = candidate.threshold_value;
    alert.rule_id = candidate.rule_id;
    alert.message = candidate.message;
    alert.updated_at = now;
}

fn new_alert(snapshot: &StockSnapshot, candidate: AlertCandidate, now: NaiveDateTime) -> MaterialAlert {
    let mut alert = MaterialAlert {
        alert_id: new_id(),
        alert_no: next_alert_no(now),
        material_id: snapshot.material_id.clone(),
        alert_type: candidate.alert_type,
        alert_level: candidate.alert_level,
        status: AlertStatus::Active,
        current_stock: snapshot.current_stock,
        safety_stock: snapshot.safety_stock,
        shortage_qty: None,
        avg_daily_consumption: None,
        days_to_stockout: None,
        trigger_value: None,
        threshold_value: None,
        rule_id: None,
        message: String::new(),
        trigger_count: 1,
        resolved_by: None,
        resolved_at: None,
        resolution_note: None,
        created_at: now,
        updated_at: now,
    };
    apply_candidate(&mut alert, snapshot, candidate, now);
    alert
}
