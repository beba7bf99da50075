// ==========================================
// 物料批次追溯引擎 - 单号生成
// ==========================================
// 格式: {前缀}{yyyyMMddHHmmss}{8位随机十六进制}
// 唯一性最终由表级 UNIQUE 约束兜底
// ==========================================

use chrono::NaiveDateTime;
use uuid::Uuid;

pub const CONSUMPTION_NO_PREFIX: &str = "MC";
pub const ALERT_NO_PREFIX: &str = "MA";

fn next_no(prefix: &str, at: NaiveDateTime) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}{}",
        prefix,
        at.format("%Y%m%d%H%M%S"),
        suffix[..8].to_uppercase()
    )
}

pub fn next_consumption_no(at: NaiveDateTime) -> String {
    next_no(CONSUMPTION_NO_PREFIX, at)
}

pub fn next_alert_no(at: NaiveDateTime) -> String {
    next_no(ALERT_NO_PREFIX, at)
}

/// 实体主键
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
