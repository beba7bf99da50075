// ==========================================
// 物料批次追溯引擎 - 行映射工具
// ==========================================
// 职责: 日期/时间戳/枚举列的统一编解码
// 格式: DATE = %Y-%m-%d, TIMESTAMP = %Y-%m-%d %H:%M:%S
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use std::str::FromStr;

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

pub fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FMT).to_string()
}

/// 尽力解析时间戳
///
/// # 支持格式
/// - `%Y-%m-%d %H:%M:%S`
/// - `%Y-%m-%d %H:%M:%S%.f`
/// - `%Y-%m-%dT%H:%M:%S`
/// - RFC3339
pub fn parse_ts_best_effort(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, TS_FMT) {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    None
}

/// 读取必填时间戳列
pub fn get_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    parse_ts_best_effort(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("无法解析时间戳: {}", raw).into(),
        )
    })
}

/// 读取可空时间戳列
pub fn get_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_ts_best_effort(&s)))
}

/// 读取可空日期列
pub fn get_opt_date(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FMT).ok()))
}

/// 读取枚举列（TEXT -> FromStr）
pub fn get_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// 构建 IN 子句的 SQL 片段，空列表返回永假条件
pub fn build_in_clause<T: AsRef<str>>(column_name: &str, values: &[T]) -> String {
    if values.is_empty() {
        return "1 = 0".to_string();
    }
    let placeholders = values.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    format!("{} IN ({})", column_name, placeholders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ts_best_effort() {
        let expected = NaiveDate::from_ymd_opt(2026, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(parse_ts_best_effort("2026-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_ts_best_effort("2026-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_ts_best_effort("2026-01-02T03:04:05+00:00"), Some(expected));
        assert_eq!(parse_ts_best_effort(""), None);
    }

    #[test]
    fn test_build_in_clause() {
        assert_eq!(build_in_clause("batch_id", &["a", "b"]), "batch_id IN (?, ?)");
        let empty: Vec<String> = vec![];
        assert_eq!(build_in_clause("batch_id", &empty), "1 = 0");
    }
}
