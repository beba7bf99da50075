// Maintenance entry point for an external scheduler: expiry sweep + full alert recomputation.
//
// Usage:
//   material-trace-maintenance [db_path] [YYYY-MM-DD]
//
// db_path defaults to MATERIAL_TRACE_DB_PATH / the user data directory; the date defaults to today (UTC).

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use material_trace::app::{get_default_db_path, EngineState};
use material_trace::logging;

fn main() -> anyhow::Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let db_path = args
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(get_default_db_path);

    let today = match args.next() {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .with_context(|| format!("无法解析日期（应为 YYYY-MM-DD）: {}", raw))?,
        None => Utc::now().date_naive(),
    };

    tracing::info!("{} v{}", material_trace::APP_NAME, material_trace::VERSION);
    tracing::info!("使用数据库: {}, 基准日期: {}", db_path, today);

    let state = EngineState::open(&db_path)?;
    let summary = state.maintenance.run(today)?;

    println!(
        "today={} expired_batches={} materials_evaluated={} alert_changes={} failures={}",
        today,
        summary.expired_batches,
        summary.materials_evaluated,
        summary.alert_changes,
        summary.failures.len()
    );
    Ok(())
}
