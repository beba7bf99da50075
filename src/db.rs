// ==========================================
// 物料批次追溯引擎 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 幂等建表，记录 schema_version
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    crate::perf::install_sqlite_tracing(&mut conn);
    Ok(conn)
}

/// 打开内存库并建表（单元测试/演示用）
pub fn open_memory_connection() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 幂等建表
///
/// 说明：
/// - material / project / work_order 为外部主数据镜像，本引擎只读
/// - material_consumption 通过触发器保证只追加
/// - material_alert 的部分唯一索引保证同一 (material_id, alert_type) 至多一条 ACTIVE
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let current = read_schema_version(conn)?;
    match current {
        Some(v) if v >= CURRENT_SCHEMA_VERSION => {}
        Some(v) => {
            tracing::warn!(
                "数据库 schema_version={} 低于期望版本 {}，已按当前定义补齐缺失表",
                v,
                CURRENT_SCHEMA_VERSION
            );
            conn.execute(
                "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
                [CURRENT_SCHEMA_VERSION],
            )?;
        }
        None => {
            conn.execute(
                "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
                [CURRENT_SCHEMA_VERSION],
            )?;
        }
    }

    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS material (
    material_id TEXT PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    unit TEXT NOT NULL,
    category_id TEXT,
    current_stock REAL NOT NULL DEFAULT 0,
    safety_stock REAL,
    standard_price REAL NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS project (
    project_id TEXT PRIMARY KEY,
    project_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS work_order (
    work_order_id TEXT PRIMARY KEY,
    work_order_no TEXT NOT NULL,
    project_id TEXT
);

CREATE TABLE IF NOT EXISTS material_batch (
    batch_id TEXT PRIMARY KEY,
    batch_no TEXT NOT NULL UNIQUE,
    barcode TEXT UNIQUE,
    material_id TEXT NOT NULL REFERENCES material(material_id),
    initial_qty REAL NOT NULL CHECK (initial_qty > 0),
    current_qty REAL NOT NULL CHECK (current_qty >= 0),
    consumed_qty REAL NOT NULL DEFAULT 0 CHECK (consumed_qty >= 0),
    reserved_qty REAL NOT NULL DEFAULT 0 CHECK (reserved_qty >= 0),
    quality_status TEXT NOT NULL,
    status TEXT NOT NULL,
    lock_reason TEXT,
    production_date TEXT,
    expire_date TEXT,
    supplier_name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_material_batch_material ON material_batch(material_id, status);
CREATE INDEX IF NOT EXISTS idx_material_batch_expire ON material_batch(status, expire_date);

CREATE TABLE IF NOT EXISTS material_consumption (
    consumption_id TEXT PRIMARY KEY,
    consumption_no TEXT NOT NULL UNIQUE,
    material_id TEXT NOT NULL REFERENCES material(material_id),
    batch_id TEXT REFERENCES material_batch(batch_id),
    consumption_qty REAL NOT NULL CHECK (consumption_qty > 0),
    standard_qty REAL,
    variance_qty REAL,
    variance_rate REAL,
    is_waste INTEGER NOT NULL DEFAULT 0,
    consumption_type TEXT NOT NULL,
    project_id TEXT,
    work_order_id TEXT,
    unit_price REAL NOT NULL,
    total_cost REAL NOT NULL,
    consumed_at TEXT NOT NULL,
    operator TEXT,
    remark TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_consumption_batch ON material_consumption(batch_id, consumed_at);
CREATE INDEX IF NOT EXISTS idx_consumption_project ON material_consumption(project_id);
CREATE INDEX IF NOT EXISTS idx_consumption_work_order ON material_consumption(work_order_id);
CREATE INDEX IF NOT EXISTS idx_consumption_material_time ON material_consumption(material_id, consumed_at);

CREATE TRIGGER IF NOT EXISTS trg_consumption_no_update
BEFORE UPDATE ON material_consumption
BEGIN
    SELECT RAISE(ABORT, 'material_consumption is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_consumption_no_delete
BEFORE DELETE ON material_consumption
BEGIN
    SELECT RAISE(ABORT, 'material_consumption is append-only');
END;

CREATE TABLE IF NOT EXISTS material_alert (
    alert_id TEXT PRIMARY KEY,
    alert_no TEXT NOT NULL UNIQUE,
    material_id TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    alert_level TEXT NOT NULL,
    status TEXT NOT NULL,
    current_stock REAL NOT NULL,
    safety_stock REAL,
    shortage_qty REAL,
    avg_daily_consumption REAL,
    days_to_stockout REAL,
    trigger_value REAL,
    threshold_value REAL,
    rule_id TEXT,
    message TEXT NOT NULL,
    trigger_count INTEGER NOT NULL DEFAULT 1,
    resolved_by TEXT,
    resolved_at TEXT,
    resolution_note TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_material_alert_active
    ON material_alert(material_id, alert_type) WHERE status = 'ACTIVE';

CREATE TABLE IF NOT EXISTS material_alert_rule (
    rule_id TEXT PRIMARY KEY,
    material_id TEXT,
    category_id TEXT,
    alert_type TEXT NOT NULL,
    threshold_type TEXT NOT NULL,
    threshold_value REAL NOT NULL,
    safety_days REAL NOT NULL DEFAULT 0,
    lead_time_days REAL NOT NULL DEFAULT 0,
    buffer_ratio REAL NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_alert_rule_type ON material_alert_rule(alert_type, is_active);
"#;
