// ==========================================
// 成衣生产流转系统 - SQLite 连接与事务基础设施
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键 + busy_timeout)
// - 统一建库 DDL (幂等)
// - 统一写事务入口: BEGIN IMMEDIATE + 有界等待
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use crate::repository::error::{RepositoryError, RepositoryResult};

/// 进程内共享连接
pub type SharedConnection = Arc<Mutex<Connection>>;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 连接锁重试间隔（毫秒）
const LOCK_RETRY_INTERVAL_MS: u64 = 5;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 时间戳存储格式
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置; 超时后返回 SQLITE_BUSY 而不是无限等待
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表并包装为共享连接
pub fn open_shared_connection(db_path: &str) -> RepositoryResult<SharedConnection> {
    let conn = open_sqlite_connection(db_path)?;
    ensure_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
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

// ==========================================
// 建库 DDL
// ==========================================

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL DEFAULT 'global',
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS material_color_variant (
    variant_id TEXT PRIMARY KEY,
    material_id TEXT NOT NULL,
    material_name TEXT NOT NULL,
    color TEXT NOT NULL,
    unit TEXT NOT NULL,
    stock REAL NOT NULL CHECK (stock >= 0),
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS production_batch (
    batch_id TEXT PRIMARY KEY,
    batch_sku TEXT NOT NULL UNIQUE,
    product_id TEXT NOT NULL,
    product_name TEXT NOT NULL,
    status TEXT NOT NULL,
    target_quantity INTEGER NOT NULL CHECK (target_quantity >= 0),
    total_rolls INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS size_color_request (
    request_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL REFERENCES production_batch(batch_id) ON DELETE CASCADE,
    product_size TEXT NOT NULL,
    color TEXT NOT NULL,
    requested_pieces INTEGER NOT NULL CHECK (requested_pieces >= 0),
    UNIQUE (batch_id, product_size, color)
);

CREATE TABLE IF NOT EXISTS material_allocation (
    allocation_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL REFERENCES production_batch(batch_id) ON DELETE CASCADE,
    variant_id TEXT NOT NULL REFERENCES material_color_variant(variant_id),
    color TEXT NOT NULL,
    roll_quantity INTEGER NOT NULL CHECK (roll_quantity >= 0),
    allocated_qty REAL NOT NULL CHECK (allocated_qty > 0),
    released INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    released_at TEXT
);

CREATE TABLE IF NOT EXISTS stage_task (
    task_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL REFERENCES production_batch(batch_id) ON DELETE CASCADE,
    stage TEXT NOT NULL,
    status TEXT NOT NULL,
    assigned_to TEXT,
    material_received REAL NOT NULL DEFAULT 0,
    pieces_received INTEGER NOT NULL DEFAULT 0,
    pieces_completed INTEGER NOT NULL DEFAULT 0,
    reject_pieces INTEGER NOT NULL DEFAULT 0,
    waste_qty REAL NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    verified_by TEXT,
    verified_at TEXT,
    notes TEXT,
    UNIQUE (batch_id, stage)
);

CREATE TABLE IF NOT EXISTS cutting_result (
    batch_id TEXT NOT NULL REFERENCES production_batch(batch_id) ON DELETE CASCADE,
    product_size TEXT NOT NULL,
    color TEXT NOT NULL,
    actual_pieces INTEGER NOT NULL CHECK (actual_pieces >= 0),
    is_confirmed INTEGER NOT NULL DEFAULT 0,
    confirmed_by TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (batch_id, product_size, color)
);

CREATE TABLE IF NOT EXISTS stage_progress_draft (
    task_id TEXT NOT NULL REFERENCES stage_task(task_id) ON DELETE CASCADE,
    product_size TEXT NOT NULL,
    color TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity >= 0),
    updated_at TEXT NOT NULL,
    PRIMARY KEY (task_id, product_size, color)
);

CREATE TABLE IF NOT EXISTS sub_batch (
    sub_batch_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL REFERENCES production_batch(batch_id) ON DELETE CASCADE,
    sub_batch_sku TEXT NOT NULL UNIQUE,
    stage TEXT NOT NULL,
    sequence_no INTEGER NOT NULL,
    status TEXT NOT NULL,
    submitted_by TEXT NOT NULL,
    submitted_at TEXT NOT NULL,
    verified_by TEXT,
    verified_at TEXT,
    notes TEXT,
    UNIQUE (batch_id, stage, sequence_no)
);

CREATE TABLE IF NOT EXISTS sub_batch_item (
    sub_batch_id TEXT NOT NULL REFERENCES sub_batch(sub_batch_id) ON DELETE CASCADE,
    product_size TEXT NOT NULL,
    color TEXT NOT NULL,
    good_quantity INTEGER NOT NULL CHECK (good_quantity >= 0),
    reject_sewing INTEGER NOT NULL DEFAULT 0 CHECK (reject_sewing >= 0),
    reject_kotor INTEGER NOT NULL DEFAULT 0 CHECK (reject_kotor >= 0),
    reject_sobek INTEGER NOT NULL DEFAULT 0 CHECK (reject_sobek >= 0),
    reject_rusak_jahit INTEGER NOT NULL DEFAULT 0 CHECK (reject_rusak_jahit >= 0),
    PRIMARY KEY (sub_batch_id, product_size, color)
);

CREATE TABLE IF NOT EXISTS timeline_event (
    event_seq INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL UNIQUE,
    batch_id TEXT NOT NULL REFERENCES production_batch(batch_id) ON DELETE CASCADE,
    event TEXT NOT NULL,
    actor_id TEXT,
    details_json TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sub_batch_batch_stage ON sub_batch(batch_id, stage);
CREATE INDEX IF NOT EXISTS idx_allocation_batch ON material_allocation(batch_id);
CREATE INDEX IF NOT EXISTS idx_timeline_batch ON timeline_event(batch_id);
"#;

/// 建表 (幂等) 并记录 schema_version
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

// ==========================================
// 连接锁与写事务
// ==========================================

/// 在有界时间内获取共享连接
///
/// 超过 `wait` 仍未拿到锁时返回 `RepositoryError::Busy`,不会无限阻塞
pub fn acquire_connection(
    conn: &SharedConnection,
    wait: Duration,
) -> RepositoryResult<MutexGuard<'_, Connection>> {
    let deadline = Instant::now() + wait;
    loop {
        match conn.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::WouldBlock) => {
                if Instant::now() >= deadline {
                    return Err(RepositoryError::Busy(format!(
                        "连接锁等待超过 {}ms",
                        wait.as_millis()
                    )));
                }
                std::thread::sleep(Duration::from_millis(LOCK_RETRY_INTERVAL_MS));
            }
            Err(TryLockError::Poisoned(e)) => {
                return Err(RepositoryError::LockError(e.to_string()));
            }
        }
    }
}

/// 在 BEGIN IMMEDIATE 写事务中执行闭包
///
/// 说明：
/// - IMMEDIATE 在第一次读取前就取得写锁,读-校验-写在同一原子单元内完成
/// - 闭包返回 Err 时事务随 drop 回滚,不会留下部分写入
pub fn with_immediate_transaction<T, E, F>(conn: &SharedConnection, wait: Duration, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    E: From<RepositoryError>,
{
    let mut guard = acquire_connection(conn, wait)?;
    let tx = guard
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(RepositoryError::from)?;
    let value = f(&tx)?;
    tx.commit().map_err(RepositoryError::from)?;
    Ok(value)
}

// ==========================================
// 时间戳辅助
// ==========================================

/// 当前时间 (UTC, 秒精度)
pub fn now_ts() -> NaiveDateTime {
    let now = chrono::Utc::now().naive_utc();
    parse_ts(&format_ts(&now)).unwrap_or(now)
}

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).ok()
}

/// 行映射用: 必填时间列
pub fn ts_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("无效时间戳: {}", raw).into(),
        )
    })
}

/// 行映射用: 可空时间列
pub fn opt_ts_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_ts(&s).map(Some).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("无效时间戳: {}", s).into(),
            )
        }),
    }
}

/// 行映射用: 枚举字符串列
pub fn parsed_column<T>(
    row: &rusqlite::Row,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("无效枚举值: {}", raw).into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_acquire_connection_times_out_when_held() {
        let conn = Connection::open_in_memory().unwrap();
        let shared: SharedConnection = Arc::new(Mutex::new(conn));
        let _held = shared.lock().unwrap();

        let result = acquire_connection(&shared, Duration::from_millis(20));
        assert!(matches!(result, Err(RepositoryError::Busy(_))));
    }

    #[test]
    fn test_failed_closure_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let shared: SharedConnection = Arc::new(Mutex::new(conn));

        let result: Result<(), RepositoryError> =
            with_immediate_transaction(&shared, Duration::from_millis(100), |tx| {
                tx.execute(
                    "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', 'k', 'v')",
                    [],
                )?;
                Err(RepositoryError::ValidationError("abort".to_string()))
            });
        assert!(result.is_err());

        let guard = shared.lock().unwrap();
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM config_kv", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let ts = now_ts();
        assert_eq!(parse_ts(&format_ts(&ts)), Some(ts));
    }
}
