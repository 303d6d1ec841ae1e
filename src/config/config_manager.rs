// ==========================================
// 成衣生产流转系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::MutexGuard;
use std::time::Duration;

use crate::db::{acquire_connection, format_ts, now_ts, SharedConnection, DEFAULT_BUSY_TIMEOUT_MS};
use crate::repository::error::{RepositoryError, RepositoryResult};

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 并发
    pub const LOCK_WAIT_MS: &str = "workflow/lock_wait_ms";

    // 编号
    pub const BATCH_SKU_PREFIX: &str = "workflow/batch_sku_prefix";

    // 取消策略
    pub const RELEASE_STOCK_ON_LATE_CANCEL: &str = "workflow/release_stock_on_late_cancel";
}

const GLOBAL_SCOPE: &str = "global";
const DEFAULT_SKU_PREFIX: &str = "PB";

// ==========================================
// WorkflowConfig - 流转引擎配置快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// 连接锁有界等待 (毫秒)
    pub lock_wait_ms: u64,
    /// 批次编号前缀, 生成形如 PB-20250101-001
    pub batch_sku_prefix: String,
    /// 裁剪开始后取消批次是否仍归还物料
    pub release_stock_on_late_cancel: bool,
}

impl WorkflowConfig {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: DEFAULT_BUSY_TIMEOUT_MS,
            batch_sku_prefix: DEFAULT_SKU_PREFIX.to_string(),
            release_stock_on_late_cancel: false,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: SharedConnection,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        acquire_connection(&self.conn, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 写入 global scope 配置 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(RepositoryError::field("key", "配置键不能为空"));
        }

        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
            params![GLOBAL_SCOPE, key, value, format_ts(&now_ts())],
        )?;
        tracing::info!(config_key = key, value = value, "配置已更新");
        Ok(())
    }

    /// 获取所有 global 配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        serde_json::to_string(&json!(config_map))
            .map_err(|e| RepositoryError::InternalError(e.to_string()))
    }

    // ===== 流转引擎配置 =====

    pub fn get_lock_wait_ms(&self) -> RepositoryResult<u64> {
        let default = DEFAULT_BUSY_TIMEOUT_MS.to_string();
        let value = self.get_config_or_default(config_keys::LOCK_WAIT_MS, &default)?;
        match value.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => Ok(ms),
            _ => {
                tracing::warn!(
                    config_key = config_keys::LOCK_WAIT_MS,
                    raw_value = %value,
                    "锁等待配置格式错误，使用默认值"
                );
                Ok(DEFAULT_BUSY_TIMEOUT_MS)
            }
        }
    }

    pub fn get_batch_sku_prefix(&self) -> RepositoryResult<String> {
        let value = self.get_config_or_default(config_keys::BATCH_SKU_PREFIX, DEFAULT_SKU_PREFIX)?;
        let prefix = value.trim().to_uppercase();
        if prefix.is_empty() {
            Ok(DEFAULT_SKU_PREFIX.to_string())
        } else {
            Ok(prefix)
        }
    }

    pub fn get_release_stock_on_late_cancel(&self) -> RepositoryResult<bool> {
        let value = self.get_config_or_default(config_keys::RELEASE_STOCK_ON_LATE_CANCEL, "false")?;
        Ok(matches!(
            value.trim().to_lowercase().as_str(),
            "true" | "1" | "yes"
        ))
    }

    /// 汇总为引擎使用的配置快照
    pub fn load_workflow_config(&self) -> RepositoryResult<WorkflowConfig> {
        Ok(WorkflowConfig {
            lock_wait_ms: self.get_lock_wait_ms()?,
            batch_sku_prefix: self.get_batch_sku_prefix()?,
            release_stock_on_late_cancel: self.get_release_stock_on_late_cancel()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn setup() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_defaults_when_empty() {
        let manager = setup();
        assert_eq!(manager.load_workflow_config().unwrap(), WorkflowConfig::default());
    }

    #[test]
    fn test_overrides_are_read() {
        let manager = setup();
        manager.set_global_config_value(config_keys::LOCK_WAIT_MS, "250").unwrap();
        manager.set_global_config_value(config_keys::BATCH_SKU_PREFIX, "kmj").unwrap();
        manager
            .set_global_config_value(config_keys::RELEASE_STOCK_ON_LATE_CANCEL, "true")
            .unwrap();

        let config = manager.load_workflow_config().unwrap();
        assert_eq!(config.lock_wait_ms, 250);
        assert_eq!(config.lock_wait(), Duration::from_millis(250));
        assert_eq!(config.batch_sku_prefix, "KMJ");
        assert!(config.release_stock_on_late_cancel);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let manager = setup();
        manager.set_global_config_value(config_keys::LOCK_WAIT_MS, "abc").unwrap();
        manager.set_global_config_value(config_keys::BATCH_SKU_PREFIX, "  ").unwrap();
        let config = manager.load_workflow_config().unwrap();
        assert_eq!(config.lock_wait_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert_eq!(config.batch_sku_prefix, "PB");
    }

    #[test]
    fn test_snapshot_contains_values() {
        let manager = setup();
        manager.set_global_config_value(config_keys::BATCH_SKU_PREFIX, "PB").unwrap();
        let snapshot = manager.get_config_snapshot().unwrap();
        assert!(snapshot.contains("workflow/batch_sku_prefix"));
    }
}
