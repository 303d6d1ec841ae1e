// ==========================================
// 成衣生产流转系统 - 应用状态
// ==========================================
// 职责: 打开共享连接、加载配置、组装引擎与 API 实例
// ==========================================

use std::sync::Arc;

use crate::api::ProductionApi;
use crate::config::{ConfigManager, WorkflowConfig};
use crate::db::{open_shared_connection, SharedConnection};
use crate::engine::{EngineContext, TimelineRecorder, TimelineSink};
use crate::repository::error::RepositoryResult;

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "GARMENT_FLOW_DB_PATH";

/// 应用状态
///
/// 所有 API 共享同一个 SQLite 连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 生效中的流转配置
    pub config: WorkflowConfig,

    /// 配置管理
    pub config_manager: Arc<ConfigManager>,

    /// 生产流转API
    pub production_api: Arc<ProductionApi>,

    conn: SharedConnection,
}

impl AppState {
    /// 创建新的AppState实例 (不挂外部时间线接收者)
    pub fn new(db_path: String) -> RepositoryResult<Self> {
        Self::build(db_path, TimelineRecorder::none())
    }

    /// 创建带时间线接收者的AppState (如审计/通知下游)
    pub fn with_timeline_sink(db_path: String, sink: Arc<dyn TimelineSink>) -> RepositoryResult<Self> {
        Self::build(db_path, TimelineRecorder::with_sink(sink))
    }

    fn build(db_path: String, recorder: TimelineRecorder) -> RepositoryResult<Self> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_shared_connection(&db_path)?;

        // ==========================================
        // 加载配置
        // ==========================================
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let config = config_manager.load_workflow_config()?;
        tracing::info!(
            lock_wait_ms = config.lock_wait_ms,
            batch_sku_prefix = %config.batch_sku_prefix,
            release_stock_on_late_cancel = config.release_stock_on_late_cancel,
            "流转配置已加载"
        );

        // ==========================================
        // 初始化引擎与API
        // ==========================================
        let ctx = EngineContext::new(conn.clone(), config.clone(), Arc::new(recorder));
        let production_api = Arc::new(ProductionApi::new(ctx));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            config,
            config_manager,
            production_api,
            conn,
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.conn
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 GARMENT_FLOW_DB_PATH (非空时)
/// - 否则: 用户数据目录/garment-production-flow/garment_flow.db
/// - 拿不到用户数据目录时: ./garment_flow.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./garment_flow.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("garment-production-flow");
        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("garment_flow.db");
        }
    }

    path.to_string_lossy().to_string()
}
