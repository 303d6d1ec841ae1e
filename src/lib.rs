// ==========================================
// 成衣生产流转系统 - 核心库
// ==========================================
// 范围: 生产批次状态机、物料分配、工序任务、子批次对账
// 技术栈: Rust + SQLite
// 不含 Web/表单/报表页面,由外层调用 api::ProductionApi
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/事务）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ActorContext, ActorRole, BatchStatus, StageKind, SubBatchStatus, TaskStatus};

// 领域实体
pub use domain::{
    AllocationRequest, BatchDetail, BatchDraft, CellKey, CellQuantity, CellSubmission,
    CompletionReport, MaterialAllocation, MaterialColorVariant, ProductionBatch, RejectBreakdown,
    SizeColorRequestDraft, StageTask, SubBatch, TimelineEvent, TimelineEventKind,
};

// 引擎
pub use engine::{
    AllocationPlanner, BatchFlow, EngineContext, EngineError, EngineResult, MaterialLedger,
    ReconciliationReport, StageTaskController, SubBatchReconciler, TimelineSink,
};

// API
pub use api::{ApiError, ApiResult, ProductionApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "成衣生产流转系统";
