// ==========================================
// 成衣生产流转系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口,供外层 (Web/管理后台) 调用
// ==========================================

pub mod error;
pub mod production_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use production_api::ProductionApi;
