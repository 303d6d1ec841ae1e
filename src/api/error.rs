// ==========================================
// 成衣生产流转系统 - API层错误类型
// ==========================================
// 职责: 包装引擎错误,对外提供稳定错误码与可重试标记
// ==========================================

use serde::Serialize;
use thiserror::Error;

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    /// 稳定错误码 (供调用方分支处理,不随提示文案变化)
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "VALIDATION",
            ApiError::Engine(err) => match err {
                EngineError::Validation(_) => "VALIDATION",
                EngineError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
                EngineError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
                EngineError::InvalidStageTransition { .. } => "INVALID_STAGE_TRANSITION",
                EngineError::Forbidden { .. } => "FORBIDDEN",
                EngineError::Conflict(_) => "CONFLICT",
                EngineError::Busy(_) => "BUSY",
                EngineError::EmptyResultSet { .. } => "EMPTY_RESULT_SET",
                EngineError::InsufficientRemaining { .. } => "INSUFFICIENT_REMAINING",
                EngineError::SubBatchAlreadyVerified { .. } => "SUB_BATCH_ALREADY_VERIFIED",
                EngineError::NotFound { .. } => "NOT_FOUND",
                EngineError::Export(_) => "EXPORT_FAILED",
                EngineError::Repository(_) => "INTERNAL",
            },
        }
    }

    /// 是否值得重试 (并发冲突 / 资源繁忙)
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Engine(err) => err.is_transient(),
            ApiError::InvalidInput(_) => false,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        ApiError::Engine(EngineError::from(err))
    }
}

/// 序列化给外层调用方的错误体
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
