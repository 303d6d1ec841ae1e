// ==========================================
// 成衣生产流转系统 - 引擎层错误类型
// ==========================================
// 每个拒绝都携带结构化细节 (当前状态 / 请求状态 / 可用与请求数量)
// 瞬时错误 (Conflict / Busy) 与永久错误必须可区分
// ==========================================

use thiserror::Error;

use crate::domain::batch::CellKey;
use crate::domain::types::{ActorRole, BatchStatus, StageKind, TaskStatus};
use crate::engine::state_machine::{BatchAction, StageAction};
use crate::repository::error::RepositoryError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("输入校验失败: {0}")]
    Validation(String),

    #[error("库存不足: variant={variant_id}, available={available}, requested={requested}")]
    InsufficientStock {
        variant_id: String,
        available: f64,
        requested: f64,
    },

    #[error("非法状态转换: from={from}, attempted={attempted}")]
    IllegalTransition {
        from: BatchStatus,
        attempted: BatchAction,
    },

    #[error("非法工序操作: stage={stage}, task_status={current}, batch_status={batch_status}, attempted={attempted}")]
    InvalidStageTransition {
        stage: StageKind,
        current: TaskStatus,
        batch_status: BatchStatus,
        attempted: StageAction,
    },

    #[error("无权限: role={role}, action={action}")]
    Forbidden { role: ActorRole, action: String },

    #[error("并发冲突: {0}")]
    Conflict(String),

    #[error("资源繁忙: {0}")]
    Busy(String),

    #[error("完工数量为空: stage={stage}")]
    EmptyResultSet { stage: StageKind },

    #[error("剩余数量不足: cell={cell}, remaining={remaining}, requested={requested}")]
    InsufficientRemaining {
        cell: CellKey,
        remaining: i64,
        requested: i64,
    },

    #[error("子批次已核验: {sub_batch_id}")]
    SubBatchAlreadyVerified {
        sub_batch_id: String,
        verified_by: Option<String>,
    },

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    #[error("报表导出失败: {0}")]
    Export(String),

    #[error("仓储错误: {0}")]
    Repository(RepositoryError),
}

impl EngineError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn forbidden(role: ActorRole, action: impl Into<String>) -> Self {
        EngineError::Forbidden {
            role,
            action: action.into(),
        }
    }

    /// 是否为可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Conflict(_) | EngineError::Busy(_))
    }
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Busy(msg) => EngineError::Busy(msg),
            RepositoryError::OptimisticLockFailure {
                entity,
                id,
                expected,
                actual,
            } => EngineError::Conflict(format!(
                "{} id={} 已被其他操作修改 (expected_revision={}, actual_revision={})",
                entity, id, expected, actual
            )),
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Repository(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
