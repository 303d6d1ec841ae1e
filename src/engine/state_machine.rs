// ==========================================
// 成衣生产流转系统 - 批次状态机
// ==========================================
// 显式转换表: (当前状态, 动作, 角色) -> 下一状态 | 错误
// 红线: 纯函数,不访问数据库; 不允许任何回退转换
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::types::{ActorRole, BatchStatus, StageKind};
use crate::engine::error::{EngineError, EngineResult};

// ==========================================
// BatchAction - 批次级动作
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchAction {
    RequestMaterial,
    AllocateMaterial,
    AssignCutter,
    StartCutting,
    CompleteCutting,
    VerifyCutting,
    AssignSewer,
    StartSewing,
    CompleteSewing,
    VerifySewing,
    StartFinishing,
    CompleteFinishing,
    VerifyWarehouse,
    Complete,
    Cancel,
}

impl BatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchAction::RequestMaterial => "REQUEST_MATERIAL",
            BatchAction::AllocateMaterial => "ALLOCATE_MATERIAL",
            BatchAction::AssignCutter => "ASSIGN_CUTTER",
            BatchAction::StartCutting => "START_CUTTING",
            BatchAction::CompleteCutting => "COMPLETE_CUTTING",
            BatchAction::VerifyCutting => "VERIFY_CUTTING",
            BatchAction::AssignSewer => "ASSIGN_SEWER",
            BatchAction::StartSewing => "START_SEWING",
            BatchAction::CompleteSewing => "COMPLETE_SEWING",
            BatchAction::VerifySewing => "VERIFY_SEWING",
            BatchAction::StartFinishing => "START_FINISHING",
            BatchAction::CompleteFinishing => "COMPLETE_FINISHING",
            BatchAction::VerifyWarehouse => "VERIFY_WAREHOUSE",
            BatchAction::Complete => "COMPLETE",
            BatchAction::Cancel => "CANCEL",
        }
    }

    pub fn start_of(stage: StageKind) -> Self {
        match stage {
            StageKind::Cutting => BatchAction::StartCutting,
            StageKind::Sewing => BatchAction::StartSewing,
            StageKind::Finishing => BatchAction::StartFinishing,
        }
    }

    pub fn complete_of(stage: StageKind) -> Self {
        match stage {
            StageKind::Cutting => BatchAction::CompleteCutting,
            StageKind::Sewing => BatchAction::CompleteSewing,
            StageKind::Finishing => BatchAction::CompleteFinishing,
        }
    }

    /// 工序核验动作; 后整的核验即仓库核验
    pub fn verify_of(stage: StageKind) -> Self {
        match stage {
            StageKind::Cutting => BatchAction::VerifyCutting,
            StageKind::Sewing => BatchAction::VerifySewing,
            StageKind::Finishing => BatchAction::VerifyWarehouse,
        }
    }
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// StageAction - 工序任务级动作
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageAction {
    Assign,
    Start,
    RecordProgress,
    Complete,
    Submit,
    Verify,
}

impl StageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageAction::Assign => "ASSIGN",
            StageAction::Start => "START",
            StageAction::RecordProgress => "RECORD_PROGRESS",
            StageAction::Complete => "COMPLETE",
            StageAction::Submit => "SUBMIT",
            StageAction::Verify => "VERIFY",
        }
    }
}

impl fmt::Display for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 转换表
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub action: BatchAction,
    pub from: BatchStatus,
    pub to: BatchStatus,
    pub roles: &'static [ActorRole],
}

const LEAD: &[ActorRole] = &[ActorRole::ProductionLead];
const CUTTER: &[ActorRole] = &[ActorRole::Cutter];
const SEWER: &[ActorRole] = &[ActorRole::Sewer];
const FINISHER: &[ActorRole] = &[ActorRole::Finisher];
const SUPERVISOR: &[ActorRole] = &[ActorRole::Supervisor];
const WAREHOUSE: &[ActorRole] = &[ActorRole::Warehouse];
const CANCELLERS: &[ActorRole] = &[ActorRole::ProductionLead, ActorRole::Supervisor];

pub const TRANSITION_TABLE: [TransitionRule; 14] = [
    TransitionRule { action: BatchAction::RequestMaterial, from: BatchStatus::Pending, to: BatchStatus::MaterialRequested, roles: LEAD },
    TransitionRule { action: BatchAction::AllocateMaterial, from: BatchStatus::MaterialRequested, to: BatchStatus::MaterialAllocated, roles: LEAD },
    TransitionRule { action: BatchAction::AssignCutter, from: BatchStatus::MaterialAllocated, to: BatchStatus::AssignedToCutter, roles: LEAD },
    TransitionRule { action: BatchAction::StartCutting, from: BatchStatus::AssignedToCutter, to: BatchStatus::InCutting, roles: CUTTER },
    TransitionRule { action: BatchAction::CompleteCutting, from: BatchStatus::InCutting, to: BatchStatus::CuttingCompleted, roles: CUTTER },
    TransitionRule { action: BatchAction::VerifyCutting, from: BatchStatus::CuttingCompleted, to: BatchStatus::CuttingVerified, roles: SUPERVISOR },
    TransitionRule { action: BatchAction::AssignSewer, from: BatchStatus::CuttingVerified, to: BatchStatus::AssignedToSewer, roles: LEAD },
    TransitionRule { action: BatchAction::StartSewing, from: BatchStatus::AssignedToSewer, to: BatchStatus::InSewing, roles: SEWER },
    TransitionRule { action: BatchAction::CompleteSewing, from: BatchStatus::InSewing, to: BatchStatus::SewingCompleted, roles: SEWER },
    TransitionRule { action: BatchAction::VerifySewing, from: BatchStatus::SewingCompleted, to: BatchStatus::SewingVerified, roles: SUPERVISOR },
    TransitionRule { action: BatchAction::StartFinishing, from: BatchStatus::SewingVerified, to: BatchStatus::InFinishing, roles: FINISHER },
    TransitionRule { action: BatchAction::CompleteFinishing, from: BatchStatus::InFinishing, to: BatchStatus::FinishingCompleted, roles: FINISHER },
    TransitionRule { action: BatchAction::VerifyWarehouse, from: BatchStatus::FinishingCompleted, to: BatchStatus::WarehouseVerified, roles: WAREHOUSE },
    TransitionRule { action: BatchAction::Complete, from: BatchStatus::WarehouseVerified, to: BatchStatus::Completed, roles: LEAD },
];

/// 查找动作对应的前向规则 (Cancel 不在表内)
pub fn rule_for(action: BatchAction) -> Option<&'static TransitionRule> {
    TRANSITION_TABLE.iter().find(|rule| rule.action == action)
}

/// 动作允许的角色
pub fn allowed_roles(action: BatchAction) -> &'static [ActorRole] {
    match action {
        BatchAction::Cancel => CANCELLERS,
        _ => rule_for(action).map(|rule| rule.roles).unwrap_or(&[]),
    }
}

/// 计算下一状态
///
/// # 规则
/// - 先校验角色 (Forbidden),再校验来源状态 (IllegalTransition)
/// - 来源状态不匹配一律拒绝,不做静默 no-op,调用方可据此区分"已完成"与"顺序错误"
/// - CANCELLED 仅可由 WAREHOUSE_VERIFIED 之前的状态到达
pub fn next_state(current: BatchStatus, action: BatchAction, role: ActorRole) -> EngineResult<BatchStatus> {
    if !allowed_roles(action).contains(&role) {
        return Err(EngineError::forbidden(role, action.as_str()));
    }

    let illegal = || EngineError::IllegalTransition {
        from: current,
        attempted: action,
    };

    match action {
        BatchAction::Cancel => {
            if current.is_cancellable() {
                Ok(BatchStatus::Cancelled)
            } else {
                Err(illegal())
            }
        }
        _ => match rule_for(action) {
            Some(rule) if rule.from == current => Ok(rule.to),
            _ => Err(illegal()),
        },
    }
}

/// 判断状态序列是否为标准顺序的前缀 (可被 CANCELLED 截断)
pub fn is_canonical_prefix(states: &[BatchStatus]) -> bool {
    let (body, tail) = match states.iter().position(|s| *s == BatchStatus::Cancelled) {
        Some(idx) => {
            if idx + 1 != states.len() {
                return false;
            }
            (&states[..idx], true)
        }
        None => (states, false),
    };

    if body.is_empty() {
        return !tail;
    }

    body.iter()
        .zip(BatchStatus::CANONICAL_ORDER.iter())
        .all(|(observed, expected)| observed == expected)
        && body.len() <= BatchStatus::CANONICAL_ORDER.len()
}
