// ==========================================
// 成衣生产流转系统 - 领域类型定义
// ==========================================
// 批次状态 / 工序 / 工序任务状态 / 子批次状态 / 操作角色
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 批次状态 (Batch Status)
// ==========================================
// 线性有序,唯一分支为 CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,            // 已创建
    MaterialRequested,  // 已申请物料
    MaterialAllocated,  // 物料已分配
    AssignedToCutter,   // 已指派裁剪
    InCutting,          // 裁剪中
    CuttingCompleted,   // 裁剪完成
    CuttingVerified,    // 裁剪已核验
    AssignedToSewer,    // 已指派缝制
    InSewing,           // 缝制中
    SewingCompleted,    // 缝制完成
    SewingVerified,     // 缝制已核验
    InFinishing,        // 后整中
    FinishingCompleted, // 后整完成
    WarehouseVerified,  // 仓库已核验
    Completed,          // 已完成
    Cancelled,          // 已取消
}

impl BatchStatus {
    /// 规范顺序 (不含 CANCELLED)
    pub const CANONICAL_ORDER: [BatchStatus; 15] = [
        BatchStatus::Pending,
        BatchStatus::MaterialRequested,
        BatchStatus::MaterialAllocated,
        BatchStatus::AssignedToCutter,
        BatchStatus::InCutting,
        BatchStatus::CuttingCompleted,
        BatchStatus::CuttingVerified,
        BatchStatus::AssignedToSewer,
        BatchStatus::InSewing,
        BatchStatus::SewingCompleted,
        BatchStatus::SewingVerified,
        BatchStatus::InFinishing,
        BatchStatus::FinishingCompleted,
        BatchStatus::WarehouseVerified,
        BatchStatus::Completed,
    ];

    /// 在规范顺序中的位置; CANCELLED 返回 None
    pub fn ordinal(&self) -> Option<usize> {
        Self::CANONICAL_ORDER.iter().position(|s| s == self)
    }

    /// 终态: COMPLETED / CANCELLED
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Cancelled)
    }

    /// 是否仍可取消 (严格早于 WAREHOUSE_VERIFIED)
    pub fn is_cancellable(&self) -> bool {
        match (self.ordinal(), BatchStatus::WarehouseVerified.ordinal()) {
            (Some(current), Some(limit)) => current < limit,
            _ => false,
        }
    }

    /// 是否尚未进入裁剪 (物料未被消耗)
    pub fn is_pre_cutting(&self) -> bool {
        match (self.ordinal(), BatchStatus::InCutting.ordinal()) {
            (Some(current), Some(limit)) => current < limit,
            _ => false,
        }
    }

    /// 转换为数据库字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::MaterialRequested => "MATERIAL_REQUESTED",
            BatchStatus::MaterialAllocated => "MATERIAL_ALLOCATED",
            BatchStatus::AssignedToCutter => "ASSIGNED_TO_CUTTER",
            BatchStatus::InCutting => "IN_CUTTING",
            BatchStatus::CuttingCompleted => "CUTTING_COMPLETED",
            BatchStatus::CuttingVerified => "CUTTING_VERIFIED",
            BatchStatus::AssignedToSewer => "ASSIGNED_TO_SEWER",
            BatchStatus::InSewing => "IN_SEWING",
            BatchStatus::SewingCompleted => "SEWING_COMPLETED",
            BatchStatus::SewingVerified => "SEWING_VERIFIED",
            BatchStatus::InFinishing => "IN_FINISHING",
            BatchStatus::FinishingCompleted => "FINISHING_COMPLETED",
            BatchStatus::WarehouseVerified => "WAREHOUSE_VERIFIED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Cancelled => "CANCELLED",
        }
    }

    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        if s == "CANCELLED" {
            return Some(BatchStatus::Cancelled);
        }
        Self::CANONICAL_ORDER.iter().copied().find(|st| st.as_str() == s)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 工序 (Stage Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    Cutting,   // 裁剪
    Sewing,    // 缝制
    Finishing, // 后整
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Cutting => "CUTTING",
            StageKind::Sewing => "SEWING",
            StageKind::Finishing => "FINISHING",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "CUTTING" => Some(StageKind::Cutting),
            "SEWING" => Some(StageKind::Sewing),
            "FINISHING" => Some(StageKind::Finishing),
            _ => None,
        }
    }

    /// 子批次 SKU 中的工序代码
    pub fn sku_code(&self) -> &'static str {
        match self {
            StageKind::Cutting => "CT",
            StageKind::Sewing => "SW",
            StageKind::Finishing => "FN",
        }
    }

    /// 执行该工序的工人角色
    pub fn worker_role(&self) -> ActorRole {
        match self {
            StageKind::Cutting => ActorRole::Cutter,
            StageKind::Sewing => ActorRole::Sewer,
            StageKind::Finishing => ActorRole::Finisher,
        }
    }

    /// 进入该工序前批次应处的状态
    pub fn pre_stage_status(&self) -> BatchStatus {
        match self {
            StageKind::Cutting => BatchStatus::AssignedToCutter,
            StageKind::Sewing => BatchStatus::AssignedToSewer,
            StageKind::Finishing => BatchStatus::SewingVerified,
        }
    }

    pub fn in_progress_status(&self) -> BatchStatus {
        match self {
            StageKind::Cutting => BatchStatus::InCutting,
            StageKind::Sewing => BatchStatus::InSewing,
            StageKind::Finishing => BatchStatus::InFinishing,
        }
    }

    pub fn completed_status(&self) -> BatchStatus {
        match self {
            StageKind::Cutting => BatchStatus::CuttingCompleted,
            StageKind::Sewing => BatchStatus::SewingCompleted,
            StageKind::Finishing => BatchStatus::FinishingCompleted,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 工序任务状态 (Task Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,    // 未指派
    Assigned,   // 已指派
    InProgress, // 进行中
    Completed,  // 已完成
    Verified,   // 已核验
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Verified => "VERIFIED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "ASSIGNED" => Some(TaskStatus::Assigned),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            "COMPLETED" => Some(TaskStatus::Completed),
            "VERIFIED" => Some(TaskStatus::Verified),
            _ => None,
        }
    }

    /// 是否可开工
    pub fn is_startable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Assigned)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 子批次状态 (Sub-Batch Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubBatchStatus {
    Submitted, // 已提交 (不可修改)
    Verified,  // 接收方已核验 (锁定)
}

impl SubBatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubBatchStatus::Submitted => "SUBMITTED",
            SubBatchStatus::Verified => "VERIFIED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "SUBMITTED" => Some(SubBatchStatus::Submitted),
            "VERIFIED" => Some(SubBatchStatus::Verified),
            _ => None,
        }
    }
}

impl fmt::Display for SubBatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 操作角色 (Actor Role)
// ==========================================
// 由外部身份服务提供,核心层只做门禁比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    ProductionLead, // 生产主管
    Cutter,         // 裁剪工
    Sewer,          // 缝制工
    Finisher,       // 后整工
    Warehouse,      // 仓库
    Supervisor,     // 质检主管
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::ProductionLead => "PRODUCTION_LEAD",
            ActorRole::Cutter => "CUTTER",
            ActorRole::Sewer => "SEWER",
            ActorRole::Finisher => "FINISHER",
            ActorRole::Warehouse => "WAREHOUSE",
            ActorRole::Supervisor => "SUPERVISOR",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 调用方身份 (actor_id + role)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: String,
    pub role: ActorRole,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
        }
    }
}
