// ==========================================
// 成衣生产流转系统 - 批次时间线领域模型
// ==========================================
// 只追加,不修改不删除; 每次状态转换恰好一行, 工序细节并入该行
// 用途: 审计追踪, 前端时间线展示
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// TimelineEvent - 时间线事件
// ==========================================
// 对齐: timeline_event 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: String,
    pub batch_id: String,
    pub event: String,            // 事件类型 (TimelineEventKind::as_str)
    pub actor_id: Option<String>, // 系统自动触发时为 None
    pub details: Option<JsonValue>,
    pub created_at: NaiveDateTime,
}

// ==========================================
// TimelineEventKind - 事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineEventKind {
    BatchCreated,       // 批次创建
    StatusChanged,      // 批次状态转换
    MaterialReserved,   // 物料扣减
    MaterialReleased,   // 物料归还
    MaterialRetained,   // 取消时物料已消耗,不归还
    TaskAssigned,       // 后整指派 (不伴随批次状态转换)
    ProgressRecorded,   // 保存草稿
    RequestBackfilled,  // 需求件数回填
    SubBatchSubmitted,  // 子批次提交
    SubBatchVerified,   // 子批次核验
}

impl TimelineEventKind {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineEventKind::BatchCreated => "BatchCreated",
            TimelineEventKind::StatusChanged => "StatusChanged",
            TimelineEventKind::MaterialReserved => "MaterialReserved",
            TimelineEventKind::MaterialReleased => "MaterialReleased",
            TimelineEventKind::MaterialRetained => "MaterialRetained",
            TimelineEventKind::TaskAssigned => "TaskAssigned",
            TimelineEventKind::ProgressRecorded => "ProgressRecorded",
            TimelineEventKind::RequestBackfilled => "RequestBackfilled",
            TimelineEventKind::SubBatchSubmitted => "SubBatchSubmitted",
            TimelineEventKind::SubBatchVerified => "SubBatchVerified",
        }
    }
}
