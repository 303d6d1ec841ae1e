// ==========================================
// 成衣生产流转系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod batch;
pub mod material;
pub mod stage_task;
pub mod sub_batch;
pub mod timeline;
pub mod types;

// 重导出核心类型
pub use batch::{
    BatchDetail, BatchDraft, CellKey, CellQuantity, ProductionBatch, SizeColorRequest,
    SizeColorRequestDraft,
};
pub use material::{AllocationRequest, MaterialAllocation, MaterialColorVariant, Reservation};
pub use stage_task::{CompletionReport, CuttingResult, StageTask};
pub use sub_batch::{CellSubmission, RejectBreakdown, SubBatch, SubBatchItem};
pub use timeline::{TimelineEvent, TimelineEventKind};
pub use types::{ActorContext, ActorRole, BatchStatus, StageKind, SubBatchStatus, TaskStatus};
