// ==========================================
// 成衣生产流转系统 - 引擎层
// ==========================================
// 职责: 实现业务规则 (状态机 / 物料账本 / 工序任务 / 子批次对账)
// 红线: Engine 不拼业务外的 SQL, 持久化交给 repository
// 红线: 每个写操作在一个 IMMEDIATE 事务内完成,全有或全无
// ==========================================

pub mod allocation;
pub mod batch_flow;
pub mod context;
pub mod error;
pub mod ledger;
pub mod projection;
pub mod reconciliation;
pub mod report;
pub mod stage_task;
pub mod state_machine;
pub mod timeline;

// 重导出核心引擎
pub use allocation::AllocationPlanner;
pub use batch_flow::{status_history_from, BatchFlow, CancellationOutcome};
pub use context::EngineContext;
pub use error::{EngineError, EngineResult};
pub use ledger::MaterialLedger;
pub use projection::{project, project_cells, BatchQuantities, CellProjection};
pub use reconciliation::{CellBalance, SubBatchReconciler, SubmissionOutcome};
pub use report::ReconciliationReport;
pub use stage_task::StageTaskController;
pub use state_machine::{next_state, BatchAction, StageAction, TRANSITION_TABLE};
pub use timeline::{NoOpTimelineSink, PendingEvents, TimelineRecorder, TimelineSink};
