// ==========================================
// 成衣生产流转系统 - 生产流转 API
// ==========================================
// 职责: 面向外层 (Web/管理后台) 的统一入口
// 每个调用携带 ActorContext; 引擎错误统一转换为 ApiError
// ==========================================

use tracing::{debug, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::batch::{BatchDetail, BatchDraft, CellQuantity, ProductionBatch};
use crate::domain::material::{AllocationRequest, MaterialAllocation, MaterialColorVariant};
use crate::domain::stage_task::{CompletionReport, StageTask};
use crate::domain::sub_batch::{CellSubmission, SubBatch};
use crate::domain::timeline::TimelineEvent;
use crate::domain::types::{ActorContext, ActorRole, BatchStatus, StageKind};
use crate::engine::{
    AllocationPlanner, BatchFlow, BatchQuantities, CancellationOutcome, CellBalance, EngineContext,
    EngineError, MaterialLedger, ReconciliationReport, StageTaskController, SubBatchReconciler,
    SubmissionOutcome,
};

// ==========================================
// ProductionApi - 生产流转 API
// ==========================================
pub struct ProductionApi {
    planner: AllocationPlanner,
    flow: BatchFlow,
    stages: StageTaskController,
    reconciler: SubBatchReconciler,
    ledger: MaterialLedger,
}

impl ProductionApi {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            planner: AllocationPlanner::new(ctx.clone()),
            flow: BatchFlow::new(ctx.clone()),
            stages: StageTaskController::new(ctx.clone()),
            reconciler: SubBatchReconciler::new(ctx.clone()),
            ledger: MaterialLedger::new(ctx),
        }
    }

    // ==========================================
    // 物料目录
    // ==========================================

    /// 登记物料颜色规格 (仓库 / 质检主管)
    pub fn register_material_variant(
        &self,
        actor: &ActorContext,
        variant: &MaterialColorVariant,
    ) -> ApiResult<()> {
        check_actor(actor)?;
        require_role(actor, &[ActorRole::Warehouse, ActorRole::Supervisor], "REGISTER_VARIANT")?;
        Ok(self.ledger.register_variant(variant)?)
    }

    /// 入库/盘点调整,返回调整后库存
    pub fn adjust_stock(&self, actor: &ActorContext, variant_id: &str, delta: f64) -> ApiResult<f64> {
        check_actor(actor)?;
        require_role(actor, &[ActorRole::Warehouse, ActorRole::Supervisor], "ADJUST_STOCK")?;
        Ok(self.ledger.adjust_stock(variant_id, delta)?)
    }

    pub fn get_material_variant(&self, variant_id: &str) -> ApiResult<MaterialColorVariant> {
        Ok(self.ledger.find_variant(variant_id)?)
    }

    pub fn list_material_variants(&self) -> ApiResult<Vec<MaterialColorVariant>> {
        Ok(self.ledger.list_variants()?)
    }

    pub fn list_allocations(&self, batch_id: &str) -> ApiResult<Vec<MaterialAllocation>> {
        Ok(self.ledger.list_allocations(batch_id)?)
    }

    // ==========================================
    // 批次创建与领料
    // ==========================================

    pub fn create_batch(&self, actor: &ActorContext, draft: &BatchDraft) -> ApiResult<BatchDetail> {
        check_actor(actor)?;
        debug!(
            actor = %actor.actor_id,
            product_id = %draft.product_id,
            cells = draft.requests.len(),
            allocations = draft.allocations.len(),
            "创建批次请求"
        );
        self.planner.plan_and_commit(actor, draft).map_err(log_rejection)
    }

    pub fn request_material(&self, actor: &ActorContext, batch_id: &str) -> ApiResult<ProductionBatch> {
        check_actor(actor)?;
        self.flow.request_material(actor, batch_id).map_err(log_rejection)
    }

    pub fn allocate_material(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        allocations: &[AllocationRequest],
    ) -> ApiResult<BatchDetail> {
        check_actor(actor)?;
        self.planner
            .allocate(actor, batch_id, allocations)
            .map_err(log_rejection)
    }

    // ==========================================
    // 工序任务
    // ==========================================

    pub fn assign_worker(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        stage: StageKind,
        worker_id: &str,
    ) -> ApiResult<StageTask> {
        check_actor(actor)?;
        self.stages
            .assign(actor, batch_id, stage, worker_id)
            .map_err(log_rejection)
    }

    pub fn start_stage(&self, actor: &ActorContext, batch_id: &str, stage: StageKind) -> ApiResult<StageTask> {
        check_actor(actor)?;
        self.stages.start(actor, batch_id, stage).map_err(log_rejection)
    }

    pub fn record_progress(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        stage: StageKind,
        results: &[CellQuantity],
        notes: Option<&str>,
    ) -> ApiResult<StageTask> {
        check_actor(actor)?;
        self.stages
            .record_progress(actor, batch_id, stage, results, notes)
            .map_err(log_rejection)
    }

    pub fn complete_stage(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        stage: StageKind,
        report: &CompletionReport,
    ) -> ApiResult<StageTask> {
        check_actor(actor)?;
        self.stages
            .complete(actor, batch_id, stage, report)
            .map_err(log_rejection)
    }

    /// 质检核验裁剪/缝制
    pub fn verify_stage(&self, actor: &ActorContext, batch_id: &str, stage: StageKind) -> ApiResult<StageTask> {
        check_actor(actor)?;
        self.stages
            .verify_stage(actor, batch_id, stage)
            .map_err(log_rejection)
    }

    // ==========================================
    // 子批次
    // ==========================================

    pub fn submit_sub_batch(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        stage: StageKind,
        submissions: &[CellSubmission],
        notes: Option<&str>,
    ) -> ApiResult<SubmissionOutcome> {
        check_actor(actor)?;
        self.reconciler
            .submit(actor, batch_id, stage, submissions, notes)
            .map_err(log_rejection)
    }

    pub fn verify_sub_batch(&self, actor: &ActorContext, sub_batch_id: &str) -> ApiResult<SubBatch> {
        check_actor(actor)?;
        self.reconciler
            .verify_sub_batch(actor, sub_batch_id)
            .map_err(log_rejection)
    }

    pub fn remaining(&self, batch_id: &str, stage: StageKind) -> ApiResult<Vec<CellBalance>> {
        Ok(self.reconciler.remaining(batch_id, stage)?)
    }

    pub fn list_sub_batches(&self, batch_id: &str, stage: Option<StageKind>) -> ApiResult<Vec<SubBatch>> {
        Ok(self.reconciler.list_sub_batches(batch_id, stage)?)
    }

    pub fn get_sub_batch(&self, sub_batch_id: &str) -> ApiResult<SubBatch> {
        Ok(self.reconciler.get_sub_batch(sub_batch_id)?)
    }

    // ==========================================
    // 批次收尾
    // ==========================================

    pub fn verify_warehouse(&self, actor: &ActorContext, batch_id: &str) -> ApiResult<ProductionBatch> {
        check_actor(actor)?;
        self.flow.verify_warehouse(actor, batch_id).map_err(log_rejection)
    }

    pub fn complete_batch(&self, actor: &ActorContext, batch_id: &str) -> ApiResult<ProductionBatch> {
        check_actor(actor)?;
        self.flow.complete_batch(actor, batch_id).map_err(log_rejection)
    }

    pub fn cancel_batch(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        reason: Option<&str>,
    ) -> ApiResult<CancellationOutcome> {
        check_actor(actor)?;
        self.flow.cancel(actor, batch_id, reason).map_err(log_rejection)
    }

    // ==========================================
    // 查询接口
    // ==========================================

    pub fn get_batch(&self, batch_id: &str) -> ApiResult<ProductionBatch> {
        Ok(self.flow.get_batch(batch_id)?)
    }

    pub fn find_batch_by_sku(&self, batch_sku: &str) -> ApiResult<ProductionBatch> {
        if batch_sku.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次SKU不能为空".to_string()));
        }
        Ok(self.flow.find_by_sku(batch_sku.trim())?)
    }

    pub fn list_batches(&self, status: Option<BatchStatus>) -> ApiResult<Vec<ProductionBatch>> {
        Ok(self.flow.list_batches(status)?)
    }

    pub fn get_batch_detail(&self, batch_id: &str) -> ApiResult<BatchDetail> {
        Ok(self.flow.batch_detail(batch_id)?)
    }

    pub fn get_task(&self, batch_id: &str, stage: StageKind) -> ApiResult<Option<StageTask>> {
        Ok(self.stages.task(batch_id, stage)?)
    }

    pub fn get_timeline(&self, batch_id: &str) -> ApiResult<Vec<TimelineEvent>> {
        Ok(self.flow.timeline(batch_id)?)
    }

    pub fn recent_activity(&self, limit: i32) -> ApiResult<Vec<TimelineEvent>> {
        Ok(self.flow.recent_activity(limit)?)
    }

    pub fn get_status_history(&self, batch_id: &str) -> ApiResult<Vec<BatchStatus>> {
        Ok(self.flow.status_history(batch_id)?)
    }

    pub fn get_quantities(&self, batch_id: &str) -> ApiResult<BatchQuantities> {
        Ok(self.flow.quantities(batch_id)?)
    }

    pub fn get_reconciliation_report(&self, batch_id: &str) -> ApiResult<ReconciliationReport> {
        Ok(self.flow.reconciliation_report(batch_id)?)
    }

    pub fn export_reconciliation_csv(&self, batch_id: &str) -> ApiResult<String> {
        let report = self.flow.reconciliation_report(batch_id)?;
        Ok(report.to_csv()?)
    }
}

fn check_actor(actor: &ActorContext) -> ApiResult<()> {
    if actor.actor_id.trim().is_empty() {
        return Err(ApiError::InvalidInput("操作人ID不能为空".to_string()));
    }
    Ok(())
}

fn require_role(actor: &ActorContext, roles: &[ActorRole], action: &str) -> ApiResult<()> {
    if roles.contains(&actor.role) {
        Ok(())
    } else {
        Err(EngineError::forbidden(actor.role, action).into())
    }
}

fn log_rejection(err: EngineError) -> ApiError {
    if err.is_transient() {
        warn!(error = %err, "操作因并发失败,可重试");
    } else {
        debug!(error = %err, "操作被拒绝");
    }
    ApiError::from(err)
}
