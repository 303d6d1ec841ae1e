// ==========================================
// 成衣生产流转系统 - 批次流转引擎
// ==========================================
// 职责: 批次级转换 (领料申请 / 仓库核验 / 完结 / 取消) 与批次查询
// 红线: 每次转换写入恰好一条 StatusChanged 时间线事件
// 红线: 取消与物料归还在同一事务内完成,不允许"先归还后取消失败"
// ==========================================

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::db::now_ts;
use crate::domain::batch::{BatchDetail, ProductionBatch};
use crate::domain::material::MaterialAllocation;
use crate::domain::timeline::{TimelineEvent, TimelineEventKind};
use crate::domain::types::{ActorContext, BatchStatus, StageKind, TaskStatus};
use crate::engine::context::EngineContext;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::MaterialLedger;
use crate::engine::projection::{project, BatchQuantities};
use crate::engine::report::ReconciliationReport;
use crate::engine::state_machine::{next_state, BatchAction};
use crate::engine::timeline::PendingEvents;
use crate::repository::{
    BatchRepository, MaterialRepository, StageTaskRepository, SubBatchRepository, TimelineRepository,
};

/// 取消结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationOutcome {
    pub batch: ProductionBatch,
    /// 本次归还的分配记录
    pub released: Vec<MaterialAllocation>,
    /// 物料已投产、未归还
    pub stock_retained: bool,
}

// ==========================================
// BatchFlow - 批次流转
// ==========================================
pub struct BatchFlow {
    ctx: EngineContext,
}

impl BatchFlow {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// PENDING -> MATERIAL_REQUESTED
    pub fn request_material(&self, actor: &ActorContext, batch_id: &str) -> EngineResult<ProductionBatch> {
        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            apply_transition_in(tx, &batch, BatchAction::RequestMaterial, actor, pending, None)
        })
    }

    /// FINISHING_COMPLETED -> WAREHOUSE_VERIFIED
    ///
    /// 前置: 后整的全部子批次均已由仓库核验
    pub fn verify_warehouse(&self, actor: &ActorContext, batch_id: &str) -> EngineResult<ProductionBatch> {
        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            // 先校验角色与来源状态,再检查子批次
            next_state(batch.status, BatchAction::VerifyWarehouse, actor.role)?;

            let unverified = SubBatchRepository::count_unverified_in(tx, batch_id, StageKind::Finishing)?;
            if unverified > 0 {
                warn!(batch_id = batch_id, unverified = unverified, "仓库核验被拒: 仍有未核验的后整子批次");
                return Err(EngineError::Validation(format!(
                    "批次 {} 仍有 {} 个后整子批次未核验",
                    batch.batch_sku, unverified
                )));
            }

            let mut task = StageTaskRepository::find_task_in(tx, batch_id, StageKind::Finishing)?
                .ok_or_else(|| EngineError::not_found("StageTask", &format!("{}/FINISHING", batch_id)))?;
            task.status = TaskStatus::Verified;
            task.verified_by = Some(actor.actor_id.clone());
            task.verified_at = Some(now_ts());
            StageTaskRepository::update_task_in(tx, &task)?;
            apply_transition_in(
                tx,
                &batch,
                BatchAction::VerifyWarehouse,
                actor,
                pending,
                Some(json!({ "stage": StageKind::Finishing.as_str() })),
            )
        })
    }

    /// WAREHOUSE_VERIFIED -> COMPLETED
    pub fn complete_batch(&self, actor: &ActorContext, batch_id: &str) -> EngineResult<ProductionBatch> {
        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            apply_transition_in(tx, &batch, BatchAction::Complete, actor, pending, None)
        })
    }

    /// 取消批次 (WAREHOUSE_VERIFIED 之前)
    ///
    /// - 裁剪开始前: 全部物料分配按原量归还
    /// - 裁剪开始后: 面料视为已消耗,除非开启 release_stock_on_late_cancel
    pub fn cancel(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        reason: Option<&str>,
    ) -> EngineResult<CancellationOutcome> {
        let release_late = self.ctx.config().release_stock_on_late_cancel;

        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            let should_release = batch.status.is_pre_cutting() || release_late;
            let cancelled_from = batch.status;

            let updated = apply_transition_in(
                tx,
                &batch,
                BatchAction::Cancel,
                actor,
                pending,
                Some(json!({ "reason": reason })),
            )?;

            let mut released = Vec::new();
            let mut stock_retained = false;
            if should_release {
                released = MaterialLedger::release_batch_in(tx, batch_id)?;
                for allocation in &released {
                    pending.record(
                        tx,
                        batch_id,
                        TimelineEventKind::MaterialReleased,
                        Some(&actor.actor_id),
                        Some(json!({
                            "variant_id": allocation.variant_id,
                            "color": allocation.color,
                            "qty": allocation.allocated_qty,
                            "rolls": allocation.roll_quantity,
                        })),
                    )?;
                }
            } else {
                let outstanding: Vec<MaterialAllocation> =
                    MaterialRepository::find_allocations_by_batch_in(tx, batch_id)?
                        .into_iter()
                        .filter(|a| !a.released)
                        .collect();
                if !outstanding.is_empty() {
                    stock_retained = true;
                    let total: f64 = outstanding.iter().map(|a| a.allocated_qty).sum();
                    pending.record(
                        tx,
                        batch_id,
                        TimelineEventKind::MaterialRetained,
                        Some(&actor.actor_id),
                        Some(json!({
                            "cancelled_from": cancelled_from.as_str(),
                            "allocations": outstanding.len(),
                            "qty": total,
                        })),
                    )?;
                }
            }

            info!(
                batch_id = batch_id,
                from = %cancelled_from,
                released = released.len(),
                stock_retained = stock_retained,
                "批次已取消"
            );

            Ok(CancellationOutcome {
                batch: updated,
                released,
                stock_retained,
            })
        })
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_batch(&self, batch_id: &str) -> EngineResult<ProductionBatch> {
        self.ctx.read(|conn| load_batch_in(conn, batch_id))
    }

    pub fn find_by_sku(&self, batch_sku: &str) -> EngineResult<ProductionBatch> {
        self.ctx.read(|conn| {
            BatchRepository::find_by_sku_in(conn, batch_sku)?
                .ok_or_else(|| EngineError::not_found("ProductionBatch", batch_sku))
        })
    }

    pub fn list_batches(&self, status: Option<BatchStatus>) -> EngineResult<Vec<ProductionBatch>> {
        self.ctx
            .read(|conn| Ok(BatchRepository::list_in(conn, status)?))
    }

    pub fn batch_detail(&self, batch_id: &str) -> EngineResult<BatchDetail> {
        self.ctx.read(|conn| load_detail_in(conn, batch_id))
    }

    pub fn timeline(&self, batch_id: &str) -> EngineResult<Vec<TimelineEvent>> {
        self.ctx
            .read(|conn| Ok(TimelineRepository::find_by_batch_in(conn, batch_id)?))
    }

    /// 跨批次最近的事件,新的在前
    pub fn recent_activity(&self, limit: i32) -> EngineResult<Vec<TimelineEvent>> {
        if limit <= 0 {
            return Err(EngineError::Validation(format!("limit 必须为正: {}", limit)));
        }
        self.ctx
            .read(|conn| Ok(TimelineRepository::find_recent_in(conn, limit)?))
    }

    /// 批次经历过的状态序列 (由时间线推导)
    pub fn status_history(&self, batch_id: &str) -> EngineResult<Vec<BatchStatus>> {
        let events = self.timeline(batch_id)?;
        Ok(status_history_from(&events))
    }

    pub fn reconciliation_report(&self, batch_id: &str) -> EngineResult<ReconciliationReport> {
        let detail = self.batch_detail(batch_id)?;
        Ok(ReconciliationReport::build(&detail))
    }

    pub fn quantities(&self, batch_id: &str) -> EngineResult<BatchQuantities> {
        let detail = self.batch_detail(batch_id)?;
        Ok(project(&detail))
    }
}

/// 从时间线推导状态序列: BatchCreated 记为 PENDING,其后每个 StatusChanged 取 to
pub fn status_history_from(events: &[TimelineEvent]) -> Vec<BatchStatus> {
    let mut states = Vec::new();
    for event in events {
        if event.event == TimelineEventKind::BatchCreated.as_str() {
            states.push(BatchStatus::Pending);
        } else if event.event == TimelineEventKind::StatusChanged.as_str() {
            let to = event
                .details
                .as_ref()
                .and_then(|d| d.get("to"))
                .and_then(JsonValue::as_str)
                .and_then(BatchStatus::from_db_str);
            if let Some(status) = to {
                states.push(status);
            }
        }
    }
    states
}

// ==========================================
// 事务内共用操作
// ==========================================

pub(crate) fn load_batch_in(conn: &Connection, batch_id: &str) -> EngineResult<ProductionBatch> {
    BatchRepository::find_by_id_in(conn, batch_id)?
        .ok_or_else(|| EngineError::not_found("ProductionBatch", batch_id))
}

pub(crate) fn load_detail_in(conn: &Connection, batch_id: &str) -> EngineResult<BatchDetail> {
    let batch = load_batch_in(conn, batch_id)?;
    Ok(BatchDetail {
        requests: BatchRepository::find_requests_in(conn, batch_id)?,
        allocations: MaterialRepository::find_allocations_by_batch_in(conn, batch_id)?,
        tasks: StageTaskRepository::find_tasks_by_batch_in(conn, batch_id)?,
        cutting_results: StageTaskRepository::find_cutting_results_in(conn, batch_id)?,
        sub_batches: SubBatchRepository::find_by_batch_in(conn, batch_id, None)?,
        batch,
    })
}

/// 执行一次批次状态转换并写入时间线
///
/// 状态机校验角色与来源状态; 写入时带 revision 校验
pub(crate) fn apply_transition_in(
    conn: &Connection,
    batch: &ProductionBatch,
    action: BatchAction,
    actor: &ActorContext,
    pending: &mut PendingEvents,
    extra: Option<JsonValue>,
) -> EngineResult<ProductionBatch> {
    let target = match next_state(batch.status, action, actor.role) {
        Ok(target) => target,
        Err(e) => {
            warn!(
                batch_id = %batch.batch_id,
                from = %batch.status,
                action = %action,
                role = %actor.role,
                error = %e,
                "状态转换被拒绝"
            );
            return Err(e);
        }
    };

    let revision = BatchRepository::update_status_in(conn, &batch.batch_id, batch.revision, target)?;

    let mut details = json!({
        "from": batch.status.as_str(),
        "to": target.as_str(),
        "action": action.as_str(),
    });
    if let (Some(JsonValue::Object(extra)), Some(map)) = (extra, details.as_object_mut()) {
        for (key, value) in extra {
            map.insert(key, value);
        }
    }
    pending.record(
        conn,
        &batch.batch_id,
        TimelineEventKind::StatusChanged,
        Some(&actor.actor_id),
        Some(details),
    )?;

    info!(
        batch_id = %batch.batch_id,
        batch_sku = %batch.batch_sku,
        from = %batch.status,
        to = %target,
        actor = %actor.actor_id,
        "批次状态转换"
    );

    let mut updated = batch.clone();
    updated.status = target;
    updated.revision = revision;
    updated.updated_at = now_ts();
    Ok(updated)
}
