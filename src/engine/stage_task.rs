// ==========================================
// 成衣生产流转系统 - 工序任务控制器
// ==========================================
// 工序: 裁剪 / 缝制 / 后整; 任务子状态机
//   PENDING/ASSIGNED -> IN_PROGRESS -> COMPLETED -> VERIFIED
// 红线: 只有被指派的工人可开工/记录/完工; 核验由主管执行
// 红线: 重复开工返回 InvalidStageTransition,不产生第二个 startedAt 或时间线事件
// ==========================================

use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::now_ts;
use crate::domain::batch::{CellKey, CellQuantity, ProductionBatch};
use crate::domain::stage_task::{CompletionReport, CuttingResult, StageTask};
use crate::domain::timeline::TimelineEventKind;
use crate::domain::types::{ActorContext, ActorRole, StageKind, TaskStatus};
use crate::engine::batch_flow::{apply_transition_in, load_batch_in};
use crate::engine::context::EngineContext;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::reconciliation::{ceiling_in, sum_ceiling};
use crate::engine::state_machine::{next_state, BatchAction, StageAction};
use crate::engine::timeline::PendingEvents;
use crate::repository::{BatchRepository, MaterialRepository, StageTaskRepository, SubBatchRepository};

pub struct StageTaskController {
    ctx: EngineContext,
}

impl StageTaskController {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    // ==========================================
    // 指派
    // ==========================================

    /// 指派工序工人并创建任务
    ///
    /// - 裁剪: MATERIAL_ALLOCATED -> ASSIGNED_TO_CUTTER
    /// - 缝制: CUTTING_VERIFIED -> ASSIGNED_TO_SEWER
    /// - 后整: 无独立的指派状态,要求批次处于 SEWING_VERIFIED
    pub fn assign(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        stage: StageKind,
        worker_id: &str,
    ) -> EngineResult<StageTask> {
        if actor.role != ActorRole::ProductionLead {
            return Err(EngineError::forbidden(actor.role, format!("ASSIGN_{}", stage)));
        }
        let worker_id = worker_id.trim();
        if worker_id.is_empty() {
            return Err(EngineError::Validation("指派工人不能为空".into()));
        }

        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            if let Some(existing) = StageTaskRepository::find_task_in(tx, batch_id, stage)? {
                return Err(EngineError::InvalidStageTransition {
                    stage,
                    current: existing.status,
                    batch_status: batch.status,
                    attempted: StageAction::Assign,
                });
            }

            // 后整指派没有对应的批次状态转换
            let transition = match stage {
                StageKind::Cutting => Some(BatchAction::AssignCutter),
                StageKind::Sewing => Some(BatchAction::AssignSewer),
                StageKind::Finishing => None,
            };
            if let Some(action) = transition {
                next_state(batch.status, action, actor.role)?;
            }

            let mut task = StageTask {
                task_id: Uuid::new_v4().to_string(),
                batch_id: batch_id.to_string(),
                stage,
                status: TaskStatus::Assigned,
                assigned_to: Some(worker_id.to_string()),
                material_received: 0.0,
                pieces_received: 0,
                pieces_completed: 0,
                reject_pieces: 0,
                waste_qty: 0.0,
                started_at: None,
                completed_at: None,
                verified_by: None,
                verified_at: None,
                notes: None,
            };

            match stage {
                StageKind::Cutting => {
                    let allocations = MaterialRepository::find_allocations_by_batch_in(tx, batch_id)?;
                    task.material_received = allocations
                        .iter()
                        .filter(|a| !a.released)
                        .map(|a| a.allocated_qty)
                        .sum();
                    task.pieces_received = BatchRepository::find_requests_in(tx, batch_id)?
                        .iter()
                        .map(|r| r.requested_pieces)
                        .sum();
                }
                StageKind::Sewing => {
                    task.pieces_received = sum_ceiling(&ceiling_in(tx, batch_id, StageKind::Sewing)?);
                }
                StageKind::Finishing => {
                    if batch.status != StageKind::Finishing.pre_stage_status() {
                        return Err(EngineError::InvalidStageTransition {
                            stage,
                            current: TaskStatus::Pending,
                            batch_status: batch.status,
                            attempted: StageAction::Assign,
                        });
                    }
                    task.pieces_received = sum_ceiling(&ceiling_in(tx, batch_id, StageKind::Finishing)?);
                }
            }

            let details = json!({
                "stage": stage.as_str(),
                "assigned_to": worker_id,
                "pieces_received": task.pieces_received,
                "material_received": task.material_received,
            });
            StageTaskRepository::insert_task_in(tx, &task)?;
            match transition {
                Some(action) => {
                    apply_transition_in(tx, &batch, action, actor, pending, Some(details))?;
                }
                None => {
                    pending.record(
                        tx,
                        batch_id,
                        TimelineEventKind::TaskAssigned,
                        Some(&actor.actor_id),
                        Some(details),
                    )?;
                }
            }
            info!(batch_id = batch_id, stage = %stage, worker = worker_id, "工序已指派");
            Ok(task)
        })
    }

    // ==========================================
    // 开工
    // ==========================================

    pub fn start(&self, actor: &ActorContext, batch_id: &str, stage: StageKind) -> EngineResult<StageTask> {
        require_worker_role(actor, stage, StageAction::Start)?;

        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            let mut task = load_task_in(tx, &batch, stage, StageAction::Start)?;
            ensure_assignee(actor, &task, StageAction::Start)?;

            if !task.status.is_startable() || batch.status != stage.pre_stage_status() {
                warn!(
                    batch_id = batch_id,
                    stage = %stage,
                    task_status = %task.status,
                    batch_status = %batch.status,
                    "开工被拒绝"
                );
                return Err(EngineError::InvalidStageTransition {
                    stage,
                    current: task.status,
                    batch_status: batch.status,
                    attempted: StageAction::Start,
                });
            }

            task.status = TaskStatus::InProgress;
            task.started_at = Some(now_ts());
            StageTaskRepository::update_task_in(tx, &task)?;
            apply_transition_in(
                tx,
                &batch,
                BatchAction::start_of(stage),
                actor,
                pending,
                Some(json!({ "stage": stage.as_str() })),
            )?;
            Ok(task)
        })
    }

    // ==========================================
    // 保存进度 (草稿)
    // ==========================================

    /// 按单元保存进度,不关闭任务,不推进批次状态
    ///
    /// 裁剪写入 cutting_result (未确认); 缝制/后整写入草稿表
    pub fn record_progress(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        stage: StageKind,
        results: &[CellQuantity],
        notes: Option<&str>,
    ) -> EngineResult<StageTask> {
        require_worker_role(actor, stage, StageAction::RecordProgress)?;
        if results.is_empty() && notes.is_none() {
            return Err(EngineError::Validation("进度记录为空".into()));
        }
        validate_cell_quantities(results)?;

        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            let mut task = load_task_in(tx, &batch, stage, StageAction::RecordProgress)?;
            ensure_assignee(actor, &task, StageAction::RecordProgress)?;
            ensure_in_progress(&batch, &task, StageAction::RecordProgress)?;

            let allowed = allowed_cells_in(tx, batch_id, stage)?;
            if let Some(unknown) = results.iter().find(|r| !allowed.contains(&r.cell)) {
                return Err(EngineError::Validation(format!(
                    "单元 {} 不属于该批次的{}范围",
                    unknown.cell, stage
                )));
            }

            match stage {
                StageKind::Cutting => {
                    for result in results {
                        StageTaskRepository::upsert_cutting_result_in(tx, batch_id, result)?;
                    }
                    task.pieces_completed = StageTaskRepository::find_cutting_results_in(tx, batch_id)?
                        .iter()
                        .map(|r| r.actual_pieces)
                        .sum();
                }
                StageKind::Sewing | StageKind::Finishing => {
                    for result in results {
                        StageTaskRepository::upsert_draft_in(tx, &task.task_id, result)?;
                    }
                }
            }

            if let Some(notes) = notes {
                task.notes = Some(notes.to_string());
            }
            StageTaskRepository::update_task_in(tx, &task)?;

            let total: i64 = results.iter().map(|r| r.quantity).sum();
            pending.record(
                tx,
                batch_id,
                TimelineEventKind::ProgressRecorded,
                Some(&actor.actor_id),
                Some(json!({ "stage": stage.as_str(), "cells": results.len(), "pieces": total })),
            )?;
            debug!(batch_id = batch_id, stage = %stage, cells = results.len(), pieces = total, "进度已保存");
            Ok(task)
        })
    }

    // ==========================================
    // 完工
    // ==========================================

    /// 工人手动完工
    ///
    /// - 裁剪: report.results 为各单元实际件数 (与已保存进度合并), 合计必须 > 0
    /// - 缝制/后整: 以子批次累计为准, 必须已达到上游上限; report.results 若给出须与累计一致
    pub fn complete(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        stage: StageKind,
        report: &CompletionReport,
    ) -> EngineResult<StageTask> {
        require_worker_role(actor, stage, StageAction::Complete)?;
        validate_cell_quantities(&report.results)?;
        if report.reject_pieces < 0 {
            return Err(EngineError::Validation(format!(
                "次品数不能为负: {}",
                report.reject_pieces
            )));
        }
        if !report.waste_qty.is_finite() || report.waste_qty < 0.0 {
            return Err(EngineError::Validation(format!("损耗量无效: {}", report.waste_qty)));
        }

        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            let task = load_task_in(tx, &batch, stage, StageAction::Complete)?;
            ensure_assignee(actor, &task, StageAction::Complete)?;
            complete_in(tx, &batch, task, report, actor, pending, false)
        })
    }

    // ==========================================
    // 核验
    // ==========================================

    /// 主管核验裁剪/缝制; 后整由仓库核验 (BatchFlow::verify_warehouse)
    pub fn verify_stage(&self, actor: &ActorContext, batch_id: &str, stage: StageKind) -> EngineResult<StageTask> {
        if stage == StageKind::Finishing {
            return Err(EngineError::Validation("后整工序由仓库核验批次完成".into()));
        }

        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            next_state(batch.status, BatchAction::verify_of(stage), actor.role)?;

            let mut task = load_task_in(tx, &batch, stage, StageAction::Verify)?;
            if task.status != TaskStatus::Completed {
                return Err(EngineError::InvalidStageTransition {
                    stage,
                    current: task.status,
                    batch_status: batch.status,
                    attempted: StageAction::Verify,
                });
            }

            if stage == StageKind::Cutting {
                let confirmed = StageTaskRepository::confirm_cutting_results_in(tx, batch_id, &actor.actor_id)?;
                debug!(batch_id = batch_id, confirmed = confirmed, "裁剪结果已确认");
            }

            task.status = TaskStatus::Verified;
            task.verified_by = Some(actor.actor_id.clone());
            task.verified_at = Some(now_ts());
            StageTaskRepository::update_task_in(tx, &task)?;
            apply_transition_in(
                tx,
                &batch,
                BatchAction::verify_of(stage),
                actor,
                pending,
                Some(json!({ "stage": stage.as_str() })),
            )?;
            Ok(task)
        })
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn task(&self, batch_id: &str, stage: StageKind) -> EngineResult<Option<StageTask>> {
        self.ctx
            .read(|conn| Ok(StageTaskRepository::find_task_in(conn, batch_id, stage)?))
    }

    pub fn cutting_results(&self, batch_id: &str) -> EngineResult<Vec<CuttingResult>> {
        self.ctx
            .read(|conn| Ok(StageTaskRepository::find_cutting_results_in(conn, batch_id)?))
    }

    /// 缝制/后整草稿
    pub fn drafts(&self, batch_id: &str, stage: StageKind) -> EngineResult<Vec<CellQuantity>> {
        self.ctx.read(|conn| {
            match StageTaskRepository::find_task_in(conn, batch_id, stage)? {
                Some(task) => Ok(StageTaskRepository::find_drafts_in(conn, &task.task_id)?),
                None => Ok(Vec::new()),
            }
        })
    }
}

// ==========================================
// 事务内共用操作
// ==========================================

/// 完工 (手动或由子批次自动触发)
///
/// 调用方须持有写事务; 任务必须仍为 IN_PROGRESS,保证同一累计阈值只触发一次
pub(crate) fn complete_in(
    conn: &Connection,
    batch: &ProductionBatch,
    mut task: StageTask,
    report: &CompletionReport,
    actor: &ActorContext,
    pending: &mut PendingEvents,
    automatic: bool,
) -> EngineResult<StageTask> {
    let stage = task.stage;
    ensure_in_progress(batch, &task, StageAction::Complete)?;

    match stage {
        StageKind::Cutting => {
            let requests = BatchRepository::find_requests_in(conn, &batch.batch_id)?;
            let requested: BTreeSet<CellKey> = requests.iter().map(|r| r.cell()).collect();
            if let Some(unknown) = report.results.iter().find(|r| !requested.contains(&r.cell)) {
                return Err(EngineError::Validation(format!(
                    "裁剪结果 {} 不在批次需求范围内",
                    unknown.cell
                )));
            }

            for result in &report.results {
                StageTaskRepository::upsert_cutting_result_in(conn, &batch.batch_id, result)?;
            }
            let actuals = StageTaskRepository::find_cutting_results_in(conn, &batch.batch_id)?;
            let total: i64 = actuals.iter().map(|r| r.actual_pieces).sum();
            if total <= 0 {
                warn!(batch_id = %batch.batch_id, "裁剪完工被拒: 实际件数合计为 0");
                return Err(EngineError::EmptyResultSet { stage });
            }

            // 需求件数为 0 的单元按实际件数回填
            for request in requests.iter().filter(|r| r.requested_pieces == 0) {
                let cell = request.cell();
                let actual = actuals
                    .iter()
                    .find(|r| r.cell() == cell)
                    .map(|r| r.actual_pieces)
                    .unwrap_or(0);
                if actual > 0 {
                    BatchRepository::update_requested_pieces_in(conn, &request.request_id, actual)?;
                    pending.record(
                        conn,
                        &batch.batch_id,
                        TimelineEventKind::RequestBackfilled,
                        Some(&actor.actor_id),
                        Some(json!({
                            "product_size": cell.product_size,
                            "color": cell.color,
                            "requested_pieces": actual,
                        })),
                    )?;
                }
            }

            task.pieces_completed = total;
            task.reject_pieces = report.reject_pieces;
            task.waste_qty = report.waste_qty;
        }
        StageKind::Sewing | StageKind::Finishing => {
            let ceiling = ceiling_in(conn, &batch.batch_id, stage)?;
            let totals = SubBatchRepository::totals_by_cell_in(conn, &batch.batch_id, stage)?;
            let ceiling_total = sum_ceiling(&ceiling);
            let processed_total: i64 = totals.values().map(|t| t.processed()).sum();

            if processed_total == 0 {
                return Err(EngineError::EmptyResultSet { stage });
            }
            if processed_total < ceiling_total {
                warn!(
                    batch_id = %batch.batch_id,
                    stage = %stage,
                    processed = processed_total,
                    ceiling = ceiling_total,
                    "完工被拒: 累计数量未达到上游上限"
                );
                return Err(EngineError::InvalidStageTransition {
                    stage,
                    current: task.status,
                    batch_status: batch.status,
                    attempted: StageAction::Complete,
                });
            }
            for claimed in &report.results {
                let good = totals.get(&claimed.cell).map(|t| t.good).unwrap_or(0);
                if good != claimed.quantity {
                    return Err(EngineError::Validation(format!(
                        "单元 {} 上报良品 {} 与子批次累计 {} 不一致",
                        claimed.cell, claimed.quantity, good
                    )));
                }
            }

            task.pieces_completed = totals.values().map(|t| t.good).sum();
            task.reject_pieces = totals.values().map(|t| t.reject).sum();
            task.waste_qty += report.waste_qty;
            StageTaskRepository::clear_drafts_in(conn, &task.task_id)?;
        }
    }

    task.status = TaskStatus::Completed;
    task.completed_at = Some(now_ts());
    if report.notes.is_some() {
        task.notes = report.notes.clone();
    }
    StageTaskRepository::update_task_in(conn, &task)?;

    apply_transition_in(
        conn,
        batch,
        BatchAction::complete_of(stage),
        actor,
        pending,
        Some(json!({
            "stage": stage.as_str(),
            "pieces_completed": task.pieces_completed,
            "reject_pieces": task.reject_pieces,
            "automatic": automatic,
        })),
    )?;
    info!(
        batch_id = %batch.batch_id,
        stage = %stage,
        pieces = task.pieces_completed,
        reject = task.reject_pieces,
        automatic = automatic,
        "工序完工"
    );
    Ok(task)
}

/// 读取工序任务; 尚未指派视为 PENDING
pub(crate) fn load_task_in(
    conn: &Connection,
    batch: &ProductionBatch,
    stage: StageKind,
    attempted: StageAction,
) -> EngineResult<StageTask> {
    StageTaskRepository::find_task_in(conn, &batch.batch_id, stage)?.ok_or(
        EngineError::InvalidStageTransition {
            stage,
            current: TaskStatus::Pending,
            batch_status: batch.status,
            attempted,
        },
    )
}

pub(crate) fn require_worker_role(actor: &ActorContext, stage: StageKind, action: StageAction) -> EngineResult<()> {
    if actor.role != stage.worker_role() {
        return Err(EngineError::forbidden(actor.role, format!("{}_{}", action, stage)));
    }
    Ok(())
}

pub(crate) fn ensure_assignee(actor: &ActorContext, task: &StageTask, action: StageAction) -> EngineResult<()> {
    if task.assigned_to.as_deref() != Some(actor.actor_id.as_str()) {
        warn!(
            task_id = %task.task_id,
            actor = %actor.actor_id,
            assigned_to = ?task.assigned_to,
            "非指派工人操作被拒绝"
        );
        return Err(EngineError::forbidden(actor.role, format!("{}_{}", action, task.stage)));
    }
    Ok(())
}

pub(crate) fn ensure_in_progress(
    batch: &ProductionBatch,
    task: &StageTask,
    attempted: StageAction,
) -> EngineResult<()> {
    if task.status != TaskStatus::InProgress || batch.status != task.stage.in_progress_status() {
        return Err(EngineError::InvalidStageTransition {
            stage: task.stage,
            current: task.status,
            batch_status: batch.status,
            attempted,
        });
    }
    Ok(())
}

/// 数量非负,单元不重复
pub(crate) fn validate_cell_quantities(results: &[CellQuantity]) -> EngineResult<()> {
    let mut seen = BTreeSet::new();
    for result in results {
        if result.quantity < 0 {
            return Err(EngineError::Validation(format!(
                "单元 {} 数量不能为负: {}",
                result.cell, result.quantity
            )));
        }
        if !seen.insert(&result.cell) {
            return Err(EngineError::Validation(format!("重复的单元: {}", result.cell)));
        }
    }
    Ok(())
}

fn allowed_cells_in(conn: &Connection, batch_id: &str, stage: StageKind) -> EngineResult<BTreeSet<CellKey>> {
    match stage {
        StageKind::Cutting => Ok(BatchRepository::find_requests_in(conn, batch_id)?
            .iter()
            .map(|r| r.cell())
            .collect()),
        StageKind::Sewing | StageKind::Finishing => Ok(ceiling_in(conn, batch_id, stage)?.into_keys().collect()),
    }
}
