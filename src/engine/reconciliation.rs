// ==========================================
// 成衣生产流转系统 - 子批次对账引擎
// ==========================================
// 缝制 -> 后整, 后整 -> 仓库 的部分交付
// 状态: 针对固定上游上限的累计部分履约,不是简单的进度计数
//   上限(缝制) = 裁剪实际件数
//   上限(后整) = 缝制累计良品
//   已处理 = 良品 + 次品 (次品同样消耗上游件数)
// 红线: 累计与上限必须在提交事务内重新读取,不信任调用方状态
// 红线: 累计达到上限时在同一事务内自动完工,且只触发一次
// ==========================================

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::now_ts;
use crate::domain::batch::CellKey;
use crate::domain::stage_task::CompletionReport;
use crate::domain::sub_batch::{CellSubmission, SubBatch, SubBatchItem};
use crate::domain::timeline::TimelineEventKind;
use crate::domain::types::{ActorContext, ActorRole, StageKind, SubBatchStatus};
use crate::engine::batch_flow::load_batch_in;
use crate::engine::context::EngineContext;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::stage_task::{complete_in, ensure_assignee, ensure_in_progress, load_task_in, require_worker_role};
use crate::engine::state_machine::StageAction;
use crate::repository::{StageTaskRepository, SubBatchRepository};

// ==========================================
// CellBalance - 单元对账余额
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellBalance {
    pub cell: CellKey,
    pub ceiling: i64,
    pub good: i64,
    pub reject: i64,
    pub remaining: i64,
}

impl CellBalance {
    pub fn processed(&self) -> i64 {
        self.good + self.reject
    }
}

/// 子批次提交结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub sub_batch: SubBatch,
    /// 本次提交是否触发工序自动完工
    pub stage_completed: bool,
    pub processed_total: i64,
    pub ceiling_total: i64,
}

impl SubmissionOutcome {
    pub fn remaining_total(&self) -> i64 {
        (self.ceiling_total - self.processed_total).max(0)
    }
}

// ==========================================
// SubBatchReconciler - 子批次对账
// ==========================================
pub struct SubBatchReconciler {
    ctx: EngineContext,
}

impl SubBatchReconciler {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// 工人提交一批部分产出
    ///
    /// # 流程
    /// 1. 事务内重新读取每个单元的上限与累计
    /// 2. 任一单元超过剩余量 -> 整体拒绝 (InsufficientRemaining)
    /// 3. 只记录非零单元,生成新子批次
    /// 4. 累计 >= 上限合计 -> 同一事务内自动完工
    pub fn submit(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        stage: StageKind,
        submissions: &[CellSubmission],
        notes: Option<&str>,
    ) -> EngineResult<SubmissionOutcome> {
        ensure_reconciled_stage(stage)?;
        require_worker_role(actor, stage, StageAction::Submit)?;
        validate_submissions(stage, submissions)?;

        let outcome = self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            let mut task = load_task_in(tx, &batch, stage, StageAction::Submit)?;
            ensure_assignee(actor, &task, StageAction::Submit)?;

            // 余额先于任务状态校验: 已耗尽的单元始终报 InsufficientRemaining
            let balances = balances_in(tx, batch_id, stage)?;
            let accepted = plan_submission(stage, &balances, submissions)?;
            ensure_in_progress(&batch, &task, StageAction::Submit)?;

            let sequence_no = SubBatchRepository::next_sequence_no_in(tx, batch_id, stage)?;
            let sub_batch_id = Uuid::new_v4().to_string();
            let sub_batch = SubBatch {
                sub_batch_id: sub_batch_id.clone(),
                batch_id: batch_id.to_string(),
                sub_batch_sku: sub_batch_sku(&batch.batch_sku, stage, sequence_no),
                stage,
                sequence_no,
                status: SubBatchStatus::Submitted,
                submitted_by: actor.actor_id.clone(),
                submitted_at: now_ts(),
                verified_by: None,
                verified_at: None,
                notes: notes.map(str::to_string),
                items: accepted
                    .iter()
                    .map(|s| SubBatchItem {
                        sub_batch_id: sub_batch_id.clone(),
                        cell: s.cell.clone(),
                        good_quantity: s.good_quantity,
                        reject: s.reject,
                    })
                    .collect(),
            };
            SubBatchRepository::insert_in(tx, &sub_batch)?;

            let good = sub_batch.good_output();
            let reject = sub_batch.reject_total();
            pending.record(
                tx,
                batch_id,
                TimelineEventKind::SubBatchSubmitted,
                Some(&actor.actor_id),
                Some(json!({
                    "sub_batch_sku": sub_batch.sub_batch_sku,
                    "stage": stage.as_str(),
                    "sequence_no": sequence_no,
                    "cells": sub_batch.items.len(),
                    "good": good,
                    "reject": sub_batch.reject_breakdown(),
                })),
            )?;

            let ceiling_total: i64 = balances.values().map(|b| b.ceiling).sum();
            let before_total: i64 = balances.values().map(|b| b.processed()).sum();
            let processed_total = before_total + good + reject;

            task.pieces_completed += good;
            task.reject_pieces += reject;
            StageTaskRepository::update_task_in(tx, &task)?;
            StageTaskRepository::clear_drafts_in(tx, &task.task_id)?;

            debug!(
                batch_id = batch_id,
                stage = %stage,
                processed = processed_total,
                ceiling = ceiling_total,
                "子批次累计"
            );

            let stage_completed = processed_total >= ceiling_total;
            if stage_completed {
                complete_in(tx, &batch, task, &CompletionReport::default(), actor, pending, true)?;
            }

            Ok(SubmissionOutcome {
                sub_batch,
                stage_completed,
                processed_total,
                ceiling_total,
            })
        })?;

        info!(
            batch_id = batch_id,
            sub_batch_sku = %outcome.sub_batch.sub_batch_sku,
            remaining = outcome.remaining_total(),
            stage_completed = outcome.stage_completed,
            "子批次已提交"
        );
        Ok(outcome)
    }

    /// 接收方核验子批次; 已核验的子批次不可再次核验, 终态批次的子批次不可核验
    ///
    /// 缝制子批次: 后整工人或主管; 后整子批次: 仓库或主管
    pub fn verify_sub_batch(&self, actor: &ActorContext, sub_batch_id: &str) -> EngineResult<SubBatch> {
        self.ctx.write(|tx, pending| {
            let sub_batch = SubBatchRepository::find_by_id_in(tx, sub_batch_id)?
                .ok_or_else(|| EngineError::not_found("SubBatch", sub_batch_id))?;

            if !receiving_roles(sub_batch.stage).contains(&actor.role) {
                return Err(EngineError::forbidden(
                    actor.role,
                    format!("VERIFY_SUB_BATCH_{}", sub_batch.stage),
                ));
            }
            // 已取消或已完结的批次不再接收子批次
            let batch = load_batch_in(tx, &sub_batch.batch_id)?;
            if batch.status.is_terminal() {
                let task = load_task_in(tx, &batch, sub_batch.stage, StageAction::Verify)?;
                warn!(
                    sub_batch_id = sub_batch_id,
                    batch_status = %batch.status,
                    "终态批次的子批次核验被拒绝"
                );
                return Err(EngineError::InvalidStageTransition {
                    stage: sub_batch.stage,
                    current: task.status,
                    batch_status: batch.status,
                    attempted: StageAction::Verify,
                });
            }
            if sub_batch.status == SubBatchStatus::Verified {
                warn!(sub_batch_id = sub_batch_id, "子批次重复核验被拒绝");
                return Err(EngineError::SubBatchAlreadyVerified {
                    sub_batch_id: sub_batch_id.to_string(),
                    verified_by: sub_batch.verified_by,
                });
            }

            let verified_at = now_ts();
            if !SubBatchRepository::mark_verified_in(tx, sub_batch_id, &actor.actor_id, &verified_at)? {
                return Err(EngineError::SubBatchAlreadyVerified {
                    sub_batch_id: sub_batch_id.to_string(),
                    verified_by: None,
                });
            }
            pending.record(
                tx,
                &sub_batch.batch_id,
                TimelineEventKind::SubBatchVerified,
                Some(&actor.actor_id),
                Some(json!({
                    "sub_batch_sku": sub_batch.sub_batch_sku,
                    "stage": sub_batch.stage.as_str(),
                })),
            )?;

            SubBatchRepository::find_by_id_in(tx, sub_batch_id)?
                .ok_or_else(|| EngineError::not_found("SubBatch", sub_batch_id))
        })
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 各单元上限 / 累计 / 剩余
    pub fn remaining(&self, batch_id: &str, stage: StageKind) -> EngineResult<Vec<CellBalance>> {
        ensure_reconciled_stage(stage)?;
        self.ctx.read(|conn| {
            load_batch_in(conn, batch_id)?;
            Ok(balances_in(conn, batch_id, stage)?.into_values().collect())
        })
    }

    pub fn list_sub_batches(&self, batch_id: &str, stage: Option<StageKind>) -> EngineResult<Vec<SubBatch>> {
        self.ctx
            .read(|conn| Ok(SubBatchRepository::find_by_batch_in(conn, batch_id, stage)?))
    }

    pub fn get_sub_batch(&self, sub_batch_id: &str) -> EngineResult<SubBatch> {
        self.ctx.read(|conn| {
            SubBatchRepository::find_by_id_in(conn, sub_batch_id)?
                .ok_or_else(|| EngineError::not_found("SubBatch", sub_batch_id))
        })
    }
}

// ==========================================
// 上限与余额
// ==========================================

/// 每个单元的上游上限
pub(crate) fn ceiling_in(conn: &Connection, batch_id: &str, stage: StageKind) -> EngineResult<BTreeMap<CellKey, i64>> {
    match stage {
        StageKind::Cutting => Err(EngineError::Validation("裁剪工序没有上游上限".into())),
        StageKind::Sewing => Ok(StageTaskRepository::find_cutting_results_in(conn, batch_id)?
            .into_iter()
            .map(|r| (r.cell(), r.actual_pieces))
            .collect()),
        StageKind::Finishing => Ok(SubBatchRepository::totals_by_cell_in(conn, batch_id, StageKind::Sewing)?
            .into_iter()
            .map(|(cell, totals)| (cell, totals.good))
            .collect()),
    }
}

pub(crate) fn sum_ceiling(ceiling: &BTreeMap<CellKey, i64>) -> i64 {
    ceiling.values().sum()
}

/// 事务内读取的单元余额
pub fn balances_in(conn: &Connection, batch_id: &str, stage: StageKind) -> EngineResult<BTreeMap<CellKey, CellBalance>> {
    let ceiling = ceiling_in(conn, batch_id, stage)?;
    let totals = SubBatchRepository::totals_by_cell_in(conn, batch_id, stage)?;

    let cells: BTreeSet<&CellKey> = ceiling.keys().chain(totals.keys()).collect();
    let balances = cells
        .into_iter()
        .map(|cell| {
            let upper = ceiling.get(cell).copied().unwrap_or(0);
            let done = totals.get(cell).copied().unwrap_or_default();
            let balance = CellBalance {
                cell: cell.clone(),
                ceiling: upper,
                good: done.good,
                reject: done.reject,
                remaining: (upper - done.processed()).max(0),
            };
            (cell.clone(), balance)
        })
        .collect();
    Ok(balances)
}

/// 校验一次提交,返回需要记录的非零单元
///
/// 超过剩余量的单元整单元拒绝; 全部为零返回 EmptyResultSet
pub fn plan_submission(
    stage: StageKind,
    balances: &BTreeMap<CellKey, CellBalance>,
    submissions: &[CellSubmission],
) -> EngineResult<Vec<CellSubmission>> {
    let mut accepted = Vec::new();
    for submission in submissions.iter().filter(|s| !s.is_zero()) {
        let remaining = balances.get(&submission.cell).map(|b| b.remaining).unwrap_or(0);
        let requested = submission.processed();
        if requested > remaining {
            warn!(
                cell = %submission.cell,
                stage = %stage,
                remaining = remaining,
                requested = requested,
                "提交超过剩余数量"
            );
            return Err(EngineError::InsufficientRemaining {
                cell: submission.cell.clone(),
                remaining,
                requested,
            });
        }
        accepted.push(submission.clone());
    }

    if accepted.is_empty() {
        return Err(EngineError::EmptyResultSet { stage });
    }
    Ok(accepted)
}

/// 子批次编号: {batchSku}-SW-01 / {batchSku}-FN-01
pub fn sub_batch_sku(batch_sku: &str, stage: StageKind, sequence_no: i64) -> String {
    format!("{}-{}-{:02}", batch_sku, stage.sku_code(), sequence_no)
}

fn receiving_roles(stage: StageKind) -> &'static [ActorRole] {
    match stage {
        StageKind::Sewing => &[ActorRole::Finisher, ActorRole::Supervisor],
        StageKind::Finishing => &[ActorRole::Warehouse, ActorRole::Supervisor],
        StageKind::Cutting => &[],
    }
}

fn ensure_reconciled_stage(stage: StageKind) -> EngineResult<()> {
    if stage == StageKind::Cutting {
        return Err(EngineError::Validation("裁剪工序不使用子批次".into()));
    }
    Ok(())
}

fn validate_submissions(stage: StageKind, submissions: &[CellSubmission]) -> EngineResult<()> {
    if submissions.is_empty() {
        return Err(EngineError::EmptyResultSet { stage });
    }
    let mut seen = BTreeSet::new();
    for submission in submissions {
        if submission.reject.stage() != stage {
            return Err(EngineError::Validation(format!(
                "单元 {} 的次品分类与工序 {} 不匹配",
                submission.cell, stage
            )));
        }
        if submission.good_quantity < 0 || submission.reject.has_negative() {
            return Err(EngineError::Validation(format!(
                "单元 {} 数量不能为负",
                submission.cell
            )));
        }
        if !seen.insert(&submission.cell) {
            return Err(EngineError::Validation(format!("重复的单元: {}", submission.cell)));
        }
    }
    Ok(())
}
