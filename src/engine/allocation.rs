// ==========================================
// 成衣生产流转系统 - 物料分配规划
// ==========================================
// planAndCommit(batchDraft) -> Batch | 错误
// 1. 逐项读取并校验库存 (先读后判,不修改)
// 2. 每个尺码/颜色需求的颜色必须有对应的物料分配
// 3. 同一事务内: 扣减库存, 写批次, 写需求
// 红线: 任一子校验失败即整体中止,不留下任何库存变更 (全有或全无)
// ==========================================

use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::now_ts;
use crate::domain::batch::{
    BatchDetail, BatchDraft, CellKey, ProductionBatch, SizeColorRequest, SizeColorRequestDraft,
};
use crate::domain::material::{AllocationRequest, MaterialAllocation};
use crate::domain::timeline::TimelineEventKind;
use crate::domain::types::{ActorContext, ActorRole, BatchStatus};
use crate::engine::batch_flow::{apply_transition_in, load_batch_in, load_detail_in};
use crate::engine::context::EngineContext;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::{load_variant_in, MaterialLedger};
use crate::engine::state_machine::{next_state, BatchAction};
use crate::engine::timeline::PendingEvents;
use crate::repository::BatchRepository;

pub struct AllocationPlanner {
    ctx: EngineContext,
}

impl AllocationPlanner {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// 创建批次并 (可选) 一次性提交物料分配
    ///
    /// # 返回
    /// - 无分配: 批次停在 PENDING
    /// - 有分配: 同一事务内 PENDING -> MATERIAL_REQUESTED -> MATERIAL_ALLOCATED
    pub fn plan_and_commit(&self, actor: &ActorContext, draft: &BatchDraft) -> EngineResult<BatchDetail> {
        if actor.role != ActorRole::ProductionLead {
            return Err(EngineError::forbidden(actor.role, "CREATE_BATCH"));
        }
        validate_draft(draft)?;
        if !draft.allocations.is_empty() {
            validate_allocation_requests(&draft.allocations)?;
        }

        let prefix = self.ctx.config().batch_sku_prefix.clone();

        let detail = self.ctx.write(|tx, pending| {
            if !draft.allocations.is_empty() {
                precheck_allocations_in(tx, &draft.allocations, &draft_cells(&draft.requests))?;
            }

            let batch_sku = match &draft.batch_sku {
                Some(sku) => {
                    let sku = sku.trim().to_string();
                    if BatchRepository::sku_exists_in(tx, &sku)? {
                        return Err(EngineError::Validation(format!("批次编号已存在: {}", sku)));
                    }
                    sku
                }
                None => generate_batch_sku_in(tx, &prefix, now_ts().date())?,
            };

            let now = now_ts();
            let batch = ProductionBatch {
                batch_id: Uuid::new_v4().to_string(),
                batch_sku,
                product_id: draft.product_id.trim().to_string(),
                product_name: draft.product_name.trim().to_string(),
                status: BatchStatus::Pending,
                target_quantity: draft.target_quantity,
                total_rolls: 0,
                notes: draft.notes.clone(),
                created_by: actor.actor_id.clone(),
                created_at: now,
                updated_at: now,
                revision: 0,
            };
            BatchRepository::insert_in(tx, &batch)?;

            for request in &draft.requests {
                BatchRepository::insert_request_in(
                    tx,
                    &SizeColorRequest {
                        request_id: Uuid::new_v4().to_string(),
                        batch_id: batch.batch_id.clone(),
                        product_size: request.product_size.trim().to_string(),
                        color: request.color.trim().to_string(),
                        requested_pieces: request.requested_pieces,
                    },
                )?;
            }

            pending.record(
                tx,
                &batch.batch_id,
                TimelineEventKind::BatchCreated,
                Some(&actor.actor_id),
                Some(json!({
                    "batch_sku": batch.batch_sku,
                    "product_id": batch.product_id,
                    "target_quantity": batch.target_quantity,
                    "cells": draft.requests.len(),
                })),
            )?;

            if !draft.allocations.is_empty() {
                let requested =
                    apply_transition_in(tx, &batch, BatchAction::RequestMaterial, actor, pending, None)?;
                commit_allocations_in(tx, &requested, &draft.allocations, actor, pending)?;
            }

            load_detail_in(tx, &batch.batch_id)
        });

        match &detail {
            Ok(d) => info!(
                batch_id = %d.batch.batch_id,
                batch_sku = %d.batch.batch_sku,
                status = %d.batch.status,
                allocations = d.allocations.len(),
                "批次已创建"
            ),
            Err(e) => warn!(product_id = %draft.product_id, error = %e, "批次创建失败,未做任何修改"),
        }
        detail
    }

    /// 为 MATERIAL_REQUESTED 批次提交物料分配 -> MATERIAL_ALLOCATED
    pub fn allocate(
        &self,
        actor: &ActorContext,
        batch_id: &str,
        allocations: &[AllocationRequest],
    ) -> EngineResult<BatchDetail> {
        if allocations.is_empty() {
            return Err(EngineError::Validation("物料分配不能为空".into()));
        }
        validate_allocation_requests(allocations)?;

        self.ctx.write(|tx, pending| {
            let batch = load_batch_in(tx, batch_id)?;
            // 状态与角色先于库存校验
            next_state(batch.status, BatchAction::AllocateMaterial, actor.role)?;

            let requests = BatchRepository::find_requests_in(tx, batch_id)?;
            let cells: Vec<CellKey> = requests.iter().map(SizeColorRequest::cell).collect();
            precheck_allocations_in(tx, allocations, &cells)?;
            commit_allocations_in(tx, &batch, allocations, actor, pending)?;
            load_detail_in(tx, batch_id)
        })
    }
}

// ==========================================
// 校验
// ==========================================

fn validate_draft(draft: &BatchDraft) -> EngineResult<()> {
    if draft.product_id.trim().is_empty() || draft.product_name.trim().is_empty() {
        return Err(EngineError::Validation("批次缺少产品信息".into()));
    }
    if draft.target_quantity < 0 {
        return Err(EngineError::Validation(format!(
            "目标数量不能为负: {}",
            draft.target_quantity
        )));
    }
    if let Some(sku) = &draft.batch_sku {
        if sku.trim().is_empty() {
            return Err(EngineError::Validation("批次编号不能为空字符串".into()));
        }
    }
    if draft.requests.is_empty() {
        return Err(EngineError::Validation("至少需要一个尺码/颜色需求".into()));
    }

    let mut seen = BTreeSet::new();
    for request in &draft.requests {
        if request.product_size.trim().is_empty() || request.color.trim().is_empty() {
            return Err(EngineError::Validation("尺码/颜色不能为空".into()));
        }
        if request.requested_pieces < 0 {
            return Err(EngineError::Validation(format!(
                "需求件数不能为负: {}/{} = {}",
                request.product_size, request.color, request.requested_pieces
            )));
        }
        let cell = CellKey::new(request.product_size.trim(), request.color.trim());
        if !seen.insert(cell.clone()) {
            return Err(EngineError::Validation(format!("重复的尺码/颜色需求: {}", cell)));
        }
    }
    Ok(())
}

fn validate_allocation_requests(allocations: &[AllocationRequest]) -> EngineResult<()> {
    let mut seen = BTreeSet::new();
    for allocation in allocations {
        if allocation.variant_id.trim().is_empty() {
            return Err(EngineError::Validation("物料分配缺少 variant_id".into()));
        }
        if !allocation.allocated_qty.is_finite() || allocation.allocated_qty <= 0.0 {
            return Err(EngineError::Validation(format!(
                "分配数量无效: {} = {}",
                allocation.variant_id, allocation.allocated_qty
            )));
        }
        if allocation.roll_quantity < 0 {
            return Err(EngineError::Validation(format!(
                "卷数不能为负: {} = {}",
                allocation.variant_id, allocation.roll_quantity
            )));
        }
        if !seen.insert(allocation.variant_id.as_str()) {
            return Err(EngineError::Validation(format!(
                "重复的物料分配: {}",
                allocation.variant_id
            )));
        }
    }
    Ok(())
}

fn draft_cells(requests: &[SizeColorRequestDraft]) -> Vec<CellKey> {
    requests
        .iter()
        .map(|r| CellKey::new(r.product_size.trim(), r.color.trim()))
        .collect()
}

/// 先读后判: 库存充足 + 无孤立颜色需求; 不做任何修改
fn precheck_allocations_in(
    conn: &Connection,
    allocations: &[AllocationRequest],
    cells: &[CellKey],
) -> EngineResult<()> {
    let mut colors = BTreeSet::new();
    for allocation in allocations {
        let variant = load_variant_in(conn, &allocation.variant_id)?;
        if allocation.allocated_qty > variant.stock {
            warn!(
                variant_id = %variant.variant_id,
                available = variant.stock,
                requested = allocation.allocated_qty,
                "分配校验失败: 库存不足"
            );
            return Err(EngineError::InsufficientStock {
                variant_id: variant.variant_id,
                available: variant.stock,
                requested: allocation.allocated_qty,
            });
        }
        colors.insert(variant.color);
    }

    if let Some(orphan) = cells.iter().find(|cell| !colors.contains(&cell.color)) {
        return Err(EngineError::Validation(format!(
            "需求 {} 的颜色没有对应的物料分配",
            orphan
        )));
    }
    Ok(())
}

/// 预留 + 确认全部分配, 记录总卷数, 推进到 MATERIAL_ALLOCATED
fn commit_allocations_in(
    conn: &Connection,
    batch: &ProductionBatch,
    allocations: &[AllocationRequest],
    actor: &ActorContext,
    pending: &mut PendingEvents,
) -> EngineResult<Vec<MaterialAllocation>> {
    let mut committed = Vec::with_capacity(allocations.len());
    for request in allocations {
        let reservation = MaterialLedger::reserve_in(conn, &request.variant_id, request.allocated_qty)?;
        let allocation = MaterialLedger::commit_in(conn, &batch.batch_id, &reservation, request.roll_quantity)?;
        pending.record(
            conn,
            &batch.batch_id,
            TimelineEventKind::MaterialReserved,
            Some(&actor.actor_id),
            Some(json!({
                "variant_id": allocation.variant_id,
                "color": allocation.color,
                "qty": allocation.allocated_qty,
                "rolls": allocation.roll_quantity,
                "stock_before": reservation.available_at_reserve,
            })),
        )?;
        committed.push(allocation);
    }

    let total_rolls: i64 = committed.iter().map(|a| a.roll_quantity).sum();
    BatchRepository::update_total_rolls_in(conn, &batch.batch_id, total_rolls)?;

    apply_transition_in(conn, batch, BatchAction::AllocateMaterial, actor, pending, None)?;
    Ok(committed)
}

/// 生成批次编号: {prefix}-{YYYYMMDD}-{seq:03}
pub fn generate_batch_sku_in(conn: &Connection, prefix: &str, date: NaiveDate) -> EngineResult<String> {
    let day_prefix = format!("{}-{}-", prefix, date.format("%Y%m%d"));
    let mut seq = BatchRepository::count_sku_prefix_in(conn, &day_prefix)? + 1;
    loop {
        let candidate = format!("{}{:03}", day_prefix, seq);
        if !BatchRepository::sku_exists_in(conn, &candidate)? {
            return Ok(candidate);
        }
        seq += 1;
    }
}
