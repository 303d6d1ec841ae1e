// ==========================================
// 成衣生产流转系统 - 批次数量投影
// ==========================================
// actualQuantity / rejectQuantity 不落库,由工序任务与子批次合计推导
// 纯函数: 输入 BatchDetail,输出读模型
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::batch::{BatchDetail, CellKey};
use crate::domain::sub_batch::RejectBreakdown;
use crate::domain::types::StageKind;

/// 批次级数量汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchQuantities {
    pub target_quantity: i64,
    pub requested_pieces: i64,
    pub cut_pieces: i64,
    pub cutting_reject: i64,
    pub sewn_good: i64,
    pub sewing_reject: i64,
    pub finished_good: i64,
    pub finishing_reject: RejectBreakdown,
    /// 已到达最远工序的良品数
    pub actual_quantity: i64,
    /// 各工序次品合计
    pub reject_quantity: i64,
}

/// 单元级数量汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellProjection {
    pub cell: CellKey,
    pub requested: i64,
    pub cut: i64,
    pub sewn_good: i64,
    pub sewing_reject: i64,
    pub finished_good: i64,
    pub finishing_reject: RejectBreakdown,
    pub remaining_to_sew: i64,
    pub remaining_to_finish: i64,
}

impl CellProjection {
    fn empty(cell: CellKey) -> Self {
        Self {
            cell,
            requested: 0,
            cut: 0,
            sewn_good: 0,
            sewing_reject: 0,
            finished_good: 0,
            finishing_reject: RejectBreakdown::none(StageKind::Finishing),
            remaining_to_sew: 0,
            remaining_to_finish: 0,
        }
    }
}

pub fn project_cells(detail: &BatchDetail) -> Vec<CellProjection> {
    let mut cells: BTreeMap<CellKey, CellProjection> = BTreeMap::new();

    for request in &detail.requests {
        let cell = request.cell();
        cells
            .entry(cell.clone())
            .or_insert_with(|| CellProjection::empty(cell))
            .requested = request.requested_pieces;
    }
    for result in &detail.cutting_results {
        let cell = result.cell();
        cells
            .entry(cell.clone())
            .or_insert_with(|| CellProjection::empty(cell))
            .cut = result.actual_pieces;
    }
    for sub_batch in &detail.sub_batches {
        for item in &sub_batch.items {
            let row = cells
                .entry(item.cell.clone())
                .or_insert_with(|| CellProjection::empty(item.cell.clone()));
            match sub_batch.stage {
                StageKind::Sewing => {
                    row.sewn_good += item.good_quantity;
                    row.sewing_reject += item.reject.total();
                }
                StageKind::Finishing => {
                    row.finished_good += item.good_quantity;
                    row.finishing_reject = row.finishing_reject.add(&item.reject).unwrap_or(row.finishing_reject);
                }
                StageKind::Cutting => {}
            }
        }
    }

    cells
        .into_values()
        .map(|mut row| {
            row.remaining_to_sew = (row.cut - row.sewn_good - row.sewing_reject).max(0);
            row.remaining_to_finish = (row.sewn_good - row.finished_good - row.finishing_reject.total()).max(0);
            row
        })
        .collect()
}

pub fn project(detail: &BatchDetail) -> BatchQuantities {
    let cells = project_cells(detail);

    let finishing_reject = cells
        .iter()
        .fold(RejectBreakdown::none(StageKind::Finishing), |acc, row| {
            acc.add(&row.finishing_reject).unwrap_or(acc)
        });
    let cutting_reject = detail
        .task(StageKind::Cutting)
        .map(|t| t.reject_pieces)
        .unwrap_or(0);

    let cut_pieces: i64 = cells.iter().map(|c| c.cut).sum();
    let sewn_good: i64 = cells.iter().map(|c| c.sewn_good).sum();
    let sewing_reject: i64 = cells.iter().map(|c| c.sewing_reject).sum();
    let finished_good: i64 = cells.iter().map(|c| c.finished_good).sum();

    let actual_quantity = if detail.sub_batches_of(StageKind::Finishing).next().is_some() {
        finished_good
    } else if detail.sub_batches_of(StageKind::Sewing).next().is_some() {
        sewn_good
    } else {
        cut_pieces
    };

    BatchQuantities {
        target_quantity: detail.batch.target_quantity,
        requested_pieces: cells.iter().map(|c| c.requested).sum(),
        cut_pieces,
        cutting_reject,
        sewn_good,
        sewing_reject,
        finished_good,
        finishing_reject,
        actual_quantity,
        reject_quantity: cutting_reject + sewing_reject + finishing_reject.total(),
    }
}
