// ==========================================
// 成衣生产流转系统 - 对账报表
// ==========================================
// 按 (尺码, 颜色) 单元列出各工序数量,可导出 CSV
// ==========================================

use serde::{Deserialize, Serialize};

use crate::domain::batch::BatchDetail;
use crate::domain::sub_batch::RejectBreakdown;
use crate::domain::types::BatchStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::projection::{project, project_cells, BatchQuantities, CellProjection};

const CSV_HEADER: [&str; 12] = [
    "product_size",
    "color",
    "requested",
    "cut",
    "sewn_good",
    "sewing_reject",
    "finished_good",
    "reject_kotor",
    "reject_sobek",
    "reject_rusak_jahit",
    "remaining_to_sew",
    "remaining_to_finish",
];

/// 批次对账报表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub batch_id: String,
    pub batch_sku: String,
    pub status: BatchStatus,
    pub rows: Vec<CellProjection>,
    pub totals: BatchQuantities,
}

impl ReconciliationReport {
    pub fn build(detail: &BatchDetail) -> Self {
        Self {
            batch_id: detail.batch.batch_id.clone(),
            batch_sku: detail.batch.batch_sku.clone(),
            status: detail.batch.status,
            rows: project_cells(detail),
            totals: project(detail),
        }
    }

    /// 导出 CSV (每个单元一行,末行为合计)
    pub fn to_csv(&self) -> EngineResult<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        writer.write_record(CSV_HEADER).map_err(export_error)?;

        for row in &self.rows {
            let (kotor, sobek, rusak_jahit) = finishing_buckets(&row.finishing_reject);
            writer
                .write_record(&[
                    row.cell.product_size.clone(),
                    row.cell.color.clone(),
                    row.requested.to_string(),
                    row.cut.to_string(),
                    row.sewn_good.to_string(),
                    row.sewing_reject.to_string(),
                    row.finished_good.to_string(),
                    kotor.to_string(),
                    sobek.to_string(),
                    rusak_jahit.to_string(),
                    row.remaining_to_sew.to_string(),
                    row.remaining_to_finish.to_string(),
                ])
                .map_err(export_error)?;
        }

        let (kotor, sobek, rusak_jahit) = finishing_buckets(&self.totals.finishing_reject);
        let remaining_to_sew: i64 = self.rows.iter().map(|r| r.remaining_to_sew).sum();
        let remaining_to_finish: i64 = self.rows.iter().map(|r| r.remaining_to_finish).sum();
        writer
            .write_record(&[
                "TOTAL".to_string(),
                String::new(),
                self.totals.requested_pieces.to_string(),
                self.totals.cut_pieces.to_string(),
                self.totals.sewn_good.to_string(),
                self.totals.sewing_reject.to_string(),
                self.totals.finished_good.to_string(),
                kotor.to_string(),
                sobek.to_string(),
                rusak_jahit.to_string(),
                remaining_to_sew.to_string(),
                remaining_to_finish.to_string(),
            ])
            .map_err(export_error)?;

        let bytes = writer
            .into_inner()
            .map_err(|e| EngineError::Export(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| EngineError::Export(e.to_string()))
    }
}

fn finishing_buckets(reject: &RejectBreakdown) -> (i64, i64, i64) {
    match reject {
        RejectBreakdown::Finishing {
            kotor,
            sobek,
            rusak_jahit,
        } => (*kotor, *sobek, *rusak_jahit),
        RejectBreakdown::Sewing { .. } => (0, 0, 0),
    }
}

fn export_error(e: csv::Error) -> EngineError {
    EngineError::Export(e.to_string())
}
