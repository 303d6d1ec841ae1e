// ==========================================
// 成衣生产流转系统 - 工序任务领域模型
// ==========================================
// 裁剪 / 缝制 / 后整 三类任务同构,语义由 stage 区分
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::batch::{CellKey, CellQuantity};
use crate::domain::types::{StageKind, TaskStatus};

// ==========================================
// StageTask - 工序任务
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTask {
    pub task_id: String,
    pub batch_id: String,
    pub stage: StageKind,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,

    // ===== 投入 =====
    pub material_received: f64, // 裁剪: 领用物料数量
    pub pieces_received: i64,   // 缝制/后整: 上游可用件数

    // ===== 产出 =====
    pub pieces_completed: i64,
    pub reject_pieces: i64,
    pub waste_qty: f64,

    // ===== 时间与核验 =====
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub verified_by: Option<String>,
    pub verified_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

// ==========================================
// CuttingResult - 裁剪实际件数
// ==========================================
// 下游缝制的上限 (ceiling)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuttingResult {
    pub batch_id: String,
    pub product_size: String,
    pub color: String,
    pub actual_pieces: i64,
    pub is_confirmed: bool,
    pub confirmed_by: Option<String>,
}

impl CuttingResult {
    pub fn cell(&self) -> CellKey {
        CellKey::new(self.product_size.clone(), self.color.clone())
    }
}

// ==========================================
// CompletionReport - 完工提交
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub results: Vec<CellQuantity>,
    pub reject_pieces: i64,
    pub waste_qty: f64,
    pub notes: Option<String>,
}

impl CompletionReport {
    pub fn total_pieces(&self) -> i64 {
        self.results.iter().map(|r| r.quantity).sum()
    }
}
