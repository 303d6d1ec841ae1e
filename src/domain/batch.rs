// ==========================================
// 成衣生产流转系统 - 生产批次领域模型
// ==========================================
// 批次 / 尺码颜色需求 / 批次草稿 / 批次详情
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::material::{AllocationRequest, MaterialAllocation};
use crate::domain::stage_task::{CuttingResult, StageTask};
use crate::domain::sub_batch::SubBatch;
use crate::domain::types::{BatchStatus, StageKind};

// ==========================================
// CellKey - 尺码×颜色单元
// ==========================================
// 数量对账的最小单位
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub product_size: String,
    pub color: String,
}

impl CellKey {
    pub fn new(product_size: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            product_size: product_size.into(),
            color: color.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.product_size, self.color)
    }
}

/// 单元数量 (工人提交的裁剪/缝制/后整数量)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellQuantity {
    pub cell: CellKey,
    pub quantity: i64,
}

impl CellQuantity {
    pub fn new(product_size: &str, color: &str, quantity: i64) -> Self {
        Self {
            cell: CellKey::new(product_size, color),
            quantity,
        }
    }
}

// ==========================================
// ProductionBatch - 生产批次
// ==========================================
// actual/reject 数量不存储,由 engine::projection 从工序数据推导
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionBatch {
    pub batch_id: String,
    pub batch_sku: String,
    pub product_id: String,
    pub product_name: String,
    pub status: BatchStatus,
    pub target_quantity: i64,
    pub total_rolls: i64,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub revision: i64, // 乐观锁版本号,每次状态变更 +1
}

// ==========================================
// SizeColorRequest - 尺码颜色需求
// ==========================================
// requested_pieces 可为 0,裁剪完成时回填 (仅作需求形状参考)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeColorRequest {
    pub request_id: String,
    pub batch_id: String,
    pub product_size: String,
    pub color: String,
    pub requested_pieces: i64,
}

impl SizeColorRequest {
    pub fn cell(&self) -> CellKey {
        CellKey::new(self.product_size.clone(), self.color.clone())
    }
}

/// 需求草稿 (创建批次时输入)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeColorRequestDraft {
    pub product_size: String,
    pub color: String,
    pub requested_pieces: i64,
}

// ==========================================
// BatchDraft - 批次创建草稿
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDraft {
    /// 为空时按配置前缀自动生成
    pub batch_sku: Option<String>,
    pub product_id: String,
    pub product_name: String,
    pub target_quantity: i64,
    /// 非空时创建即分配物料 (状态推进到 MATERIAL_ALLOCATED)
    pub allocations: Vec<AllocationRequest>,
    pub requests: Vec<SizeColorRequestDraft>,
    pub notes: Option<String>,
}

// ==========================================
// BatchDetail - 批次聚合视图
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDetail {
    pub batch: ProductionBatch,
    pub requests: Vec<SizeColorRequest>,
    pub allocations: Vec<MaterialAllocation>,
    pub tasks: Vec<StageTask>,
    pub cutting_results: Vec<CuttingResult>,
    pub sub_batches: Vec<SubBatch>,
}

impl BatchDetail {
    pub fn task(&self, stage: StageKind) -> Option<&StageTask> {
        self.tasks.iter().find(|t| t.stage == stage)
    }

    pub fn sub_batches_of(&self, stage: StageKind) -> impl Iterator<Item = &SubBatch> {
        self.sub_batches.iter().filter(move |sb| sb.stage == stage)
    }
}
