// ==========================================
// 成衣生产流转系统 - 物料领域模型
// ==========================================
// 物料颜色规格 (库存计数) / 物料分配 / 预留凭证
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// MaterialColorVariant - 物料颜色规格
// ==========================================
// 目录数据,库存数量由 MaterialLedger 维护
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialColorVariant {
    pub variant_id: String,
    pub material_id: String,
    pub material_name: String,
    pub color: String,
    pub unit: String, // kg / yard / meter
    pub stock: f64,
}

/// 分配请求 (批次草稿中的一行)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub variant_id: String,
    pub roll_quantity: i64,
    pub allocated_qty: f64,
}

// ==========================================
// MaterialAllocation - 已提交的物料分配
// ==========================================
// 提交后不可修改; 仅批次取消时释放
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialAllocation {
    pub allocation_id: String,
    pub batch_id: String,
    pub variant_id: String,
    pub color: String,
    pub roll_quantity: i64,
    pub allocated_qty: f64,
    pub released: bool,
    pub created_at: NaiveDateTime,
    pub released_at: Option<NaiveDateTime>,
}

impl MaterialAllocation {
    /// 每卷数量; 卷数为 0 时无意义
    pub fn meter_per_roll(&self) -> Option<f64> {
        if self.roll_quantity > 0 {
            Some(self.allocated_qty / self.roll_quantity as f64)
        } else {
            None
        }
    }
}

// ==========================================
// Reservation - 预留凭证
// ==========================================
// reserve 只做校验并出具凭证; commit 扣减; release 归还
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub variant_id: String,
    pub quantity: f64,
    pub available_at_reserve: f64,
}
