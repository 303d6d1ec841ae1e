// ==========================================
// 测试数据构建器 - 用于集成测试
// ==========================================

#![allow(dead_code)]

use garment_production_flow::domain::{
    AllocationRequest, BatchDraft, CellSubmission, SizeColorRequestDraft,
};

// ==========================================
// BatchDraft 构建器
// ==========================================

pub struct BatchDraftBuilder {
    batch_sku: Option<String>,
    product_id: String,
    product_name: String,
    target_quantity: i64,
    allocations: Vec<AllocationRequest>,
    requests: Vec<SizeColorRequestDraft>,
    notes: Option<String>,
}

impl BatchDraftBuilder {
    pub fn new(product_id: &str) -> Self {
        Self {
            batch_sku: None,
            product_id: product_id.to_string(),
            product_name: format!("Produk {}", product_id),
            target_quantity: 0,
            allocations: Vec::new(),
            requests: Vec::new(),
            notes: None,
        }
    }

    pub fn sku(mut self, sku: &str) -> Self {
        self.batch_sku = Some(sku.to_string());
        self
    }

    pub fn target(mut self, qty: i64) -> Self {
        self.target_quantity = qty;
        self
    }

    pub fn cell(mut self, size: &str, color: &str, requested: i64) -> Self {
        self.requests.push(SizeColorRequestDraft {
            product_size: size.to_string(),
            color: color.to_string(),
            requested_pieces: requested,
        });
        self
    }

    pub fn allocate(mut self, variant_id: &str, rolls: i64, qty: f64) -> Self {
        self.allocations.push(AllocationRequest {
            variant_id: variant_id.to_string(),
            roll_quantity: rolls,
            allocated_qty: qty,
        });
        self
    }

    pub fn notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn build(self) -> BatchDraft {
        let target_quantity = if self.target_quantity > 0 {
            self.target_quantity
        } else {
            self.requests.iter().map(|r| r.requested_pieces).sum()
        };
        BatchDraft {
            batch_sku: self.batch_sku,
            product_id: self.product_id,
            product_name: self.product_name,
            target_quantity,
            allocations: self.allocations,
            requests: self.requests,
            notes: self.notes,
        }
    }
}

// ==========================================
// 子批次提交构建
// ==========================================

pub fn sewing(size: &str, color: &str, good: i64, reject: i64) -> CellSubmission {
    CellSubmission::sewing(size, color, good, reject)
}

pub fn finishing(size: &str, color: &str, good: i64, kotor: i64, sobek: i64, rusak_jahit: i64) -> CellSubmission {
    CellSubmission::finishing(size, color, good, kotor, sobek, rusak_jahit)
}
