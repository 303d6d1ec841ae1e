// ==========================================
// 成衣生产流转系统 - 子批次领域模型
// ==========================================
// 子批次 = 一次从缝制到后整 / 从后整到仓库的部分交付
// 提交后不可修改,接收方核验后锁定
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::batch::CellKey;
use crate::domain::types::{StageKind, SubBatchStatus};

// ==========================================
// RejectBreakdown - 次品分类
// ==========================================
// 缝制: 单一次品桶; 后整: 脏污(kotor) / 破损(sobek) / 缝制损坏(rusak jahit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectBreakdown {
    Sewing {
        reject: i64,
    },
    Finishing {
        kotor: i64,
        sobek: i64,
        rusak_jahit: i64,
    },
}

impl RejectBreakdown {
    pub fn none(stage: StageKind) -> Self {
        match stage {
            StageKind::Finishing => RejectBreakdown::Finishing {
                kotor: 0,
                sobek: 0,
                rusak_jahit: 0,
            },
            _ => RejectBreakdown::Sewing { reject: 0 },
        }
    }

    /// 归一化次品总数 (对账统一使用)
    pub fn total(&self) -> i64 {
        match self {
            RejectBreakdown::Sewing { reject } => *reject,
            RejectBreakdown::Finishing {
                kotor,
                sobek,
                rusak_jahit,
            } => kotor + sobek + rusak_jahit,
        }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            RejectBreakdown::Sewing { .. } => StageKind::Sewing,
            RejectBreakdown::Finishing { .. } => StageKind::Finishing,
        }
    }

    /// 是否有负数
    pub fn has_negative(&self) -> bool {
        match self {
            RejectBreakdown::Sewing { reject } => *reject < 0,
            RejectBreakdown::Finishing {
                kotor,
                sobek,
                rusak_jahit,
            } => *kotor < 0 || *sobek < 0 || *rusak_jahit < 0,
        }
    }

    /// 同类累加; 类别不一致时返回 None
    pub fn add(&self, other: &RejectBreakdown) -> Option<RejectBreakdown> {
        match (self, other) {
            (RejectBreakdown::Sewing { reject: a }, RejectBreakdown::Sewing { reject: b }) => {
                Some(RejectBreakdown::Sewing { reject: a + b })
            }
            (
                RejectBreakdown::Finishing {
                    kotor: k1,
                    sobek: s1,
                    rusak_jahit: r1,
                },
                RejectBreakdown::Finishing {
                    kotor: k2,
                    sobek: s2,
                    rusak_jahit: r2,
                },
            ) => Some(RejectBreakdown::Finishing {
                kotor: k1 + k2,
                sobek: s1 + s2,
                rusak_jahit: r1 + r2,
            }),
            _ => None,
        }
    }
}

// ==========================================
// SubBatchItem - 子批次单元明细
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBatchItem {
    pub sub_batch_id: String,
    pub cell: CellKey,
    pub good_quantity: i64,
    pub reject: RejectBreakdown,
}

impl SubBatchItem {
    /// 已处理件数 = 良品 + 次品
    pub fn processed(&self) -> i64 {
        self.good_quantity + self.reject.total()
    }
}

// ==========================================
// SubBatch - 子批次
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBatch {
    pub sub_batch_id: String,
    pub batch_id: String,
    pub sub_batch_sku: String,
    pub stage: StageKind,
    pub sequence_no: i64,
    pub status: SubBatchStatus,
    pub submitted_by: String,
    pub submitted_at: NaiveDateTime,
    pub verified_by: Option<String>,
    pub verified_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub items: Vec<SubBatchItem>,
}

impl SubBatch {
    /// 良品合计 (缝制: sewingOutput; 后整: finishingGoodOutput)
    pub fn good_output(&self) -> i64 {
        self.items.iter().map(|i| i.good_quantity).sum()
    }

    /// 次品分类合计
    pub fn reject_breakdown(&self) -> RejectBreakdown {
        self.items
            .iter()
            .fold(RejectBreakdown::none(self.stage), |acc, item| {
                acc.add(&item.reject).unwrap_or(acc)
            })
    }

    pub fn reject_total(&self) -> i64 {
        self.items.iter().map(|i| i.reject.total()).sum()
    }
}

// ==========================================
// CellSubmission - 工人提交的单元增量
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSubmission {
    pub cell: CellKey,
    pub good_quantity: i64,
    pub reject: RejectBreakdown,
}

impl CellSubmission {
    pub fn sewing(product_size: &str, color: &str, good: i64, reject: i64) -> Self {
        Self {
            cell: CellKey::new(product_size, color),
            good_quantity: good,
            reject: RejectBreakdown::Sewing { reject },
        }
    }

    pub fn finishing(
        product_size: &str,
        color: &str,
        good: i64,
        kotor: i64,
        sobek: i64,
        rusak_jahit: i64,
    ) -> Self {
        Self {
            cell: CellKey::new(product_size, color),
            good_quantity: good,
            reject: RejectBreakdown::Finishing {
                kotor,
                sobek,
                rusak_jahit,
            },
        }
    }

    pub fn processed(&self) -> i64 {
        self.good_quantity + self.reject.total()
    }

    pub fn is_zero(&self) -> bool {
        self.processed() == 0
    }
}
