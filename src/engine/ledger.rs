// ==========================================
// 成衣生产流转系统 - 物料台账
// ==========================================
// 契约: reserve(variant, qty) -> Reservation | InsufficientStock
//       commit(reservation) -> MaterialAllocation
//       release(allocation) -> 库存按分配量精确归还
// 红线: 从不部分扣减; 所有库存变更与调用方事务同一原子单元
// ==========================================

use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::now_ts;
use crate::domain::material::{MaterialAllocation, MaterialColorVariant, Reservation};
use crate::engine::context::EngineContext;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::MaterialRepository;

pub struct MaterialLedger {
    ctx: EngineContext,
}

impl MaterialLedger {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    // ==========================================
    // 目录装载 / 补库
    // ==========================================

    /// 登记物料颜色规格 (参考数据装载)
    ///
    /// 只新增, 已登记的规格不可重复登记; 库存变化一律走 adjust_stock
    pub fn register_variant(&self, variant: &MaterialColorVariant) -> EngineResult<()> {
        if variant.variant_id.trim().is_empty() || variant.material_id.trim().is_empty() {
            return Err(EngineError::Validation("物料规格缺少 variant_id / material_id".into()));
        }
        if variant.color.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "物料规格 {} 缺少颜色",
                variant.variant_id
            )));
        }
        validate_quantity("stock", variant.stock, true)?;

        self.ctx.write(|tx, _pending| {
            if MaterialRepository::find_variant_in(tx, &variant.variant_id)?.is_some() {
                return Err(EngineError::Validation(format!(
                    "物料规格 {} 已登记, 补库请使用库存调整",
                    variant.variant_id
                )));
            }
            MaterialRepository::insert_variant_in(tx, variant)?;
            Ok(())
        })?;
        info!(variant_id = %variant.variant_id, stock = variant.stock, "物料规格已登记");
        Ok(())
    }

    /// 调整库存 (补库为正,盘亏为负); 返回调整后库存
    pub fn adjust_stock(&self, variant_id: &str, delta: f64) -> EngineResult<f64> {
        if !delta.is_finite() || delta == 0.0 {
            return Err(EngineError::Validation(format!("无效的库存调整量: {}", delta)));
        }

        let stock = self.ctx.write(|tx, _pending| {
            let variant = load_variant_in(tx, variant_id)?;
            if delta > 0.0 {
                MaterialRepository::increment_stock_in(tx, variant_id, delta)?;
            } else if !MaterialRepository::decrement_stock_in(tx, variant_id, -delta)? {
                return Err(EngineError::InsufficientStock {
                    variant_id: variant_id.to_string(),
                    available: variant.stock,
                    requested: -delta,
                });
            }
            Ok(load_variant_in(tx, variant_id)?.stock)
        })?;

        info!(variant_id = variant_id, delta = delta, stock = stock, "库存已调整");
        Ok(stock)
    }

    pub fn find_variant(&self, variant_id: &str) -> EngineResult<MaterialColorVariant> {
        self.ctx.read(|conn| load_variant_in(conn, variant_id))
    }

    pub fn list_variants(&self) -> EngineResult<Vec<MaterialColorVariant>> {
        self.ctx
            .read(|conn| Ok(MaterialRepository::list_variants_in(conn)?))
    }

    pub fn stock_of(&self, variant_id: &str) -> EngineResult<f64> {
        Ok(self.find_variant(variant_id)?.stock)
    }

    pub fn list_allocations(&self, batch_id: &str) -> EngineResult<Vec<MaterialAllocation>> {
        self.ctx
            .read(|conn| Ok(MaterialRepository::find_allocations_by_batch_in(conn, batch_id)?))
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    /// 预留: 校验并扣减库存
    ///
    /// 扣减只在调用方事务提交后生效; 库存不足时不做任何修改
    pub fn reserve_in(conn: &Connection, variant_id: &str, qty: f64) -> EngineResult<Reservation> {
        validate_quantity("allocated_qty", qty, false)?;

        let variant = load_variant_in(conn, variant_id)?;
        if variant.stock < qty {
            warn!(variant_id = variant_id, available = variant.stock, requested = qty, "库存不足");
            return Err(EngineError::InsufficientStock {
                variant_id: variant_id.to_string(),
                available: variant.stock,
                requested: qty,
            });
        }

        if !MaterialRepository::decrement_stock_in(conn, variant_id, qty)? {
            let available = load_variant_in(conn, variant_id)?.stock;
            return Err(EngineError::InsufficientStock {
                variant_id: variant_id.to_string(),
                available,
                requested: qty,
            });
        }

        debug!(variant_id = variant_id, qty = qty, before = variant.stock, "库存已预留");
        Ok(Reservation {
            variant_id: variant_id.to_string(),
            quantity: qty,
            available_at_reserve: variant.stock,
        })
    }

    /// 确认: 将预留落为批次的物料分配记录
    pub fn commit_in(
        conn: &Connection,
        batch_id: &str,
        reservation: &Reservation,
        roll_quantity: i64,
    ) -> EngineResult<MaterialAllocation> {
        if roll_quantity < 0 {
            return Err(EngineError::Validation(format!(
                "卷数不能为负: {}",
                roll_quantity
            )));
        }

        let variant = load_variant_in(conn, &reservation.variant_id)?;
        let allocation = MaterialAllocation {
            allocation_id: Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            variant_id: reservation.variant_id.clone(),
            color: variant.color,
            roll_quantity,
            allocated_qty: reservation.quantity,
            released: false,
            created_at: now_ts(),
            released_at: None,
        };
        MaterialRepository::insert_allocation_in(conn, &allocation)?;
        Ok(allocation)
    }

    /// 释放: 按分配量精确归还库存; 已释放的分配返回 false 且不改库存
    pub fn release_in(conn: &Connection, allocation: &MaterialAllocation) -> EngineResult<bool> {
        if !MaterialRepository::mark_released_in(conn, &allocation.allocation_id)? {
            return Ok(false);
        }
        MaterialRepository::increment_stock_in(conn, &allocation.variant_id, allocation.allocated_qty)?;
        debug!(
            allocation_id = %allocation.allocation_id,
            variant_id = %allocation.variant_id,
            qty = allocation.allocated_qty,
            "物料已归还"
        );
        Ok(true)
    }

    /// 释放批次全部未释放分配,返回本次实际释放的记录
    pub fn release_batch_in(conn: &Connection, batch_id: &str) -> EngineResult<Vec<MaterialAllocation>> {
        let mut released = Vec::new();
        for allocation in MaterialRepository::find_allocations_by_batch_in(conn, batch_id)? {
            if allocation.released {
                continue;
            }
            if Self::release_in(conn, &allocation)? {
                released.push(allocation);
            }
        }
        Ok(released)
    }
}

pub(crate) fn load_variant_in(conn: &Connection, variant_id: &str) -> EngineResult<MaterialColorVariant> {
    MaterialRepository::find_variant_in(conn, variant_id)?
        .ok_or_else(|| EngineError::not_found("MaterialColorVariant", variant_id))
}

fn validate_quantity(field: &str, qty: f64, allow_zero: bool) -> EngineResult<()> {
    let valid = qty.is_finite() && (qty > 0.0 || (allow_zero && qty == 0.0));
    if valid {
        Ok(())
    } else {
        Err(EngineError::Validation(format!("{} 数量无效: {}", field, qty)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_schema, with_immediate_transaction};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn setup() -> (MaterialLedger, EngineContext) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        conn.execute(
            r#"INSERT INTO production_batch (batch_id, batch_sku, product_id, product_name, status,
                   target_quantity, created_by, created_at, updated_at)
               VALUES ('b1', 'PB-1', 'p1', 'Kemeja', 'MATERIAL_REQUESTED', 10, 'lead', '2025-01-01 00:00:00', '2025-01-01 00:00:00')"#,
            [],
        )
        .unwrap();
        let ctx = EngineContext::with_defaults(Arc::new(Mutex::new(conn)));
        let ledger = MaterialLedger::new(ctx.clone());
        ledger
            .register_variant(&MaterialColorVariant {
                variant_id: "v-red".to_string(),
                material_id: "m-cotton".to_string(),
                material_name: "Katun".to_string(),
                color: "Red".to_string(),
                unit: "kg".to_string(),
                stock: 50.0,
            })
            .unwrap();
        (ledger, ctx)
    }

    #[test]
    fn test_reserve_commit_release_round() {
        let (ledger, ctx) = setup();

        let allocation = with_immediate_transaction(ctx.connection(), Duration::from_millis(500), |tx| {
            let reservation = MaterialLedger::reserve_in(tx, "v-red", 20.0)?;
            assert_eq!(reservation.available_at_reserve, 50.0);
            MaterialLedger::commit_in(tx, "b1", &reservation, 2)
        })
        .unwrap();
        assert_eq!(ledger.stock_of("v-red").unwrap(), 30.0);
        assert_eq!(allocation.meter_per_roll(), Some(10.0));

        let released = with_immediate_transaction::<_, EngineError, _>(ctx.connection(), Duration::from_millis(500), |tx| {
            MaterialLedger::release_batch_in(tx, "b1")
        })
        .unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(ledger.stock_of("v-red").unwrap(), 50.0);

        // 重复释放不再归还
        let again = with_immediate_transaction::<_, EngineError, _>(ctx.connection(), Duration::from_millis(500), |tx| {
            MaterialLedger::release_batch_in(tx, "b1")
        })
        .unwrap();
        assert!(again.is_empty());
        assert_eq!(ledger.stock_of("v-red").unwrap(), 50.0);
    }

    #[test]
    fn test_reserve_never_partially_deducts() {
        let (ledger, ctx) = setup();
        let err = with_immediate_transaction(ctx.connection(), Duration::from_millis(500), |tx| {
            MaterialLedger::reserve_in(tx, "v-red", 50.5)
        })
        .unwrap_err();
        match err {
            EngineError::InsufficientStock { available, requested, .. } => {
                assert_eq!(available, 50.0);
                assert_eq!(requested, 50.5);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(ledger.stock_of("v-red").unwrap(), 50.0);
    }

    #[test]
    fn test_adjust_stock() {
        let (ledger, _ctx) = setup();
        assert_eq!(ledger.adjust_stock("v-red", 10.0).unwrap(), 60.0);
        assert_eq!(ledger.adjust_stock("v-red", -60.0).unwrap(), 0.0);
        assert!(matches!(
            ledger.adjust_stock("v-red", -1.0),
            Err(EngineError::InsufficientStock { .. })
        ));
        assert!(matches!(ledger.adjust_stock("v-red", 0.0), Err(EngineError::Validation(_))));
        assert!(matches!(ledger.adjust_stock("missing", 1.0), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn test_register_rejects_negative_stock() {
        let (ledger, _ctx) = setup();
        let err = ledger
            .register_variant(&MaterialColorVariant {
                variant_id: "v-blue".to_string(),
                material_id: "m-cotton".to_string(),
                material_name: "Katun".to_string(),
                color: "Blue".to_string(),
                unit: "kg".to_string(),
                stock: -1.0,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_register_existing_variant_keeps_ledger_balanced() {
        let (ledger, ctx) = setup();
        with_immediate_transaction(ctx.connection(), Duration::from_millis(500), |tx| {
            let reservation = MaterialLedger::reserve_in(tx, "v-red", 10.0)?;
            MaterialLedger::commit_in(tx, "b1", &reservation, 1)
        })
        .unwrap();
        assert_eq!(ledger.stock_of("v-red").unwrap(), 40.0);

        // 重新登记同一规格不得改写库存
        let err = ledger
            .register_variant(&MaterialColorVariant {
                variant_id: "v-red".to_string(),
                material_id: "m-cotton".to_string(),
                material_name: "Katun".to_string(),
                color: "Red".to_string(),
                unit: "kg".to_string(),
                stock: 50.0,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(ledger.stock_of("v-red").unwrap(), 40.0);

        with_immediate_transaction::<_, EngineError, _>(ctx.connection(), Duration::from_millis(500), |tx| {
            MaterialLedger::release_batch_in(tx, "b1")
        })
        .unwrap();
        assert_eq!(ledger.stock_of("v-red").unwrap(), 50.0);
        assert_eq!(ledger.list_variants().unwrap().len(), 1);
    }
}
