// ==========================================
// 成衣生产流转系统 - 物料数据仓储
// ==========================================
// 表: material_color_variant / material_allocation
// 红线: Repository 不含业务逻辑; 库存判断在 engine::ledger
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{format_ts, now_ts, opt_ts_column, ts_column};
use crate::domain::material::{MaterialAllocation, MaterialColorVariant};
use crate::repository::error::{RepositoryError, RepositoryResult};

// ==========================================
// MaterialRepository - 物料仓储
// ==========================================
pub struct MaterialRepository;

impl MaterialRepository {
    // ==========================================
    // 查询接口
    // ==========================================

    pub fn list_variants_in(conn: &Connection) -> RepositoryResult<Vec<MaterialColorVariant>> {
        let mut stmt = conn.prepare(
            r#"SELECT variant_id, material_id, material_name, color, unit, stock
               FROM material_color_variant
               ORDER BY material_id, color"#,
        )?;
        let rows = stmt.query_map([], Self::map_variant)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ==========================================
    // 事务内操作 (由调用方持有事务)
    // ==========================================

    /// 新增物料颜色规格; 已存在的 variant_id 由主键约束拒绝
    pub fn insert_variant_in(conn: &Connection, variant: &MaterialColorVariant) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO material_color_variant (
                   variant_id, material_id, material_name, color, unit, stock, updated_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                variant.variant_id,
                variant.material_id,
                variant.material_name,
                variant.color,
                variant.unit,
                variant.stock,
                format_ts(&now_ts()),
            ],
        )?;
        Ok(())
    }

    pub fn find_variant_in(conn: &Connection, variant_id: &str) -> RepositoryResult<Option<MaterialColorVariant>> {
        let variant = conn
            .query_row(
                r#"SELECT variant_id, material_id, material_name, color, unit, stock
                   FROM material_color_variant WHERE variant_id = ?1"#,
                params![variant_id],
                Self::map_variant,
            )
            .optional()?;
        Ok(variant)
    }

    /// 条件扣减库存
    ///
    /// # 返回
    /// - Ok(true): 扣减成功
    /// - Ok(false): 库存不足,未做任何修改
    pub fn decrement_stock_in(conn: &Connection, variant_id: &str, qty: f64) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"UPDATE material_color_variant
               SET stock = stock - ?2, updated_at = ?3
               WHERE variant_id = ?1 AND stock >= ?2"#,
            params![variant_id, qty, format_ts(&now_ts())],
        )?;
        Ok(rows == 1)
    }

    /// 归还库存
    pub fn increment_stock_in(conn: &Connection, variant_id: &str, qty: f64) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE material_color_variant
               SET stock = stock + ?2, updated_at = ?3
               WHERE variant_id = ?1"#,
            params![variant_id, qty, format_ts(&now_ts())],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("MaterialColorVariant", variant_id));
        }
        Ok(())
    }

    pub fn insert_allocation_in(conn: &Connection, allocation: &MaterialAllocation) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO material_allocation (
                   allocation_id, batch_id, variant_id, color, roll_quantity,
                   allocated_qty, released, created_at, released_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                allocation.allocation_id,
                allocation.batch_id,
                allocation.variant_id,
                allocation.color,
                allocation.roll_quantity,
                allocation.allocated_qty,
                allocation.released,
                format_ts(&allocation.created_at),
                allocation.released_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    pub fn find_allocations_by_batch_in(
        conn: &Connection,
        batch_id: &str,
    ) -> RepositoryResult<Vec<MaterialAllocation>> {
        let mut stmt = conn.prepare(
            r#"SELECT allocation_id, batch_id, variant_id, color, roll_quantity,
                      allocated_qty, released, created_at, released_at
               FROM material_allocation
               WHERE batch_id = ?1
               ORDER BY created_at, allocation_id"#,
        )?;
        let rows = stmt.query_map(params![batch_id], Self::map_allocation)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 标记分配已释放; 已释放的记录不会被重复释放
    pub fn mark_released_in(conn: &Connection, allocation_id: &str) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"UPDATE material_allocation
               SET released = 1, released_at = ?2
               WHERE allocation_id = ?1 AND released = 0"#,
            params![allocation_id, format_ts(&now_ts())],
        )?;
        Ok(rows == 1)
    }

    // ==========================================
    // 行映射
    // ==========================================

    fn map_variant(row: &rusqlite::Row) -> rusqlite::Result<MaterialColorVariant> {
        Ok(MaterialColorVariant {
            variant_id: row.get(0)?,
            material_id: row.get(1)?,
            material_name: row.get(2)?,
            color: row.get(3)?,
            unit: row.get(4)?,
            stock: row.get(5)?,
        })
    }

    fn map_allocation(row: &rusqlite::Row) -> rusqlite::Result<MaterialAllocation> {
        Ok(MaterialAllocation {
            allocation_id: row.get(0)?,
            batch_id: row.get(1)?,
            variant_id: row.get(2)?,
            color: row.get(3)?,
            roll_quantity: row.get(4)?,
            allocated_qty: row.get(5)?,
            released: row.get(6)?,
            created_at: ts_column(row, 7)?,
            released_at: opt_ts_column(row, 8)?,
        })
    }
}
