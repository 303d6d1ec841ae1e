// ==========================================
// 成衣生产流转系统 - 生产批次数据仓储
// ==========================================
// 表: production_batch / size_color_request
// 并发: 状态更新带 revision 校验 (乐观锁)
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{format_ts, now_ts, parsed_column, ts_column};
use crate::domain::batch::{ProductionBatch, SizeColorRequest};
use crate::domain::types::BatchStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};

const BATCH_COLUMNS: &str = r#"batch_id, batch_sku, product_id, product_name, status,
    target_quantity, total_rolls, notes, created_by, created_at, updated_at, revision"#;

// ==========================================
// BatchRepository - 批次仓储
// ==========================================
pub struct BatchRepository;

impl BatchRepository {
    // ==========================================
    // 查询接口
    // ==========================================

    pub fn find_by_sku_in(
        conn: &Connection,
        batch_sku: &str,
    ) -> RepositoryResult<Option<ProductionBatch>> {
        let sql = format!("SELECT {} FROM production_batch WHERE batch_sku = ?1", BATCH_COLUMNS);
        let batch = conn
            .query_row(&sql, params![batch_sku], Self::map_batch)
            .optional()?;
        Ok(batch)
    }

    /// 按状态列出批次 (None = 全部)
    pub fn list_in(
        conn: &Connection,
        status: Option<BatchStatus>,
    ) -> RepositoryResult<Vec<ProductionBatch>> {
        let batches = match status {
            Some(st) => {
                let sql = format!(
                    "SELECT {} FROM production_batch WHERE status = ?1 ORDER BY created_at DESC, batch_sku",
                    BATCH_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![st.as_str()], Self::map_batch)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM production_batch ORDER BY created_at DESC, batch_sku",
                    BATCH_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], Self::map_batch)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(batches)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn insert_in(conn: &Connection, batch: &ProductionBatch) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO production_batch (
                   batch_id, batch_sku, product_id, product_name, status,
                   target_quantity, total_rolls, notes, created_by, created_at, updated_at, revision
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                batch.batch_id,
                batch.batch_sku,
                batch.product_id,
                batch.product_name,
                batch.status.as_str(),
                batch.target_quantity,
                batch.total_rolls,
                batch.notes,
                batch.created_by,
                format_ts(&batch.created_at),
                format_ts(&batch.updated_at),
                batch.revision,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id_in(conn: &Connection, batch_id: &str) -> RepositoryResult<Option<ProductionBatch>> {
        let sql = format!("SELECT {} FROM production_batch WHERE batch_id = ?1", BATCH_COLUMNS);
        let batch = conn
            .query_row(&sql, params![batch_id], Self::map_batch)
            .optional()?;
        Ok(batch)
    }

    pub fn sku_exists_in(conn: &Connection, batch_sku: &str) -> RepositoryResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM production_batch WHERE batch_sku = ?1",
            params![batch_sku],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 以给定前缀开头的 SKU 数量 (用于生成日序号)
    pub fn count_sku_prefix_in(conn: &Connection, prefix: &str) -> RepositoryResult<i64> {
        let pattern = format!("{}%", prefix);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM production_batch WHERE batch_sku LIKE ?1",
            params![pattern],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 更新批次状态 (带 revision 校验)
    ///
    /// # 返回
    /// - Ok(new_revision): 更新成功
    /// - Err(OptimisticLockFailure): revision 不匹配 (其他写入者已更新)
    /// - Err(NotFound): 批次不存在
    pub fn update_status_in(
        conn: &Connection,
        batch_id: &str,
        expected_revision: i64,
        status: BatchStatus,
    ) -> RepositoryResult<i64> {
        let rows = conn.execute(
            r#"UPDATE production_batch
               SET status = ?1, updated_at = ?2, revision = revision + 1
               WHERE batch_id = ?3 AND revision = ?4"#,
            params![status.as_str(), format_ts(&now_ts()), batch_id, expected_revision],
        )?;

        if rows == 0 {
            // 判断是记录不存在还是revision冲突
            let actual: Option<i64> = conn
                .query_row(
                    "SELECT revision FROM production_batch WHERE batch_id = ?1",
                    params![batch_id],
                    |row| row.get(0),
                )
                .optional()?;
            return match actual {
                Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "ProductionBatch".to_string(),
                    id: batch_id.to_string(),
                    expected: expected_revision,
                    actual,
                }),
                None => Err(RepositoryError::not_found("ProductionBatch", batch_id)),
            };
        }

        Ok(expected_revision + 1)
    }

    pub fn update_total_rolls_in(conn: &Connection, batch_id: &str, total_rolls: i64) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE production_batch SET total_rolls = ?1, updated_at = ?2 WHERE batch_id = ?3",
            params![total_rolls, format_ts(&now_ts()), batch_id],
        )?;
        Ok(())
    }

    pub fn insert_request_in(conn: &Connection, request: &SizeColorRequest) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO size_color_request (
                   request_id, batch_id, product_size, color, requested_pieces
               ) VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                request.request_id,
                request.batch_id,
                request.product_size,
                request.color,
                request.requested_pieces,
            ],
        )?;
        Ok(())
    }

    pub fn find_requests_in(conn: &Connection, batch_id: &str) -> RepositoryResult<Vec<SizeColorRequest>> {
        let mut stmt = conn.prepare(
            r#"SELECT request_id, batch_id, product_size, color, requested_pieces
               FROM size_color_request
               WHERE batch_id = ?1
               ORDER BY product_size, color"#,
        )?;
        let rows = stmt.query_map(params![batch_id], |row| {
            Ok(SizeColorRequest {
                request_id: row.get(0)?,
                batch_id: row.get(1)?,
                product_size: row.get(2)?,
                color: row.get(3)?,
                requested_pieces: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_requested_pieces_in(
        conn: &Connection,
        request_id: &str,
        requested_pieces: i64,
    ) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE size_color_request SET requested_pieces = ?1 WHERE request_id = ?2",
            params![requested_pieces, request_id],
        )?;
        Ok(())
    }

    // ==========================================
    // 行映射
    // ==========================================

    fn map_batch(row: &rusqlite::Row) -> rusqlite::Result<ProductionBatch> {
        Ok(ProductionBatch {
            batch_id: row.get(0)?,
            batch_sku: row.get(1)?,
            product_id: row.get(2)?,
            product_name: row.get(3)?,
            status: parsed_column(row, 4, BatchStatus::from_db_str)?,
            target_quantity: row.get(5)?,
            total_rolls: row.get(6)?,
            notes: row.get(7)?,
            created_by: row.get(8)?,
            created_at: ts_column(row, 9)?,
            updated_at: ts_column(row, 10)?,
            revision: row.get(11)?,
        })
    }
}
