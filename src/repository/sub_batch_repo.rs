// ==========================================
// 成衣生产流转系统 - 子批次数据仓储
// ==========================================
// 表: sub_batch / sub_batch_item
// 红线: 子批次提交后不可修改,仅允许 SUBMITTED -> VERIFIED
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::{format_ts, opt_ts_column, parsed_column, ts_column};
use crate::domain::batch::CellKey;
use crate::domain::sub_batch::{RejectBreakdown, SubBatch, SubBatchItem};
use crate::domain::types::{StageKind, SubBatchStatus};
use crate::repository::error::RepositoryResult;

const SUB_BATCH_COLUMNS: &str = r#"sub_batch_id, batch_id, sub_batch_sku, stage, sequence_no,
    status, submitted_by, submitted_at, verified_by, verified_at, notes"#;

/// 单元累计 (某工序所有子批次合计)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellTotals {
    pub good: i64,
    pub reject: i64,
}

impl CellTotals {
    pub fn processed(&self) -> i64 {
        self.good + self.reject
    }
}

// ==========================================
// SubBatchRepository - 子批次仓储
// ==========================================
pub struct SubBatchRepository;

impl SubBatchRepository {
    // ==========================================
    // 事务内操作
    // ==========================================

    /// 插入子批次及其明细
    pub fn insert_in(conn: &Connection, sub_batch: &SubBatch) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO sub_batch (
                   sub_batch_id, batch_id, sub_batch_sku, stage, sequence_no,
                   status, submitted_by, submitted_at, verified_by, verified_at, notes
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                sub_batch.sub_batch_id,
                sub_batch.batch_id,
                sub_batch.sub_batch_sku,
                sub_batch.stage.as_str(),
                sub_batch.sequence_no,
                sub_batch.status.as_str(),
                sub_batch.submitted_by,
                format_ts(&sub_batch.submitted_at),
                sub_batch.verified_by,
                sub_batch.verified_at.as_ref().map(format_ts),
                sub_batch.notes,
            ],
        )?;

        let mut stmt = conn.prepare(
            r#"INSERT INTO sub_batch_item (
                   sub_batch_id, product_size, color, good_quantity,
                   reject_sewing, reject_kotor, reject_sobek, reject_rusak_jahit
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        )?;
        for item in &sub_batch.items {
            let (sewing, kotor, sobek, rusak_jahit) = match item.reject {
                RejectBreakdown::Sewing { reject } => (reject, 0, 0, 0),
                RejectBreakdown::Finishing {
                    kotor,
                    sobek,
                    rusak_jahit,
                } => (0, kotor, sobek, rusak_jahit),
            };
            stmt.execute(params![
                sub_batch.sub_batch_id,
                item.cell.product_size,
                item.cell.color,
                item.good_quantity,
                sewing,
                kotor,
                sobek,
                rusak_jahit,
            ])?;
        }
        Ok(())
    }

    pub fn find_by_id_in(conn: &Connection, sub_batch_id: &str) -> RepositoryResult<Option<SubBatch>> {
        let sql = format!("SELECT {} FROM sub_batch WHERE sub_batch_id = ?1", SUB_BATCH_COLUMNS);
        let header = conn
            .query_row(&sql, params![sub_batch_id], Self::map_header)
            .optional()?;
        match header {
            Some(mut sub_batch) => {
                sub_batch.items = Self::find_items_in(conn, &sub_batch.sub_batch_id, sub_batch.stage)?;
                Ok(Some(sub_batch))
            }
            None => Ok(None),
        }
    }

    pub fn find_by_batch_in(
        conn: &Connection,
        batch_id: &str,
        stage: Option<StageKind>,
    ) -> RepositoryResult<Vec<SubBatch>> {
        let mut headers = match stage {
            Some(st) => {
                let sql = format!(
                    "SELECT {} FROM sub_batch WHERE batch_id = ?1 AND stage = ?2 ORDER BY sequence_no",
                    SUB_BATCH_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![batch_id, st.as_str()], Self::map_header)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    r#"SELECT {} FROM sub_batch WHERE batch_id = ?1
                       ORDER BY CASE stage WHEN 'SEWING' THEN 0 ELSE 1 END, sequence_no"#,
                    SUB_BATCH_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![batch_id], Self::map_header)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        for sub_batch in headers.iter_mut() {
            sub_batch.items = Self::find_items_in(conn, &sub_batch.sub_batch_id, sub_batch.stage)?;
        }
        Ok(headers)
    }

    /// 下一个子批次序号 (按批次+工序)
    pub fn next_sequence_no_in(conn: &Connection, batch_id: &str, stage: StageKind) -> RepositoryResult<i64> {
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(sequence_no) FROM sub_batch WHERE batch_id = ?1 AND stage = ?2",
            params![batch_id, stage.as_str()],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// 按单元汇总某工序已提交的良品/次品
    ///
    /// 必须在写事务内读取,保证拿到的是提交时刻的最新累计
    pub fn totals_by_cell_in(
        conn: &Connection,
        batch_id: &str,
        stage: StageKind,
    ) -> RepositoryResult<BTreeMap<CellKey, CellTotals>> {
        let mut stmt = conn.prepare(
            r#"SELECT i.product_size, i.color,
                      SUM(i.good_quantity),
                      SUM(i.reject_sewing + i.reject_kotor + i.reject_sobek + i.reject_rusak_jahit)
               FROM sub_batch_item i
               JOIN sub_batch s ON s.sub_batch_id = i.sub_batch_id
               WHERE s.batch_id = ?1 AND s.stage = ?2
               GROUP BY i.product_size, i.color"#,
        )?;
        let rows = stmt.query_map(params![batch_id, stage.as_str()], |row| {
            Ok((
                CellKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                CellTotals {
                    good: row.get(2)?,
                    reject: row.get(3)?,
                },
            ))
        })?;

        let mut totals = BTreeMap::new();
        for row in rows {
            let (cell, cell_totals) = row?;
            totals.insert(cell, cell_totals);
        }
        Ok(totals)
    }

    /// 标记子批次已核验; 仅 SUBMITTED 状态可核验
    ///
    /// # 返回
    /// - Ok(true): 核验成功
    /// - Ok(false): 已核验过,未做修改
    pub fn mark_verified_in(
        conn: &Connection,
        sub_batch_id: &str,
        verified_by: &str,
        verified_at: &chrono::NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"UPDATE sub_batch
               SET status = ?1, verified_by = ?2, verified_at = ?3
               WHERE sub_batch_id = ?4 AND status = ?5"#,
            params![
                SubBatchStatus::Verified.as_str(),
                verified_by,
                format_ts(verified_at),
                sub_batch_id,
                SubBatchStatus::Submitted.as_str(),
            ],
        )?;
        Ok(rows == 1)
    }

    pub fn count_unverified_in(conn: &Connection, batch_id: &str, stage: StageKind) -> RepositoryResult<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sub_batch WHERE batch_id = ?1 AND stage = ?2 AND status = ?3",
            params![batch_id, stage.as_str(), SubBatchStatus::Submitted.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==========================================
    // 行映射
    // ==========================================

    fn find_items_in(conn: &Connection, sub_batch_id: &str, stage: StageKind) -> RepositoryResult<Vec<SubBatchItem>> {
        let mut stmt = conn.prepare(
            r#"SELECT sub_batch_id, product_size, color, good_quantity,
                      reject_sewing, reject_kotor, reject_sobek, reject_rusak_jahit
               FROM sub_batch_item
               WHERE sub_batch_id = ?1
               ORDER BY product_size, color"#,
        )?;
        let rows = stmt.query_map(params![sub_batch_id], |row| {
            let reject = match stage {
                StageKind::Finishing => RejectBreakdown::Finishing {
                    kotor: row.get(5)?,
                    sobek: row.get(6)?,
                    rusak_jahit: row.get(7)?,
                },
                _ => RejectBreakdown::Sewing { reject: row.get(4)? },
            };
            Ok(SubBatchItem {
                sub_batch_id: row.get(0)?,
                cell: CellKey::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                good_quantity: row.get(3)?,
                reject,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn map_header(row: &rusqlite::Row) -> rusqlite::Result<SubBatch> {
        Ok(SubBatch {
            sub_batch_id: row.get(0)?,
            batch_id: row.get(1)?,
            sub_batch_sku: row.get(2)?,
            stage: parsed_column(row, 3, StageKind::from_db_str)?,
            sequence_no: row.get(4)?,
            status: parsed_column(row, 5, SubBatchStatus::from_db_str)?,
            submitted_by: row.get(6)?,
            submitted_at: ts_column(row, 7)?,
            verified_by: row.get(8)?,
            verified_at: opt_ts_column(row, 9)?,
            notes: row.get(10)?,
            items: Vec::new(),
        })
    }
}
