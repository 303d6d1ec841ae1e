// ==========================================
// 成衣生产流转系统 - 工序任务数据仓储
// ==========================================
// 表: stage_task / cutting_result / stage_progress_draft
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{format_ts, now_ts, opt_ts_column, parsed_column};
use crate::domain::batch::{CellKey, CellQuantity};
use crate::domain::stage_task::{CuttingResult, StageTask};
use crate::domain::types::{StageKind, TaskStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};

const TASK_COLUMNS: &str = r#"task_id, batch_id, stage, status, assigned_to,
    material_received, pieces_received, pieces_completed, reject_pieces, waste_qty,
    started_at, completed_at, verified_by, verified_at, notes"#;

// ==========================================
// StageTaskRepository - 工序任务仓储
// ==========================================
// 只提供事务内操作: 工序任务的读写总是跟随批次状态变更
pub struct StageTaskRepository;

impl StageTaskRepository {
    // ==========================================
    // 事务内操作: stage_task
    // ==========================================

    pub fn insert_task_in(conn: &Connection, task: &StageTask) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO stage_task (
                   task_id, batch_id, stage, status, assigned_to,
                   material_received, pieces_received, pieces_completed, reject_pieces, waste_qty,
                   started_at, completed_at, verified_by, verified_at, notes
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                task.task_id,
                task.batch_id,
                task.stage.as_str(),
                task.status.as_str(),
                task.assigned_to,
                task.material_received,
                task.pieces_received,
                task.pieces_completed,
                task.reject_pieces,
                task.waste_qty,
                task.started_at.as_ref().map(format_ts),
                task.completed_at.as_ref().map(format_ts),
                task.verified_by,
                task.verified_at.as_ref().map(format_ts),
                task.notes,
            ],
        )?;
        Ok(())
    }

    pub fn find_task_in(
        conn: &Connection,
        batch_id: &str,
        stage: StageKind,
    ) -> RepositoryResult<Option<StageTask>> {
        let sql = format!(
            "SELECT {} FROM stage_task WHERE batch_id = ?1 AND stage = ?2",
            TASK_COLUMNS
        );
        let task = conn
            .query_row(&sql, params![batch_id, stage.as_str()], Self::map_task)
            .optional()?;
        Ok(task)
    }

    pub fn find_tasks_by_batch_in(conn: &Connection, batch_id: &str) -> RepositoryResult<Vec<StageTask>> {
        let sql = format!(
            r#"SELECT {} FROM stage_task WHERE batch_id = ?1
               ORDER BY CASE stage WHEN 'CUTTING' THEN 0 WHEN 'SEWING' THEN 1 ELSE 2 END"#,
            TASK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![batch_id], Self::map_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 整行更新任务
    pub fn update_task_in(conn: &Connection, task: &StageTask) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE stage_task SET
                   status = ?1, assigned_to = ?2,
                   material_received = ?3, pieces_received = ?4, pieces_completed = ?5,
                   reject_pieces = ?6, waste_qty = ?7,
                   started_at = ?8, completed_at = ?9, verified_by = ?10, verified_at = ?11,
                   notes = ?12
               WHERE task_id = ?13"#,
            params![
                task.status.as_str(),
                task.assigned_to,
                task.material_received,
                task.pieces_received,
                task.pieces_completed,
                task.reject_pieces,
                task.waste_qty,
                task.started_at.as_ref().map(format_ts),
                task.completed_at.as_ref().map(format_ts),
                task.verified_by,
                task.verified_at.as_ref().map(format_ts),
                task.notes,
                task.task_id,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("StageTask", &task.task_id));
        }
        Ok(())
    }

    // ==========================================
    // 事务内操作: cutting_result
    // ==========================================

    /// 写入裁剪实际件数 (存在则覆盖,未确认状态)
    pub fn upsert_cutting_result_in(
        conn: &Connection,
        batch_id: &str,
        result: &CellQuantity,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO cutting_result (
                   batch_id, product_size, color, actual_pieces, is_confirmed, confirmed_by, updated_at
               ) VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5)
               ON CONFLICT(batch_id, product_size, color) DO UPDATE SET
                   actual_pieces = excluded.actual_pieces,
                   is_confirmed = 0,
                   confirmed_by = NULL,
                   updated_at = excluded.updated_at"#,
            params![
                batch_id,
                result.cell.product_size,
                result.cell.color,
                result.quantity,
                format_ts(&now_ts()),
            ],
        )?;
        Ok(())
    }

    pub fn find_cutting_results_in(conn: &Connection, batch_id: &str) -> RepositoryResult<Vec<CuttingResult>> {
        let mut stmt = conn.prepare(
            r#"SELECT batch_id, product_size, color, actual_pieces, is_confirmed, confirmed_by
               FROM cutting_result
               WHERE batch_id = ?1
               ORDER BY product_size, color"#,
        )?;
        let rows = stmt.query_map(params![batch_id], |row| {
            Ok(CuttingResult {
                batch_id: row.get(0)?,
                product_size: row.get(1)?,
                color: row.get(2)?,
                actual_pieces: row.get(3)?,
                is_confirmed: row.get(4)?,
                confirmed_by: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn confirm_cutting_results_in(
        conn: &Connection,
        batch_id: &str,
        confirmed_by: &str,
    ) -> RepositoryResult<usize> {
        let rows = conn.execute(
            r#"UPDATE cutting_result
               SET is_confirmed = 1, confirmed_by = ?1, updated_at = ?2
               WHERE batch_id = ?3"#,
            params![confirmed_by, format_ts(&now_ts()), batch_id],
        )?;
        Ok(rows)
    }

    // ==========================================
    // 事务内操作: stage_progress_draft
    // ==========================================

    pub fn upsert_draft_in(conn: &Connection, task_id: &str, entry: &CellQuantity) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO stage_progress_draft (task_id, product_size, color, quantity, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(task_id, product_size, color) DO UPDATE SET
                   quantity = excluded.quantity,
                   updated_at = excluded.updated_at"#,
            params![
                task_id,
                entry.cell.product_size,
                entry.cell.color,
                entry.quantity,
                format_ts(&now_ts()),
            ],
        )?;
        Ok(())
    }

    pub fn find_drafts_in(conn: &Connection, task_id: &str) -> RepositoryResult<Vec<CellQuantity>> {
        let mut stmt = conn.prepare(
            r#"SELECT product_size, color, quantity
               FROM stage_progress_draft
               WHERE task_id = ?1
               ORDER BY product_size, color"#,
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok(CellQuantity {
                cell: CellKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                quantity: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn clear_drafts_in(conn: &Connection, task_id: &str) -> RepositoryResult<usize> {
        let rows = conn.execute(
            "DELETE FROM stage_progress_draft WHERE task_id = ?1",
            params![task_id],
        )?;
        Ok(rows)
    }

    // ==========================================
    // 行映射
    // ==========================================

    fn map_task(row: &rusqlite::Row) -> rusqlite::Result<StageTask> {
        Ok(StageTask {
            task_id: row.get(0)?,
            batch_id: row.get(1)?,
            stage: parsed_column(row, 2, StageKind::from_db_str)?,
            status: parsed_column(row, 3, TaskStatus::from_db_str)?,
            assigned_to: row.get(4)?,
            material_received: row.get(5)?,
            pieces_received: row.get(6)?,
            pieces_completed: row.get(7)?,
            reject_pieces: row.get(8)?,
            waste_qty: row.get(9)?,
            started_at: opt_ts_column(row, 10)?,
            completed_at: opt_ts_column(row, 11)?,
            verified_by: row.get(12)?,
            verified_at: opt_ts_column(row, 13)?,
            notes: row.get(14)?,
        })
    }
}
