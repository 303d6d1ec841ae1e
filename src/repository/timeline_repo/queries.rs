use super::core::TimelineRepository;
use crate::domain::timeline::TimelineEvent;
use crate::repository::error::RepositoryResult;
use rusqlite::{params, Connection, Result as SqliteResult};

impl TimelineRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 查询批次的完整时间线 (按追加顺序)
    pub fn find_by_batch_in(conn: &Connection, batch_id: &str) -> RepositoryResult<Vec<TimelineEvent>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT event_id, batch_id, event, actor_id, details_json, created_at
            FROM timeline_event
            WHERE batch_id = ?
            ORDER BY event_seq ASC
            "#,
        )?;

        let events = stmt
            .query_map(params![batch_id], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(events)
    }

    /// 查询最近的 N 条事件 (跨批次)
    pub fn find_recent_in(conn: &Connection, limit: i32) -> RepositoryResult<Vec<TimelineEvent>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT event_id, batch_id, event, actor_id, details_json, created_at
            FROM timeline_event
            ORDER BY event_seq DESC
            LIMIT ?
            "#,
        )?;

        let events = stmt
            .query_map(params![limit], Self::map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(events)
    }
}
