use crate::db::{format_ts, ts_column};
use crate::domain::timeline::TimelineEvent;
use crate::repository::error::RepositoryResult;
use rusqlite::{params, Connection};

// ==========================================
// TimelineRepository - 时间线仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct TimelineRepository;

impl TimelineRepository {
    // ==========================================
    // 写入操作 (事务内)
    // ==========================================

    /// 追加时间线事件
    ///
    /// # 参数
    /// - `conn`: 调用方事务 (与状态变更同一原子单元)
    /// - `event`: 时间线事件
    pub fn append_in(conn: &Connection, event: &TimelineEvent) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO timeline_event (
                event_id, batch_id, event, actor_id, details_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.event_id,
                event.batch_id,
                event.event,
                event.actor_id,
                event.details.as_ref().map(|v| v.to_string()),
                format_ts(&event.created_at),
            ],
        )?;
        Ok(())
    }

    // ==========================================
    // 行映射
    // ==========================================

    pub(super) fn map_row(row: &rusqlite::Row) -> rusqlite::Result<TimelineEvent> {
        let details_raw: Option<String> = row.get(4)?;
        let details = match details_raw {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?),
            None => None,
        };

        Ok(TimelineEvent {
            event_id: row.get(0)?,
            batch_id: row.get(1)?,
            event: row.get(2)?,
            actor_id: row.get(3)?,
            details,
            created_at: ts_column(row, 5)?,
        })
    }
}
