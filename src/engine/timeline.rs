// ==========================================
// 成衣生产流转系统 - 时间线记录
// ==========================================
// 写入: 与状态变更同一事务追加 timeline_event (回滚则不留痕)
// 通知: 事务提交后通知外部 TimelineSink (fire-and-forget)
// 说明: Engine 层定义 trait,外部审计/推送通道实现适配器
// ==========================================

use serde_json::Value as JsonValue;
use std::error::Error;
use std::sync::Arc;
use uuid::Uuid;

use rusqlite::Connection;

use crate::db::now_ts;
use crate::domain::timeline::{TimelineEvent, TimelineEventKind};
use crate::engine::error::EngineResult;
use crate::repository::TimelineRepository;

// ==========================================
// TimelineSink Trait
// ==========================================

/// 时间线外部接收者
///
/// 时间线仅用于审计,不是不变量来源; 接收失败只记录日志
pub trait TimelineSink: Send + Sync {
    /// 接收一条已提交的事件
    fn record(&self, event: &TimelineEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作接收者
#[derive(Debug, Clone, Default)]
pub struct NoOpTimelineSink;

impl TimelineSink for NoOpTimelineSink {
    fn record(&self, event: &TimelineEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpTimelineSink: 跳过事件 - batch_id={}, event={}",
            event.batch_id,
            event.event
        );
        Ok(())
    }
}

// ==========================================
// PendingEvents - 事务内事件缓冲
// ==========================================

/// 当前事务已写入、待提交后通知的事件
#[derive(Debug, Default)]
pub struct PendingEvents {
    events: Vec<TimelineEvent>,
}

impl PendingEvents {
    /// 在调用方事务内追加一条时间线事件
    pub fn record(
        &mut self,
        conn: &Connection,
        batch_id: &str,
        kind: TimelineEventKind,
        actor_id: Option<&str>,
        details: Option<JsonValue>,
    ) -> EngineResult<()> {
        let event = TimelineEvent {
            event_id: Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            event: kind.as_str().to_string(),
            actor_id: actor_id.map(str::to_string),
            details,
            created_at: now_ts(),
        };
        TimelineRepository::append_in(conn, &event)?;
        self.events.push(event);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<TimelineEvent> {
        self.events
    }
}

// ==========================================
// TimelineRecorder - 提交后通知
// ==========================================
pub struct TimelineRecorder {
    sink: Option<Arc<dyn TimelineSink>>,
}

impl TimelineRecorder {
    pub fn with_sink(sink: Arc<dyn TimelineSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn none() -> Self {
        Self { sink: None }
    }

    pub fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// 通知已提交的事件; 失败只告警,不影响业务结果
    pub fn notify(&self, events: Vec<TimelineEvent>) {
        let sink = match &self.sink {
            Some(sink) => sink,
            None => return,
        };

        for event in &events {
            if let Err(e) = sink.record(event) {
                tracing::warn!(
                    batch_id = %event.batch_id,
                    event = %event.event,
                    error = %e,
                    "时间线通知失败"
                );
            }
        }
    }
}

impl Default for TimelineRecorder {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        seen: Mutex<Vec<String>>,
    }

    impl TimelineSink for CollectingSink {
        fn record(&self, event: &TimelineEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.seen.lock().unwrap().push(event.event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl TimelineSink for FailingSink {
        fn record(&self, _event: &TimelineEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            Err("sink offline".into())
        }
    }

    fn sample_event(kind: TimelineEventKind) -> TimelineEvent {
        TimelineEvent {
            event_id: Uuid::new_v4().to_string(),
            batch_id: "b1".to_string(),
            event: kind.as_str().to_string(),
            actor_id: None,
            details: None,
            created_at: now_ts(),
        }
    }

    #[test]
    fn test_notify_forwards_in_order() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = TimelineRecorder::with_sink(sink.clone());
        assert!(recorder.is_configured());

        recorder.notify(vec![
            sample_event(TimelineEventKind::BatchCreated),
            sample_event(TimelineEventKind::StatusChanged),
        ]);

        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &["BatchCreated", "StatusChanged"]);
    }

    #[test]
    fn test_failing_sink_is_swallowed() {
        let recorder = TimelineRecorder::with_sink(Arc::new(FailingSink));
        recorder.notify(vec![sample_event(TimelineEventKind::ProgressRecorded)]);
    }

    #[test]
    fn test_pending_events_written_in_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        conn.execute(
            r#"INSERT INTO production_batch (batch_id, batch_sku, product_id, product_name, status,
                   target_quantity, created_by, created_at, updated_at)
               VALUES ('b1', 'PB-1', 'p1', 'Kemeja', 'PENDING', 10, 'lead', '2025-01-01 00:00:00', '2025-01-01 00:00:00')"#,
            [],
        )
        .unwrap();

        let mut pending = PendingEvents::default();
        pending
            .record(&conn, "b1", TimelineEventKind::BatchCreated, Some("lead"), None)
            .unwrap();
        assert_eq!(pending.len(), 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM timeline_event WHERE batch_id = 'b1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
