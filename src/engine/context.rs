// ==========================================
// 成衣生产流转系统 - 引擎上下文
// ==========================================
// 职责: 聚合引擎共用的连接、配置与时间线记录器
// 并发契约: 所有写操作走 BEGIN IMMEDIATE 写事务 (悲观串行化)
//           连接锁有界等待,超时返回 Busy,不会死等
// ==========================================

use rusqlite::{Connection, Transaction};
use std::sync::Arc;

use crate::config::WorkflowConfig;
use crate::db::{acquire_connection, with_immediate_transaction, SharedConnection};
use crate::engine::error::EngineResult;
use crate::engine::timeline::{PendingEvents, TimelineRecorder};

#[derive(Clone)]
pub struct EngineContext {
    conn: SharedConnection,
    config: Arc<WorkflowConfig>,
    recorder: Arc<TimelineRecorder>,
}

impl EngineContext {
    pub fn new(conn: SharedConnection, config: WorkflowConfig, recorder: Arc<TimelineRecorder>) -> Self {
        Self {
            conn,
            config: Arc::new(config),
            recorder,
        }
    }

    /// 默认配置,不挂外部时间线接收者
    pub fn with_defaults(conn: SharedConnection) -> Self {
        Self::new(conn, WorkflowConfig::default(), Arc::new(TimelineRecorder::none()))
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.conn
    }

    /// 在写事务内执行操作
    ///
    /// 闭包返回 Err 时整个事务回滚,时间线事件也不会写入或通知
    pub fn write<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Transaction<'_>, &mut PendingEvents) -> EngineResult<T>,
    {
        let mut pending = PendingEvents::default();
        let value = with_immediate_transaction(&self.conn, self.config.lock_wait(), |tx| {
            f(tx, &mut pending)
        })?;
        self.recorder.notify(pending.into_events());
        Ok(value)
    }

    /// 只读操作 (同样有界等待连接锁)
    pub fn read<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> EngineResult<T>,
    {
        let guard = acquire_connection(&self.conn, self.config.lock_wait())?;
        f(&guard)
    }
}
