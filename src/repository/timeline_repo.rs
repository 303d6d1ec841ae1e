// ==========================================
// 成衣生产流转系统 - 批次时间线数据仓储
// ==========================================
// 表: timeline_event
// 红线: 只追加; 不提供 update / delete
// ==========================================

mod core;
mod queries;

#[cfg(test)]
mod tests;

pub use core::TimelineRepository;
