// ==========================================
// 成衣生产流转系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化; `*_in` 方法运行在调用方事务内
// ==========================================

pub mod batch_repo;
pub mod error;
pub mod material_repo;
pub mod stage_task_repo;
pub mod sub_batch_repo;
pub mod timeline_repo;

// 重导出核心仓储
pub use batch_repo::BatchRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use material_repo::MaterialRepository;
pub use stage_task_repo::StageTaskRepository;
pub use sub_batch_repo::{CellTotals, SubBatchRepository};
pub use timeline_repo::TimelineRepository;
