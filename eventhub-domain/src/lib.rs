//! eventhub 领域层：对象数据库同步中枢的发布/订阅事件子系统
//!
//! - `task`：同步任务（写操作、消息、命令）与变更类型；
//! - `filter` / `specification`：订阅过滤表达式及其规约树；
//! - `subscription`：变更订阅、订阅集与定向投递判定；
//! - `eventing`：订阅者注册表、客户端队列与事件分发器。
//!
pub mod config;
pub mod error;
pub mod eventing;
pub mod filter;
pub mod specification;
pub mod subscription;
pub mod task;
