//! 订阅模型
//!
//! - `ChangeSubscription`：单个容器的变更订阅（变更类型 + 可选过滤器）；
//! - `SubscriptionSet`：某客户端在某数据库上的全部变更与消息订阅；
//! - `accepts_target`：消息/命令的定向投递判定。
//!
mod change;
mod set;
mod target;

pub use change::ChangeSubscription;
pub use set::{SubscriptionSet, WILDCARD};
pub use target::accepts_target;
