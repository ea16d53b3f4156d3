//! 分发器配置
//!
//! 投递模式在构造时固定，运行期不可切换。
//!
use serde::{Deserialize, Serialize};

/// 事件投递模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// 在 `dispatch` 返回前同步发送给所有受影响的订阅者
    Send,
    /// 事件积压在队列中，由调用方周期调用 `flush_all`
    Queue,
    /// 由后台任务消费通知通道并发送
    QueueSend,
}

/// 分发器配置
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 投递模式
    pub mode: DeliveryMode,
    /// 事件信封中是否携带目标客户端 ID
    pub send_target_client_id: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::QueueSend,
            send_target_client_id: true,
        }
    }
}
