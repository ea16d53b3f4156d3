use eventhub_domain::eventing::Subscription;
use eventhub_domain::task::{ChangeMask, SyncTask};
use serde::Deserialize;

/// 客户端发来的一次同步请求
#[derive(Clone, Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(rename = "db")]
    pub database: String,
    /// 对已收到事件的确认（线上消息序号）
    #[serde(rename = "ev_ack", default)]
    pub event_ack: Option<u64>,
    pub tasks: Vec<RequestTask>,
}

/// 请求中的任务：订阅变更，或交给分发器的写操作/消息/命令
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RequestTask {
    Subscribe(SubscribeTask),
    Sync(SyncTask),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum SubscribeTask {
    /// `changes` 为空表示取消订阅
    SubscribeChanges {
        #[serde(rename = "cont")]
        container: String,
        #[serde(default)]
        changes: ChangeMask,
        #[serde(default)]
        filter: Option<String>,
    },
    SubscribeMessage {
        name: String,
        #[serde(default)]
        remove: bool,
    },
}

impl From<SubscribeTask> for Subscription {
    fn from(task: SubscribeTask) -> Self {
        match task {
            SubscribeTask::SubscribeChanges {
                container,
                changes,
                filter,
            } => Subscription::Changes {
                container,
                changes,
                filter,
            },
            SubscribeTask::SubscribeMessage { name, remove } => {
                Subscription::Message { name, remove }
            }
        }
    }
}
