//! 客户端身份与订阅请求
//!
use super::receiver::EventReceiver;
use crate::task::ChangeMask;
use bon::Builder;
use std::sync::Arc;

/// 发起订阅/同步请求的客户端
///
/// - `receiver` 缺省表示沿用注册表中已有的接收端；
/// - `durable` 缺省表示不修改当前的持久投递设置。
#[derive(Clone, Builder)]
pub struct EventClient {
    #[builder(into)]
    client_id: String,
    #[builder(into)]
    user_id: String,
    receiver: Option<Arc<dyn EventReceiver>>,
    durable: Option<bool>,
}

impl EventClient {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn receiver(&self) -> Option<&Arc<dyn EventReceiver>> {
        self.receiver.as_ref()
    }

    pub fn durable(&self) -> Option<bool> {
        self.durable
    }
}

/// 单条订阅变更
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subscription {
    /// 订阅容器变更；`changes` 为空表示取消该容器的订阅
    Changes {
        container: String,
        changes: ChangeMask,
        filter: Option<String>,
    },
    /// 订阅消息/命令；以 `*` 结尾的名称为前缀订阅
    Message { name: String, remove: bool },
}

impl Subscription {
    pub fn changes(container: impl Into<String>, changes: ChangeMask) -> Self {
        Subscription::Changes {
            container: container.into(),
            changes,
            filter: None,
        }
    }

    pub fn filtered_changes(
        container: impl Into<String>,
        changes: ChangeMask,
        filter: impl Into<String>,
    ) -> Self {
        Subscription::Changes {
            container: container.into(),
            changes,
            filter: Some(filter.into()),
        }
    }

    pub fn message(name: impl Into<String>) -> Self {
        Subscription::Message {
            name: name.into(),
            remove: false,
        }
    }

    pub fn remove_message(name: impl Into<String>) -> Self {
        Subscription::Message {
            name: name.into(),
            remove: true,
        }
    }
}
