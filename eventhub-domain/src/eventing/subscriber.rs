use super::queue::ClientQueue;
use super::serializer::EventSerializer;
use std::fmt;
use std::sync::Arc;

/// 订阅者：每个客户端 ID 一个，进程存活期间不会被移除
///
/// 用户只以 ID 弱引用，组信息由注册表解析；序号计数器随队列保存，跨重连不归零。
pub struct Subscriber {
    client_id: Arc<str>,
    user_id: Arc<str>,
    queue: ClientQueue,
}

impl Subscriber {
    pub(crate) fn new(client_id: Arc<str>, user_id: Arc<str>) -> Self {
        Self {
            client_id,
            user_id,
            queue: ClientQueue::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn queue(&self) -> &ClientQueue {
        &self.queue
    }

    /// 反复出队直到队列为空
    pub async fn drain_all(&self, serializer: &dyn EventSerializer, include_client_id: bool) {
        while self
            .queue
            .drain(&self.client_id, serializer, include_client_id)
            .await
        {}
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id)
            .field("last_seq", &self.queue.last_seq())
            .finish()
    }
}
