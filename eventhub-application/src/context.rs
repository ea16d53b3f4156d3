use eventhub_domain::eventing::EventClient;
use std::fmt;

/// 应用层上下文（Application Context）
///
/// 承载一次同步请求所需的横切信息：
/// - 发起请求的客户端身份与事件接收端（`EventClient`）；
/// - 关联追踪 `correlation_id`，用于日志 span。
///
/// 典型用法：
/// ```rust
/// use eventhub_application::context::AppContext;
/// use eventhub_domain::eventing::EventClient;
///
/// let ctx = AppContext {
///     client: EventClient::builder().client_id("c-1").user_id("u-1").build(),
///     correlation_id: Some("cor-123".into()),
/// };
/// assert_eq!(ctx.client.client_id(), "c-1");
/// ```
#[derive(Clone)]
pub struct AppContext {
    pub client: EventClient,
    pub correlation_id: Option<String>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("client_id", &self.client.client_id())
            .field("user_id", &self.client.user_id())
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}
