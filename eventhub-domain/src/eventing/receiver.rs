//! 事件接收端（EventReceiver）协议
//!
//! 由传输层（WebSocket、HTTP 长轮询等）为每个客户端提供，
//! 分发器只负责把打包好的线上消息交给它。
//!
use async_trait::async_trait;
use bytes::Bytes;

/// 事件接收端：代表一个客户端的物理连接
#[async_trait]
pub trait EventReceiver: Send + Sync {
    /// 连接当前是否可用
    fn is_open(&self) -> bool;

    /// 发送一条线上消息；失败只会被记录，不会中断其他订阅者的投递
    async fn send_event(&self, message: Bytes) -> anyhow::Result<()>;
}
