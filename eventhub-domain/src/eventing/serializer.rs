//! 事件序列化（EventSerializer）
//!
//! 三层结构：
//! - 任务负载：一个订阅集收窄后的任务列表，每个不同的负载只序列化一次；
//! - 事件信封：负载 + 订阅者序号 + 数据库名（可选携带目标客户端 ID）；
//! - 线上消息：一次出队周期内的全部事件信封，以最后一个事件的序号作为消息序号。
//!
//! 信封与消息只做字节拼接，共享负载不会被重复编码。
//!
use crate::error::DispatchResult;
use crate::task::SyncTask;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// 事件信封头
#[derive(Clone, Copy, Debug)]
pub struct EventHeader<'a> {
    pub seq: u64,
    pub database: &'a str,
    pub client_id: Option<&'a str>,
}

/// 事件序列化器
pub trait EventSerializer: Send + Sync {
    /// 序列化收窄后的任务列表（共享负载）
    fn write_tasks(&self, tasks: &[Cow<'_, SyncTask>]) -> DispatchResult<Bytes>;

    /// 为共享负载套上订阅者自己的信封
    fn write_event(&self, header: &EventHeader<'_>, tasks: &Bytes) -> DispatchResult<Bytes>;

    /// 将若干事件信封打包为一条线上消息
    fn write_message(&self, seq: u64, events: &[Bytes]) -> DispatchResult<Bytes>;
}

/// 线上消息（JSON 形态），客户端与测试据此解码
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub msg: String,
    pub seq: u64,
    #[serde(rename = "ev")]
    pub events: Vec<SyncEvent>,
}

/// 单个事件（JSON 形态）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub seq: u64,
    #[serde(rename = "db")]
    pub database: String,
    #[serde(rename = "clt", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub tasks: Vec<SyncTask>,
}

/// 基于 serde_json 的默认序列化器
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn write_tasks(&self, tasks: &[Cow<'_, SyncTask>]) -> DispatchResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(tasks)?))
    }

    fn write_event(&self, header: &EventHeader<'_>, tasks: &Bytes) -> DispatchResult<Bytes> {
        let mut buf = Vec::with_capacity(tasks.len() + 64);
        buf.extend_from_slice(b"{\"seq\":");
        buf.extend_from_slice(header.seq.to_string().as_bytes());
        buf.extend_from_slice(b",\"db\":");
        serde_json::to_writer(&mut buf, header.database)?;
        if let Some(client_id) = header.client_id {
            buf.extend_from_slice(b",\"clt\":");
            serde_json::to_writer(&mut buf, client_id)?;
        }
        buf.extend_from_slice(b",\"tasks\":");
        buf.extend_from_slice(tasks);
        buf.push(b'}');
        Ok(Bytes::from(buf))
    }

    fn write_message(&self, seq: u64, events: &[Bytes]) -> DispatchResult<Bytes> {
        let size = events.iter().map(Bytes::len).sum::<usize>() + events.len() + 32;
        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(b"{\"msg\":\"ev\",\"seq\":");
        buf.extend_from_slice(seq.to_string().as_bytes());
        buf.extend_from_slice(b",\"ev\":[");
        for (i, event) in events.iter().enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            buf.extend_from_slice(event);
        }
        buf.extend_from_slice(b"]}");
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_round_trips_through_typed_form() {
        let serializer = JsonEventSerializer;
        let tasks = vec![SyncTask::create("Item", vec![json!({"id": "1"})])];
        let borrowed: Vec<Cow<'_, SyncTask>> = tasks.iter().map(Cow::Borrowed).collect();
        let payload = serializer.write_tasks(&borrowed).unwrap();

        let first = serializer
            .write_event(
                &EventHeader {
                    seq: 1,
                    database: "main",
                    client_id: Some("c\"1"),
                },
                &payload,
            )
            .unwrap();
        let second = serializer
            .write_event(
                &EventHeader {
                    seq: 2,
                    database: "main",
                    client_id: None,
                },
                &payload,
            )
            .unwrap();
        let message = serializer.write_message(2, &[first, second]).unwrap();

        let decoded: EventMessage = serde_json::from_slice(&message).unwrap();
        assert_eq!(decoded.msg, "ev");
        assert_eq!(decoded.seq, 2);
        assert_eq!(decoded.events.len(), 2);
        assert_eq!(decoded.events[0].client_id.as_deref(), Some("c\"1"));
        assert_eq!(decoded.events[1].client_id, None);
        assert_eq!(decoded.events[1].tasks, tasks);
    }
}
