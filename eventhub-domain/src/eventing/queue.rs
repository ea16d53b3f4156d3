//! 客户端投递队列（ClientQueue）
//!
//! 每个订阅者一个队列，自带锁，与注册表锁相互独立：
//! - `unsent`：已生成、尚未打包进线上消息的事件；
//! - `sent`：已打包但未确认的线上消息（仅持久订阅者保留），按序号升序；
//! - `resend_pending`：接收端变更后置位，下一次出队时先重发 `sent` 中的全部内容。
//!
//! 出队时先持有异步发送闸门，保证同一订阅者的线上消息按序号顺序交给传输层。
//!
use super::receiver::EventReceiver;
use super::serializer::{EventHeader, EventSerializer};
use crate::error::DispatchResult;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// 已生成、等待打包的事件
#[derive(Clone, Debug)]
struct QueuedEvent {
    seq: u64,
    database: Arc<str>,
    tasks: Bytes,
}

/// 已发送、等待确认的线上消息
#[derive(Clone, Debug)]
struct SentMessage {
    seq: u64,
    events: Vec<Bytes>,
}

enum Drained {
    Empty,
    Discarded(usize),
    Packaged {
        seq: u64,
        message: Bytes,
        receiver: Option<Arc<dyn EventReceiver>>,
    },
}

#[derive(Default)]
struct QueueState {
    receiver: Option<Arc<dyn EventReceiver>>,
    durable: bool,
    last_seq: u64,
    unsent: VecDeque<QueuedEvent>,
    sent: VecDeque<SentMessage>,
    resend_pending: bool,
}

impl QueueState {
    fn is_connected(&self) -> bool {
        self.receiver.as_ref().is_some_and(|r| r.is_open())
    }

    fn take_batch(
        &mut self,
        serializer: &dyn EventSerializer,
        client_id: Option<&str>,
    ) -> DispatchResult<Drained> {
        if self.resend_pending && self.sent.is_empty() {
            self.resend_pending = false;
        }
        if self.unsent.is_empty() && !self.resend_pending {
            return Ok(Drained::Empty);
        }

        let connected = self.is_connected();
        if !connected && !self.durable {
            let dropped = self.unsent.len();
            self.unsent.clear();
            self.sent.clear();
            self.resend_pending = false;
            return Ok(Drained::Discarded(dropped));
        }

        // 先编码再修改队列，编码失败时队列保持原状
        let mut events = Vec::new();
        let mut seq = 0;
        if self.resend_pending {
            for message in &self.sent {
                events.extend(message.events.iter().cloned());
                seq = message.seq;
            }
        }
        for event in &self.unsent {
            let header = EventHeader {
                seq: event.seq,
                database: &event.database,
                client_id,
            };
            events.push(serializer.write_event(&header, &event.tasks)?);
            seq = event.seq;
        }
        let message = serializer.write_message(seq, &events)?;

        self.unsent.clear();
        if self.resend_pending {
            self.sent.clear();
            self.resend_pending = false;
        }
        if self.durable {
            self.push_sent(SentMessage { seq, events });
        }

        Ok(Drained::Packaged {
            seq,
            message,
            receiver: if connected { self.receiver.clone() } else { None },
        })
    }

    fn push_sent(&mut self, message: SentMessage) {
        if let Some(last) = self.sent.back() {
            assert!(
                message.seq > last.seq,
                "sent queue must stay ordered: last={}, next={}",
                last.seq,
                message.seq
            );
        }
        self.sent.push_back(message);
    }
}

/// 客户端投递队列
#[derive(Default)]
pub struct ClientQueue {
    state: Mutex<QueueState>,
    send_gate: tokio::sync::Mutex<()>,
}

impl ClientQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个事件，返回分配给它的序号（从 1 开始，逐个递增）
    pub fn enqueue(&self, database: &Arc<str>, tasks: Bytes) -> u64 {
        let mut state = self.state.lock();
        state.last_seq += 1;
        let seq = state.last_seq;
        state.unsent.push_back(QueuedEvent {
            seq,
            database: database.clone(),
            tasks,
        });
        seq
    }

    /// 执行一个出队周期，返回是否打包了线上消息
    ///
    /// 未连接的非持久订阅者直接丢弃积压事件；持久订阅者即使未连接也会打包并保留在 `sent` 中，
    /// 等待重连后重发。传输失败只记录日志。
    pub async fn drain(
        &self,
        client_id: &str,
        serializer: &dyn EventSerializer,
        include_client_id: bool,
    ) -> bool {
        let _gate = self.send_gate.lock().await;

        let drained = {
            let mut state = self.state.lock();
            state.take_batch(serializer, include_client_id.then_some(client_id))
        };

        match drained {
            Ok(Drained::Empty) => false,
            Ok(Drained::Discarded(dropped)) => {
                if dropped > 0 {
                    debug!(client_id, dropped, "discarded events of disconnected client");
                }
                false
            }
            Ok(Drained::Packaged {
                seq,
                message,
                receiver,
            }) => {
                match receiver {
                    Some(receiver) => {
                        trace!(client_id, seq, bytes = message.len(), "sending event message");
                        if let Err(err) = receiver.send_event(message).await {
                            warn!(client_id, seq, error = %err, "failed to send event message");
                        }
                    }
                    None => trace!(client_id, seq, "client offline, event message retained"),
                }
                true
            }
            Err(err) => {
                error!(client_id, error = %err, "failed to serialize event message");
                false
            }
        }
    }

    /// 确认 `seq` 及之前的所有线上消息（前缀裁剪，幂等且单调）
    pub fn acknowledge(&self, seq: u64) {
        let mut state = self.state.lock();
        while state.sent.front().is_some_and(|m| m.seq <= seq) {
            state.sent.pop_front();
        }
    }

    /// 更新接收端；接收端确实发生变化时标记重发并返回 `true`
    pub fn set_receiver(&self, receiver: Arc<dyn EventReceiver>) -> bool {
        let mut state = self.state.lock();
        let changed = state
            .receiver
            .as_ref()
            .is_none_or(|current| !Arc::ptr_eq(current, &receiver));
        if changed {
            state.receiver = Some(receiver);
            state.resend_pending = true;
        }
        changed
    }

    /// 关闭持久投递时丢弃未确认的历史
    pub fn set_durable(&self, durable: bool) {
        let mut state = self.state.lock();
        state.durable = durable;
        if !durable {
            state.sent.clear();
            state.resend_pending = false;
        }
    }

    pub fn has_receiver(&self) -> bool {
        self.state.lock().receiver.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().is_connected()
    }

    pub fn is_durable(&self) -> bool {
        self.state.lock().durable
    }

    /// 能否接收新事件：已连接或为持久订阅者
    pub fn accepts_events(&self) -> bool {
        let state = self.state.lock();
        state.durable || state.is_connected()
    }

    /// 最近一次分配的事件序号
    pub fn last_seq(&self) -> u64 {
        self.state.lock().last_seq
    }

    pub fn unsent_len(&self) -> usize {
        self.state.lock().unsent.len()
    }

    /// 未确认线上消息的序号（升序）
    pub fn sent_seqs(&self) -> Vec<u64> {
        self.state.lock().sent.iter().map(|m| m.seq).collect()
    }
}
