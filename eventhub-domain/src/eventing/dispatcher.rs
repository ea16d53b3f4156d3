//! 事件分发器（EventDispatcher）
//!
//! 编排“订阅 → 生成 → 投递”：
//! - 订阅变更经注册表锁修改订阅集并重建共享索引；
//! - 每批被接受的任务按共享订阅集收窄，每个不同的结果只序列化一次；
//! - 按投递模式同步发送、等待外部 `flush_all`，或交给后台出队任务；
//! - 单个订阅者的失败只记录日志，不影响其他订阅者与原始写请求。
//!
use super::client::{EventClient, Subscription};
use super::registry::{AuthDirectory, NoGroups, RegistryIndex, SubscriberInfo, SubscriberRegistry};
use super::serializer::{EventSerializer, JsonEventSerializer};
use super::subscriber::Subscriber;
use crate::config::{DeliveryMode, DispatcherConfig};
use crate::error::{DispatchError, DispatchResult};
use crate::filter::{FilterCompiler, JsonFilterCompiler};
use crate::subscription::{ChangeSubscription, SubscriptionSet, accepts_target};
use crate::task::SyncTask;
use bon::Builder;
use bytes::Bytes;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// 后台出队任务的通知
enum Notification {
    Drain(Arc<Subscriber>),
    Stop,
}

/// 后台出队任务的通道与句柄
struct DrainLoop {
    tx: mpsc::UnboundedSender<Notification>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    /// `stop` 之后不再生成事件
    stopped: AtomicBool,
}

impl Default for DrainLoop {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handle: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }
}

/// 订阅变更在进入注册表锁之前完成校验与编译
enum SetChange {
    AddChanges(ChangeSubscription),
    RemoveChanges(String),
    AddMessage(String),
    RemoveMessage(String),
}

impl SetChange {
    fn apply(self, set: &mut SubscriptionSet) {
        match self {
            SetChange::AddChanges(sub) => set.add_change_subscription(sub),
            SetChange::RemoveChanges(container) => {
                set.remove_change_subscription(&container);
            }
            SetChange::AddMessage(name) => set.add_message_subscription(&name),
            SetChange::RemoveMessage(name) => {
                set.remove_message_subscription(&name);
            }
        }
    }
}

/// EventDispatcher：
/// - 维护订阅者注册表
/// - 将每批任务转换为各订阅者的有序事件流
#[derive(Builder)]
pub struct EventDispatcher {
    #[builder(default)]
    config: DispatcherConfig,
    #[builder(default = Arc::new(JsonEventSerializer) as Arc<dyn EventSerializer>)]
    serializer: Arc<dyn EventSerializer>,
    #[builder(default = Arc::new(JsonFilterCompiler) as Arc<dyn FilterCompiler>)]
    filter_compiler: Arc<dyn FilterCompiler>,
    #[builder(default = Arc::new(NoGroups) as Arc<dyn AuthDirectory>)]
    auth_directory: Arc<dyn AuthDirectory>,
    #[builder(skip)]
    registry: SubscriberRegistry,
    #[builder(skip)]
    drain_loop: DrainLoop,
}

impl EventDispatcher {
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn mode(&self) -> DeliveryMode {
        self.config.mode
    }

    /// 启动后台出队任务（仅 `QueueSend` 模式；其他模式为空操作）
    pub fn start(&self) -> DispatchResult<()> {
        if self.config.mode != DeliveryMode::QueueSend {
            return Ok(());
        }
        let Some(rx) = self.drain_loop.rx.lock().take() else {
            return Err(DispatchError::AlreadyStarted);
        };

        let serializer = self.serializer.clone();
        let include_client_id = self.config.send_target_client_id;
        let handle = tokio::spawn(Self::run_drain_loop(rx, serializer, include_client_id));
        *self.drain_loop.handle.lock() = Some(handle);
        info!("event drain loop started");
        Ok(())
    }

    /// 发送停止哨兵并等待后台任务结束；停止前已入队的通知都会被处理
    ///
    /// 停止后 `dispatch` 不再为任何订阅者生成事件，序号也不再前进。
    pub async fn stop(&self) {
        if self.config.mode != DeliveryMode::QueueSend {
            return;
        }
        let handle = self.drain_loop.handle.lock().take();
        let Some(handle) = handle else {
            return;
        };

        self.drain_loop.stopped.store(true, Ordering::SeqCst);
        if self.drain_loop.tx.send(Notification::Stop).is_err() {
            warn!("event drain loop already terminated");
        }
        if let Err(err) = handle.await {
            error!(error = %err, "event drain loop panicked");
        }
        info!("event drain loop stopped");
    }

    /// 修改客户端在某数据库上的订阅
    ///
    /// 过滤文本在修改任何状态前编译，非法文本直接返回错误。
    pub async fn subscribe(
        &self,
        database: &str,
        client: &EventClient,
        subscription: Subscription,
    ) -> DispatchResult<()> {
        let change = match subscription {
            Subscription::Changes {
                container, changes, ..
            } if changes.is_empty() => SetChange::RemoveChanges(container),
            Subscription::Changes {
                container,
                changes,
                filter,
            } => SetChange::AddChanges(ChangeSubscription::compile(
                container,
                changes,
                filter.as_deref(),
                self.filter_compiler.as_ref(),
            )?),
            Subscription::Message { name, remove: true } => SetChange::RemoveMessage(name),
            Subscription::Message {
                name,
                remove: false,
            } => SetChange::AddMessage(name),
        };

        let update = self.registry.subscribe(
            database,
            client,
            self.auth_directory.as_ref(),
            |set| change.apply(set),
        )?;
        debug!(database, client_id = client.client_id(), "subscription updated");

        if update.reconnected {
            self.notify(&update.subscriber).await;
        }
        Ok(())
    }

    /// 登记客户端而不修改订阅（如客户端重连后重新绑定接收端）
    pub async fn register_client(&self, client: &EventClient) -> DispatchResult<()> {
        let update = self
            .registry
            .register(client, self.auth_directory.as_ref())?;
        if update.reconnected {
            debug!(client_id = client.client_id(), "event receiver changed");
            self.notify(&update.subscriber).await;
        }
        Ok(())
    }

    /// 外部推送的用户组变更
    pub fn update_groups(&self, user_id: &str, groups: BTreeSet<String>) {
        self.registry.update_groups(user_id, groups);
    }

    /// 确认客户端已收到 `seq` 及之前的线上消息
    pub fn acknowledge(&self, client_id: &str, seq: u64) {
        match self.registry.get(client_id) {
            Some(subscriber) => subscriber.queue().acknowledge(seq),
            None => debug!(client_id, seq, "acknowledge from unknown client"),
        }
    }

    /// 分发一批已被接受的任务
    ///
    /// 客户端同样会收到自身写入产生的事件（除非其订阅集将其过滤掉）。
    pub async fn dispatch(&self, database: &str, tasks: &[SyncTask], origin: Option<&str>) {
        let accepted: Vec<&SyncTask> = tasks.iter().filter(|t| !t.is_noop()).collect();
        if accepted.is_empty() {
            return;
        }
        if self.is_stopped() {
            debug!(database, "event drain loop stopped, batch skipped");
            return;
        }

        let index = self.registry.snapshot();
        let affected = self.generate(&index, database, &accepted);
        trace!(
            database,
            origin,
            tasks = accepted.len(),
            subscribers = affected.len(),
            "events generated"
        );

        match self.config.mode {
            DeliveryMode::Send => {
                for subscriber in &affected {
                    self.drain(subscriber).await;
                }
            }
            DeliveryMode::QueueSend => {
                for subscriber in affected {
                    self.enqueue_drain(subscriber);
                }
            }
            DeliveryMode::Queue => {}
        }
    }

    /// 出队全部可投递订阅者（仅 `Queue` 模式）
    pub async fn flush_all(&self) -> DispatchResult<()> {
        if self.config.mode != DeliveryMode::Queue {
            return Err(DispatchError::InvalidMode {
                operation: "flush_all",
                mode: self.config.mode,
            });
        }

        let index = self.registry.snapshot();
        for subscriber in index.sendable() {
            self.drain(subscriber).await;
        }
        Ok(())
    }

    pub fn subscriber_info(&self, client_id: &str) -> Option<SubscriberInfo> {
        self.registry.info(client_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count()
    }

    pub fn database_subscriber_count(&self, database: &str) -> usize {
        self.registry.snapshot().subscribers(database).len()
    }

    /// 生成事件并压入各订阅者队列，返回受影响的订阅者
    fn generate(
        &self,
        index: &RegistryIndex,
        database: &str,
        accepted: &[&SyncTask],
    ) -> Vec<Arc<Subscriber>> {
        let entries = index.subscribers(database);
        if entries.is_empty() {
            return Vec::new();
        }

        let database: Arc<str> = Arc::from(database);
        // 按共享订阅集实例缓存收窄结果；按（实例, 目标选择）缓存序列化结果
        let mut narrowed: HashMap<*const SubscriptionSet, Vec<Cow<'_, SyncTask>>> = HashMap::new();
        let mut payloads: HashMap<(*const SubscriptionSet, Vec<bool>), Option<Bytes>> =
            HashMap::new();
        let mut affected = Vec::new();

        for entry in entries {
            let subscriber = entry.subscriber();
            if !subscriber.queue().accepts_events() {
                continue;
            }

            let key = Arc::as_ptr(entry.subscriptions());
            let candidates = narrowed
                .entry(key)
                .or_insert_with(|| entry.subscriptions().narrow(accepted.iter().copied()));
            if candidates.is_empty() {
                continue;
            }

            let selection: Vec<bool> = candidates
                .iter()
                .map(|task| match task.message_parts() {
                    Some((_, targets)) => accepts_target(
                        targets,
                        subscriber.client_id(),
                        subscriber.user_id(),
                        entry.groups(),
                    ),
                    None => true,
                })
                .collect();
            if !selection.contains(&true) {
                continue;
            }

            let payload = match payloads.entry((key, selection)) {
                Entry::Occupied(cached) => cached.get().clone(),
                Entry::Vacant(vacant) => {
                    let selected: Vec<Cow<'_, SyncTask>> = candidates
                        .iter()
                        .zip(vacant.key().1.iter())
                        .filter(|(_, keep)| **keep)
                        .map(|(task, _)| Cow::Borrowed(&**task))
                        .collect();
                    let bytes = match self.serializer.write_tasks(&selected) {
                        Ok(bytes) => Some(bytes),
                        Err(err) => {
                            error!(database = %database, error = %err, "failed to serialize event tasks");
                            None
                        }
                    };
                    vacant.insert(bytes).clone()
                }
            };
            let Some(payload) = payload else {
                continue;
            };

            let seq = subscriber.queue().enqueue(&database, payload);
            trace!(client_id = subscriber.client_id(), seq, "event queued");
            affected.push(subscriber.clone());
        }

        affected
    }

    fn is_stopped(&self) -> bool {
        self.drain_loop.stopped.load(Ordering::SeqCst)
    }

    async fn notify(&self, subscriber: &Arc<Subscriber>) {
        match self.config.mode {
            DeliveryMode::Send => self.drain(subscriber).await,
            DeliveryMode::QueueSend => self.enqueue_drain(subscriber.clone()),
            DeliveryMode::Queue => {}
        }
    }

    async fn drain(&self, subscriber: &Subscriber) {
        subscriber
            .drain_all(self.serializer.as_ref(), self.config.send_target_client_id)
            .await;
    }

    fn enqueue_drain(&self, subscriber: Arc<Subscriber>) {
        if self.is_stopped() {
            return;
        }
        if self
            .drain_loop
            .tx
            .send(Notification::Drain(subscriber))
            .is_err()
        {
            warn!("event drain loop is not running");
        }
    }

    async fn run_drain_loop(
        mut rx: mpsc::UnboundedReceiver<Notification>,
        serializer: Arc<dyn EventSerializer>,
        include_client_id: bool,
    ) {
        while let Some(notification) = rx.recv().await {
            match notification {
                Notification::Drain(subscriber) => {
                    subscriber
                        .drain_all(serializer.as_ref(), include_client_id)
                        .await;
                }
                Notification::Stop => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::receiver::EventReceiver;
    use crate::eventing::serializer::EventMessage;
    use crate::task::{ChangeKind, ChangeMask};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tracing_test::traced_test;

    struct Recorder {
        fail: AtomicBool,
        raw: std::sync::Mutex<Vec<Bytes>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                raw: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn messages(&self) -> Vec<EventMessage> {
            self.raw
                .lock()
                .unwrap()
                .iter()
                .map(|m| serde_json::from_slice(m).unwrap())
                .collect()
        }

        fn tasks_json(&self) -> Vec<Value> {
            self.messages()
                .into_iter()
                .flat_map(|m| m.events)
                .flat_map(|e| e.tasks)
                .map(|t| serde_json::to_value(t).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl EventReceiver for Recorder {
        fn is_open(&self) -> bool {
            true
        }

        async fn send_event(&self, message: Bytes) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("broken pipe");
            }
            self.raw.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn dispatcher(mode: DeliveryMode) -> EventDispatcher {
        EventDispatcher::builder()
            .config(DispatcherConfig {
                mode,
                send_target_client_id: false,
            })
            .build()
    }

    fn client(client_id: &str, user_id: &str, receiver: &Arc<Recorder>) -> EventClient {
        EventClient::builder()
            .client_id(client_id)
            .user_id(user_id)
            .receiver(receiver.clone() as Arc<dyn EventReceiver>)
            .build()
    }

    fn creates() -> ChangeMask {
        ChangeMask::empty().with(ChangeKind::Create)
    }

    #[tokio::test]
    async fn send_mode_delivers_inline() {
        let d = dispatcher(DeliveryMode::Send);
        let r = Recorder::new();
        d.subscribe("main", &client("c1", "u1", &r), Subscription::changes("Item", creates()))
            .await
            .unwrap();

        d.dispatch(
            "main",
            &[
                SyncTask::create("Item", vec![json!({"id": "1"})]),
                SyncTask::upsert("Item", vec![json!({"id": "2"})]),
            ],
            Some("c2"),
        )
        .await;

        let messages = r.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].seq, 1);
        assert_eq!(messages[0].events[0].client_id, None);
        assert_eq!(
            r.tasks_json(),
            vec![json!({"task": "create", "cont": "Item", "set": [{"id": "1"}]})]
        );
        assert_eq!(d.subscriber_info("c1").unwrap().last_seq, 1);
    }

    #[tokio::test]
    async fn queue_mode_waits_for_flush() {
        let d = dispatcher(DeliveryMode::Queue);
        let r = Recorder::new();
        d.subscribe("main", &client("c1", "u1", &r), Subscription::message("Chat.*"))
            .await
            .unwrap();

        d.dispatch("main", &[SyncTask::message("Chat.Join", None)], None)
            .await;
        assert!(r.messages().is_empty());
        assert_eq!(d.subscriber_info("c1").unwrap().unsent, 1);

        d.flush_all().await.unwrap();
        assert_eq!(r.messages().len(), 1);
        assert_eq!(d.subscriber_info("c1").unwrap().unsent, 0);
    }

    #[tokio::test]
    async fn mode_specific_operations_are_checked() {
        let d = dispatcher(DeliveryMode::QueueSend);
        let err = d.flush_all().await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidMode {
                operation: "flush_all",
                mode: DeliveryMode::QueueSend
            }
        ));

        d.start().unwrap();
        assert!(matches!(d.start(), Err(DispatchError::AlreadyStarted)));
        d.stop().await;

        // 非 QueueSend 模式下 start/stop 为空操作
        let queued = dispatcher(DeliveryMode::Queue);
        queued.start().unwrap();
        queued.start().unwrap();
        queued.stop().await;
    }

    #[tokio::test]
    async fn equal_subscription_sets_receive_identical_payloads() {
        let d = dispatcher(DeliveryMode::Queue);
        let (r1, r2) = (Recorder::new(), Recorder::new());
        for (id, r) in [("c1", &r1), ("c2", &r2)] {
            d.subscribe(
                "main",
                &client(id, id, r),
                Subscription::filtered_changes("Item", ChangeMask::all(), "o => o.qty > 1"),
            )
            .await
            .unwrap();
        }

        d.dispatch(
            "main",
            &[SyncTask::upsert(
                "Item",
                vec![json!({"id": "a", "qty": 5}), json!({"id": "b", "qty": 0})],
            )],
            None,
        )
        .await;
        d.flush_all().await.unwrap();

        assert_eq!(r1.raw.lock().unwrap().clone(), r2.raw.lock().unwrap().clone());
        assert_eq!(
            r1.tasks_json(),
            vec![json!({"task": "upsert", "cont": "Item", "set": [{"id": "a", "qty": 5}]})]
        );
    }

    #[tokio::test]
    async fn invalid_filter_leaves_subscriptions_untouched() {
        let d = dispatcher(DeliveryMode::Queue);
        let r = Recorder::new();
        let c1 = client("c1", "u1", &r);
        d.subscribe("main", &c1, Subscription::changes("Item", creates()))
            .await
            .unwrap();

        let err = d
            .subscribe(
                "main",
                &c1,
                Subscription::filtered_changes("Item", ChangeMask::all(), "o => o.qty >"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidFilter { .. }));

        let info = d.subscriber_info("c1").unwrap();
        let changes = &info.databases[0].changes;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].changes, creates());
        assert_eq!(changes[0].filter, None);
    }

    #[tokio::test]
    async fn empty_change_mask_removes_the_subscription() {
        let d = dispatcher(DeliveryMode::Queue);
        let r = Recorder::new();
        let c1 = client("c1", "u1", &r);
        d.subscribe("main", &c1, Subscription::changes("Item", creates()))
            .await
            .unwrap();
        assert_eq!(d.database_subscriber_count("main"), 1);

        d.subscribe("main", &c1, Subscription::changes("Item", ChangeMask::empty()))
            .await
            .unwrap();
        assert_eq!(d.database_subscriber_count("main"), 0);
        assert_eq!(d.subscriber_count(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn failing_receiver_does_not_block_others() {
        let d = dispatcher(DeliveryMode::Send);
        let (broken, healthy) = (Recorder::new(), Recorder::new());
        broken.fail.store(true, Ordering::SeqCst);
        for (id, r) in [("c1", &broken), ("c2", &healthy)] {
            d.subscribe("main", &client(id, id, r), Subscription::message("Ping"))
                .await
                .unwrap();
        }

        d.dispatch("main", &[SyncTask::message("Ping", None)], None)
            .await;

        assert!(broken.messages().is_empty());
        assert_eq!(healthy.messages().len(), 1);
        assert!(logs_contain("broken pipe"));
    }

    #[tokio::test]
    async fn acknowledge_from_unknown_client_is_ignored() {
        let d = dispatcher(DeliveryMode::Queue);
        d.acknowledge("nobody", 3);
        assert_eq!(d.subscriber_count(), 0);
    }
}
