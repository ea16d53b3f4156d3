//! 订阅者注册表（SubscriberRegistry）
//!
//! 单把注册表锁保护客户端表、用户表与全部订阅集的修改；每次修改后在锁内重建派生索引，
//! 并以 `ArcSwap` 原子替换发布。分发路径只读取索引快照，不持有注册表锁。
//!
//! 重建时内容相同的订阅集被折叠为同一个共享实例，分发时按实例缓存收窄与序列化结果。
//!
use super::client::EventClient;
use super::subscriber::Subscriber;
use crate::error::{DispatchError, DispatchResult};
use crate::subscription::SubscriptionSet;
use crate::task::ChangeMask;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// 用户组目录：按需提供用户当前所属的组
pub trait AuthDirectory: Send + Sync {
    fn groups(&self, user_id: &str) -> BTreeSet<String>;
}

/// 不提供任何组信息的目录
#[derive(Clone, Copy, Debug, Default)]
pub struct NoGroups;

impl AuthDirectory for NoGroups {
    fn groups(&self, _user_id: &str) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// 索引中的一项：订阅者 + 共享订阅集
#[derive(Clone, Debug)]
pub struct SubscriberEntry {
    subscriber: Arc<Subscriber>,
    groups: Arc<BTreeSet<String>>,
    subscriptions: Arc<SubscriptionSet>,
}

impl SubscriberEntry {
    pub fn subscriber(&self) -> &Arc<Subscriber> {
        &self.subscriber
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionSet> {
        &self.subscriptions
    }
}

/// 派生索引快照
#[derive(Debug, Default)]
pub struct RegistryIndex {
    by_database: HashMap<String, Vec<SubscriberEntry>>,
    sendable: Vec<Arc<Subscriber>>,
}

impl RegistryIndex {
    /// 某数据库上订阅集非空的订阅者
    pub fn subscribers(&self, database: &str) -> &[SubscriberEntry] {
        self.by_database
            .get(database)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 可投递的订阅者：已绑定接收端或为持久订阅者
    pub fn sendable(&self) -> &[Arc<Subscriber>] {
        &self.sendable
    }
}

/// 注册表修改结果
#[derive(Debug)]
pub struct ClientUpdate {
    pub subscriber: Arc<Subscriber>,
    /// 接收端发生变化，需要触发一次出队以重发未确认消息
    pub reconnected: bool,
}

struct ClientEntry {
    subscriber: Arc<Subscriber>,
    databases: BTreeMap<String, SubscriptionSet>,
}

struct User {
    groups: Arc<BTreeSet<String>>,
    clients: BTreeSet<Arc<str>>,
}

#[derive(Default)]
struct RegistryState {
    clients: HashMap<Arc<str>, ClientEntry>,
    users: HashMap<Arc<str>, User>,
    // 去重临时表，每次重建前清空
    dedup: HashSet<Arc<SubscriptionSet>>,
}

impl RegistryState {
    fn build_index(&mut self) -> RegistryIndex {
        let RegistryState {
            clients,
            users,
            dedup,
        } = self;
        dedup.clear();

        let mut by_database: HashMap<String, Vec<SubscriberEntry>> = HashMap::new();
        let mut sendable = Vec::new();

        for entry in clients.values() {
            let subscriber = &entry.subscriber;
            let queue = subscriber.queue();
            if queue.has_receiver() || queue.is_durable() {
                sendable.push(subscriber.clone());
            }

            let groups = users
                .get(subscriber.user_id())
                .map(|u| u.groups.clone())
                .unwrap_or_default();

            for (database, set) in &entry.databases {
                if set.is_empty() {
                    continue;
                }
                let shared = match dedup.get(set) {
                    Some(shared) => shared.clone(),
                    None => {
                        let shared = Arc::new(set.clone());
                        dedup.insert(shared.clone());
                        shared
                    }
                };
                by_database
                    .entry(database.clone())
                    .or_default()
                    .push(SubscriberEntry {
                        subscriber: subscriber.clone(),
                        groups: groups.clone(),
                        subscriptions: shared,
                    });
            }
        }

        RegistryIndex {
            by_database,
            sendable,
        }
    }
}

/// 订阅者注册表
pub struct SubscriberRegistry {
    state: Mutex<RegistryState>,
    index: ArcSwap<RegistryIndex>,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            index: ArcSwap::from_pointee(RegistryIndex::default()),
        }
    }

    /// 当前索引快照（无锁读取）
    pub fn snapshot(&self) -> Arc<RegistryIndex> {
        self.index.load_full()
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<Subscriber>> {
        self.state
            .lock()
            .clients
            .get(client_id)
            .map(|entry| entry.subscriber.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// 登记客户端（不修改订阅），更新接收端与持久投递设置
    pub fn register(
        &self,
        client: &EventClient,
        directory: &dyn AuthDirectory,
    ) -> DispatchResult<ClientUpdate> {
        self.update(client, directory, false, |_| {})
    }

    /// 修改客户端在某数据库上的订阅集
    ///
    /// 未提供接收端且注册表中也没有记录时拒绝，且不产生任何副作用。
    pub fn subscribe<F>(
        &self,
        database: &str,
        client: &EventClient,
        directory: &dyn AuthDirectory,
        apply: F,
    ) -> DispatchResult<ClientUpdate>
    where
        F: FnOnce(&mut SubscriptionSet),
    {
        self.update(client, directory, true, |databases| {
            apply(databases.entry(database.to_string()).or_default())
        })
    }

    /// 外部推送的用户组变更
    pub fn update_groups(&self, user_id: &str, groups: BTreeSet<String>) {
        let mut state = self.state.lock();
        let user = state
            .users
            .entry(Arc::from(user_id))
            .or_insert_with(|| User {
                groups: Arc::default(),
                clients: BTreeSet::new(),
            });
        user.groups = Arc::new(groups);
        self.publish(&mut state);
    }

    /// 订阅者状态报告
    pub fn info(&self, client_id: &str) -> Option<SubscriberInfo> {
        let state = self.state.lock();
        let entry = state.clients.get(client_id)?;
        let subscriber = &entry.subscriber;
        let queue = subscriber.queue();
        let groups = state
            .users
            .get(subscriber.user_id())
            .map(|u| u.groups.iter().cloned().collect())
            .unwrap_or_default();

        let databases = entry
            .databases
            .iter()
            .map(|(database, set)| DatabaseSubscriptions {
                database: database.clone(),
                changes: set
                    .change_subscriptions()
                    .iter()
                    .map(|sub| ChangeSubscriptionInfo {
                        container: sub.container().to_string(),
                        changes: sub.changes(),
                        filter: sub.filter_text().map(str::to_string),
                    })
                    .collect(),
                messages: set.message_subscriptions(),
                is_empty: set.is_empty(),
            })
            .collect();

        Some(SubscriberInfo {
            client_id: subscriber.client_id().to_string(),
            user_id: subscriber.user_id().to_string(),
            groups,
            last_seq: queue.last_seq(),
            unsent: queue.unsent_len(),
            unacknowledged: queue.sent_seqs(),
            durable: queue.is_durable(),
            connected: queue.is_connected(),
            databases,
        })
    }

    fn update<F>(
        &self,
        client: &EventClient,
        directory: &dyn AuthDirectory,
        require_receiver: bool,
        mutate: F,
    ) -> DispatchResult<ClientUpdate>
    where
        F: FnOnce(&mut BTreeMap<String, SubscriptionSet>),
    {
        let mut state = self.state.lock();

        // 先校验，校验失败时不修改任何状态
        let known_receiver = match state.clients.get(client.client_id()) {
            Some(entry) => {
                if entry.subscriber.user_id() != client.user_id() {
                    return Err(DispatchError::ClientUserMismatch {
                        client_id: client.client_id().to_string(),
                        user_id: client.user_id().to_string(),
                    });
                }
                entry.subscriber.queue().has_receiver()
            }
            None => false,
        };
        if require_receiver && client.receiver().is_none() && !known_receiver {
            return Err(DispatchError::MissingReceiver {
                client_id: client.client_id().to_string(),
            });
        }

        let update = {
            let RegistryState { clients, users, .. } = &mut *state;
            let client_id: Arc<str> = Arc::from(client.client_id());
            let entry = clients.entry(client_id.clone()).or_insert_with(|| {
                let user_id: Arc<str> = Arc::from(client.user_id());
                let user = users.entry(user_id.clone()).or_insert_with(|| User {
                    groups: Arc::new(directory.groups(&user_id)),
                    clients: BTreeSet::new(),
                });
                user.clients.insert(client_id.clone());
                debug!(client_id = %client_id, user_id = %user_id, "registered event subscriber");

                ClientEntry {
                    subscriber: Arc::new(Subscriber::new(client_id.clone(), user_id)),
                    databases: BTreeMap::new(),
                }
            });

            let queue = entry.subscriber.queue();
            let reconnected = client
                .receiver()
                .is_some_and(|receiver| queue.set_receiver(receiver.clone()));
            if let Some(durable) = client.durable() {
                queue.set_durable(durable);
            }
            mutate(&mut entry.databases);

            ClientUpdate {
                subscriber: entry.subscriber.clone(),
                reconnected,
            }
        };

        self.publish(&mut state);
        Ok(update)
    }

    fn publish(&self, state: &mut RegistryState) {
        let index = state.build_index();
        self.index.store(Arc::new(index));
    }
}

/// 订阅者状态报告
#[derive(Clone, Debug, Serialize)]
pub struct SubscriberInfo {
    pub client_id: String,
    pub user_id: String,
    pub groups: Vec<String>,
    pub last_seq: u64,
    pub unsent: usize,
    pub unacknowledged: Vec<u64>,
    pub durable: bool,
    pub connected: bool,
    pub databases: Vec<DatabaseSubscriptions>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatabaseSubscriptions {
    pub database: String,
    pub changes: Vec<ChangeSubscriptionInfo>,
    pub messages: Vec<String>,
    pub is_empty: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChangeSubscriptionInfo {
    pub container: String,
    pub changes: ChangeMask,
    pub filter: Option<String>,
}
