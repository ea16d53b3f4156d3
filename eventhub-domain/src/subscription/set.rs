use super::change::ChangeSubscription;
use crate::task::SyncTask;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// 消息名通配后缀：`Chat.*` 订阅所有以 `Chat.` 开头的消息
pub const WILDCARD: char = '*';

/// 某客户端在某数据库上的全部订阅
///
/// 相等性只比较消息名集合与变更订阅映射，与插入顺序无关；
/// 注册表据此在重建索引时让内容相同的订阅集共享同一实例。
#[derive(Clone, Debug)]
pub struct SubscriptionSet {
    exact_messages: BTreeSet<String>,
    prefix_messages: BTreeSet<String>,
    changes: BTreeMap<String, ChangeSubscription>,
    // 由 `changes` 派生的只读快照，分发时直接遍历
    change_list: Arc<[ChangeSubscription]>,
}

impl Default for SubscriptionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self {
            exact_messages: BTreeSet::new(),
            prefix_messages: BTreeSet::new(),
            changes: BTreeMap::new(),
            change_list: Arc::from(Vec::new()),
        }
    }

    /// 添加或替换容器上的变更订阅
    pub fn add_change_subscription(&mut self, sub: ChangeSubscription) {
        self.changes.insert(sub.container().to_string(), sub);
        self.rebuild_change_list();
    }

    pub fn remove_change_subscription(&mut self, container: &str) -> bool {
        let removed = self.changes.remove(container).is_some();
        if removed {
            self.rebuild_change_list();
        }
        removed
    }

    pub fn add_message_subscription(&mut self, name: &str) {
        match name.strip_suffix(WILDCARD) {
            Some(prefix) => self.prefix_messages.insert(prefix.to_string()),
            None => self.exact_messages.insert(name.to_string()),
        };
    }

    pub fn remove_message_subscription(&mut self, name: &str) -> bool {
        match name.strip_suffix(WILDCARD) {
            Some(prefix) => self.prefix_messages.remove(prefix),
            None => self.exact_messages.remove(name),
        }
    }

    pub fn matches_message(&self, name: &str) -> bool {
        self.exact_messages.contains(name)
            || self
                .prefix_messages
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// 仅用于状态上报，不会据此删除订阅者
    pub fn is_empty(&self) -> bool {
        self.exact_messages.is_empty() && self.prefix_messages.is_empty() && self.changes.is_empty()
    }

    pub fn change_subscriptions(&self) -> &[ChangeSubscription] {
        &self.change_list
    }

    pub fn change_subscription(&self, container: &str) -> Option<&ChangeSubscription> {
        self.changes.get(container)
    }

    /// 订阅的消息名（前缀订阅带通配后缀）
    pub fn message_subscriptions(&self) -> Vec<String> {
        self.exact_messages
            .iter()
            .cloned()
            .chain(self.prefix_messages.iter().map(|p| format!("{p}{WILDCARD}")))
            .collect()
    }

    /// 将一批任务收窄为本订阅集可见的候选任务
    ///
    /// 写操作按变更订阅过滤；消息/命令只按名称匹配，投递目标由调用方逐订阅者判断。
    pub fn narrow<'a, I>(&self, tasks: I) -> Vec<Cow<'a, SyncTask>>
    where
        I: IntoIterator<Item = &'a SyncTask>,
    {
        let mut narrowed = Vec::new();
        for task in tasks {
            if let Some((name, _)) = task.message_parts() {
                if self.matches_message(name) {
                    narrowed.push(Cow::Borrowed(task));
                }
                continue;
            }

            // 同一容器至多一个变更订阅
            if let Some(hit) = self.change_list.iter().find_map(|sub| sub.narrow(task)) {
                narrowed.push(hit);
            }
        }
        narrowed
    }

    fn rebuild_change_list(&mut self) {
        self.change_list = self.changes.values().cloned().collect();
    }
}

impl PartialEq for SubscriptionSet {
    fn eq(&self, other: &Self) -> bool {
        self.exact_messages == other.exact_messages
            && self.prefix_messages == other.prefix_messages
            && self.changes == other.changes
    }
}

impl Eq for SubscriptionSet {}

impl Hash for SubscriptionSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.exact_messages.hash(state);
        self.prefix_messages.hash(state);
        self.changes.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ChangeKind, ChangeMask};
    use serde_json::json;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(set: &SubscriptionSet) -> u64 {
        let mut hasher = DefaultHasher::new();
        set.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn wildcard_names_are_prefix_subscriptions() {
        let mut set = SubscriptionSet::new();
        set.add_message_subscription("Chat.*");
        set.add_message_subscription("Ping");

        assert!(set.matches_message("Chat.Join"));
        assert!(set.matches_message("Ping"));
        assert!(!set.matches_message("Ping2"));
        assert!(!set.matches_message("Admin.Reset"));
        assert_eq!(set.message_subscriptions(), vec!["Ping".to_string(), "Chat.*".to_string()]);

        assert!(set.remove_message_subscription("Chat.*"));
        assert!(!set.matches_message("Chat.Join"));
    }

    #[test]
    fn bare_wildcard_matches_every_message() {
        let mut set = SubscriptionSet::new();
        set.add_message_subscription("*");
        assert!(set.matches_message("anything"));
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let create = ChangeMask::empty().with(ChangeKind::Create);
        let mut a = SubscriptionSet::new();
        a.add_message_subscription("A");
        a.add_message_subscription("B.*");
        a.add_change_subscription(ChangeSubscription::new("Item", create, None));
        a.add_change_subscription(ChangeSubscription::new("Order", ChangeMask::all(), None));

        let mut b = SubscriptionSet::new();
        b.add_change_subscription(ChangeSubscription::new("Order", ChangeMask::all(), None));
        b.add_change_subscription(ChangeSubscription::new("Item", create, None));
        b.add_message_subscription("B.*");
        b.add_message_subscription("A");

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        b.remove_change_subscription("Order");
        assert_ne!(a, b);
    }

    #[test]
    fn change_list_tracks_the_map() {
        let mut set = SubscriptionSet::new();
        assert!(set.is_empty());

        set.add_change_subscription(ChangeSubscription::new("Item", ChangeMask::all(), None));
        set.add_change_subscription(ChangeSubscription::new(
            "Item",
            ChangeMask::empty().with(ChangeKind::Delete),
            None,
        ));
        assert_eq!(set.change_subscriptions().len(), 1);
        assert_eq!(
            set.change_subscriptions()[0].changes(),
            ChangeMask::empty().with(ChangeKind::Delete)
        );

        assert!(set.remove_change_subscription("Item"));
        assert!(set.change_subscriptions().is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn narrow_keeps_batch_order() {
        let mut set = SubscriptionSet::new();
        set.add_change_subscription(ChangeSubscription::new(
            "Item",
            ChangeMask::empty().with(ChangeKind::Create),
            None,
        ));
        set.add_message_subscription("Chat.*");

        let tasks = vec![
            SyncTask::message("Chat.Join", None),
            SyncTask::create("Item", vec![json!({"id": "1"})]),
            SyncTask::upsert("Item", vec![json!({"id": "2"})]),
            SyncTask::message("Admin.Reset", None),
        ];
        let narrowed = set.narrow(&tasks);
        assert_eq!(narrowed.len(), 2);
        assert_eq!(*narrowed[0], tasks[0]);
        assert_eq!(*narrowed[1], tasks[1]);
    }
}
