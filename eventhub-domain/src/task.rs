//! 同步任务模型（SyncTask）
//!
//! 一次同步请求中被存储层接受的写操作与消息/命令，以闭合的枚举表达：
//! - 写操作：`Create` / `Upsert` / `Delete` / `Merge`，携带实体（或补丁）的 JSON；
//! - 消息：`Message` / `Command`，携带名称、参数与可选的投递目标。
//!
//! 新增任务类型时，所有 `match` 都需要显式处理，避免遗漏订阅分支。
//!
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 实体变更类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Upsert,
    Delete,
    Merge,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 4] = [
        ChangeKind::Create,
        ChangeKind::Upsert,
        ChangeKind::Delete,
        ChangeKind::Merge,
    ];

    const fn bit(self) -> u8 {
        match self {
            ChangeKind::Create => 0b0001,
            ChangeKind::Upsert => 0b0010,
            ChangeKind::Delete => 0b0100,
            ChangeKind::Merge => 0b1000,
        }
    }
}

/// 变更类型位集
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<ChangeKind>", from = "Vec<ChangeKind>")]
pub struct ChangeMask(u8);

impl ChangeMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b1111)
    }

    pub fn with(self, kind: ChangeKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn contains(&self, kind: ChangeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn kinds(&self) -> impl Iterator<Item = ChangeKind> + '_ {
        ChangeKind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl FromIterator<ChangeKind> for ChangeMask {
    fn from_iter<I: IntoIterator<Item = ChangeKind>>(iter: I) -> Self {
        iter.into_iter().fold(ChangeMask::empty(), ChangeMask::with)
    }
}

impl From<Vec<ChangeKind>> for ChangeMask {
    fn from(kinds: Vec<ChangeKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<ChangeMask> for Vec<ChangeKind> {
    fn from(mask: ChangeMask) -> Self {
        mask.kinds().collect()
    }
}

impl fmt::Debug for ChangeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}

/// 消息/命令的投递目标
///
/// 任一列表被提供即视为“定向投递”；三个列表均缺省时广播。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl EventTargets {
    pub fn clients<I, S>(clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            clients: Some(clients.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: Some(users.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: Some(groups.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// 是否未提供任何目标列表
    pub fn is_broadcast(&self) -> bool {
        self.clients.is_none() && self.users.is_none() && self.groups.is_none()
    }
}

/// 一次同步请求中被接受的任务
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum SyncTask {
    Create {
        #[serde(rename = "cont")]
        container: String,
        #[serde(rename = "set")]
        entities: Vec<Value>,
    },
    Upsert {
        #[serde(rename = "cont")]
        container: String,
        #[serde(rename = "set")]
        entities: Vec<Value>,
    },
    /// 删除任务携带被删实体的键映像（至少包含主键字段），以便过滤器求值
    Delete {
        #[serde(rename = "cont")]
        container: String,
        #[serde(rename = "ids")]
        entities: Vec<Value>,
    },
    Merge {
        #[serde(rename = "cont")]
        container: String,
        patches: Vec<Value>,
    },
    #[serde(rename = "msg")]
    Message {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        param: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        targets: Option<EventTargets>,
    },
    #[serde(rename = "cmd")]
    Command {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        param: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        targets: Option<EventTargets>,
    },
}

impl SyncTask {
    pub fn create(container: impl Into<String>, entities: Vec<Value>) -> Self {
        SyncTask::Create {
            container: container.into(),
            entities,
        }
    }

    pub fn upsert(container: impl Into<String>, entities: Vec<Value>) -> Self {
        SyncTask::Upsert {
            container: container.into(),
            entities,
        }
    }

    pub fn delete(container: impl Into<String>, entities: Vec<Value>) -> Self {
        SyncTask::Delete {
            container: container.into(),
            entities,
        }
    }

    pub fn merge(container: impl Into<String>, patches: Vec<Value>) -> Self {
        SyncTask::Merge {
            container: container.into(),
            patches,
        }
    }

    pub fn message(name: impl Into<String>, param: Option<Value>) -> Self {
        SyncTask::Message {
            name: name.into(),
            param,
            targets: None,
        }
    }

    pub fn command(name: impl Into<String>, param: Option<Value>) -> Self {
        SyncTask::Command {
            name: name.into(),
            param,
            targets: None,
        }
    }

    /// 为消息/命令设置投递目标；写操作保持不变
    pub fn with_targets(mut self, new_targets: EventTargets) -> Self {
        match &mut self {
            SyncTask::Message { targets, .. } | SyncTask::Command { targets, .. } => {
                *targets = Some(new_targets);
            }
            SyncTask::Create { .. }
            | SyncTask::Upsert { .. }
            | SyncTask::Delete { .. }
            | SyncTask::Merge { .. } => {}
        }
        self
    }

    /// 写操作对应的变更类型；消息/命令返回 `None`
    pub fn change_kind(&self) -> Option<ChangeKind> {
        match self {
            SyncTask::Create { .. } => Some(ChangeKind::Create),
            SyncTask::Upsert { .. } => Some(ChangeKind::Upsert),
            SyncTask::Delete { .. } => Some(ChangeKind::Delete),
            SyncTask::Merge { .. } => Some(ChangeKind::Merge),
            SyncTask::Message { .. } | SyncTask::Command { .. } => None,
        }
    }

    pub fn container(&self) -> Option<&str> {
        match self {
            SyncTask::Create { container, .. }
            | SyncTask::Upsert { container, .. }
            | SyncTask::Delete { container, .. }
            | SyncTask::Merge { container, .. } => Some(container),
            SyncTask::Message { .. } | SyncTask::Command { .. } => None,
        }
    }

    /// 写操作携带的实体或补丁
    pub fn entities(&self) -> Option<&[Value]> {
        match self {
            SyncTask::Create { entities, .. }
            | SyncTask::Upsert { entities, .. }
            | SyncTask::Delete { entities, .. } => Some(entities),
            SyncTask::Merge { patches, .. } => Some(patches),
            SyncTask::Message { .. } | SyncTask::Command { .. } => None,
        }
    }

    /// 以给定实体集合构造同类型、同容器的写操作
    pub fn with_entities(&self, retained: Vec<Value>) -> Option<SyncTask> {
        let container = self.container()?.to_string();
        let task = match self {
            SyncTask::Create { .. } => SyncTask::Create {
                container,
                entities: retained,
            },
            SyncTask::Upsert { .. } => SyncTask::Upsert {
                container,
                entities: retained,
            },
            SyncTask::Delete { .. } => SyncTask::Delete {
                container,
                entities: retained,
            },
            SyncTask::Merge { .. } => SyncTask::Merge {
                container,
                patches: retained,
            },
            SyncTask::Message { .. } | SyncTask::Command { .. } => return None,
        };
        Some(task)
    }

    /// 消息/命令的名称与投递目标
    pub fn message_parts(&self) -> Option<(&str, Option<&EventTargets>)> {
        match self {
            SyncTask::Message { name, targets, .. } | SyncTask::Command { name, targets, .. } => {
                Some((name, targets.as_ref()))
            }
            SyncTask::Create { .. }
            | SyncTask::Upsert { .. }
            | SyncTask::Delete { .. }
            | SyncTask::Merge { .. } => None,
        }
    }

    /// 不产生任何事件的空写操作
    pub fn is_noop(&self) -> bool {
        self.entities().is_some_and(|e| e.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_mask_serializes_as_kind_list() {
        let mask: ChangeMask = [ChangeKind::Create, ChangeKind::Delete].into_iter().collect();
        assert!(mask.contains(ChangeKind::Create));
        assert!(!mask.contains(ChangeKind::Upsert));
        assert_eq!(serde_json::to_value(mask).unwrap(), json!(["create", "delete"]));

        let back: ChangeMask = serde_json::from_value(json!(["merge"])).unwrap();
        assert_eq!(back, ChangeMask::empty().with(ChangeKind::Merge));
    }

    #[test]
    fn task_wire_shape_uses_short_keys() {
        let task = SyncTask::create("Item", vec![json!({"id": "1"})]);
        assert_eq!(
            serde_json::to_value(&task).unwrap(),
            json!({"task": "create", "cont": "Item", "set": [{"id": "1"}]})
        );

        let msg = SyncTask::message("Chat.Join", None).with_targets(EventTargets::users(["u1"]));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"task": "msg", "name": "Chat.Join", "targets": {"users": ["u1"]}})
        );
    }

    #[test]
    fn empty_writes_are_noops() {
        assert!(SyncTask::upsert("Item", vec![]).is_noop());
        assert!(!SyncTask::upsert("Item", vec![json!({"id": "1"})]).is_noop());
        assert!(!SyncTask::message("Ping", None).is_noop());
    }
}
