use crate::error::DispatchResult;
use crate::filter::{CompiledFilter, FilterCompiler};
use crate::task::{ChangeMask, SyncTask};
use serde_json::Value;
use std::borrow::Cow;
use std::hash::{Hash, Hasher};

/// 单个容器的变更订阅（不可变值）
///
/// 同一客户端在同一容器上重新订阅时整体替换，从不原地修改。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSubscription {
    container: String,
    changes: ChangeMask,
    filter: Option<CompiledFilter>,
}

impl ChangeSubscription {
    pub fn new(
        container: impl Into<String>,
        changes: ChangeMask,
        filter: Option<CompiledFilter>,
    ) -> Self {
        Self {
            container: container.into(),
            changes,
            filter,
        }
    }

    /// 订阅时编译过滤文本，非法文本立即返回错误
    pub fn compile(
        container: impl Into<String>,
        changes: ChangeMask,
        filter_text: Option<&str>,
        compiler: &dyn FilterCompiler,
    ) -> DispatchResult<Self> {
        let filter = filter_text.map(|text| compiler.compile(text)).transpose()?;
        Ok(Self::new(container, changes, filter))
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn changes(&self) -> ChangeMask {
        self.changes
    }

    pub fn filter(&self) -> Option<&CompiledFilter> {
        self.filter.as_ref()
    }

    /// 规范化过滤文本
    pub fn filter_text(&self) -> Option<&str> {
        self.filter.as_ref().map(CompiledFilter::text)
    }

    /// 将写操作收窄为本订阅可见的部分
    ///
    /// - 变更类型或容器不匹配时返回 `None`；
    /// - 无过滤器或全部实体命中时借用原任务，不做拷贝；
    /// - 过滤后没有剩余实体时返回 `None`。
    pub fn narrow<'a>(&self, task: &'a SyncTask) -> Option<Cow<'a, SyncTask>> {
        let kind = task.change_kind()?;
        if !self.changes.contains(kind) || task.container() != Some(self.container.as_str()) {
            return None;
        }

        let Some(filter) = &self.filter else {
            return Some(Cow::Borrowed(task));
        };

        let entities = task.entities()?;
        let retained: Vec<Value> = entities
            .iter()
            .filter(|entity| filter.evaluate(entity))
            .cloned()
            .collect();

        if retained.is_empty() {
            None
        } else if retained.len() == entities.len() {
            Some(Cow::Borrowed(task))
        } else {
            task.with_entities(retained).map(Cow::Owned)
        }
    }

    pub fn matches(&self, task: &SyncTask) -> bool {
        self.narrow(task).is_some()
    }
}

impl Hash for ChangeSubscription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.container.hash(state);
        self.changes.hash(state);
        self.filter_text().hash(state);
    }
}
