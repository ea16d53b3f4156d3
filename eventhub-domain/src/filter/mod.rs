//! 订阅过滤器（Filter）
//!
//! 过滤器求值是外部能力：本模块只定义编译接口 `FilterCompiler` 与
//! 编译产物 `CompiledFilter`。过滤文本在订阅时编译一次，分发时只做求值。
//!
//! 默认实现 `JsonFilterCompiler` 提供一个面向 JSON 实体的小型表达式语言，
//! 编译结果为 `Specification<Value>` 组合树。
//!
mod expr;

pub use expr::JsonFilterCompiler;

use crate::error::DispatchResult;
use crate::specification::Specification;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// 过滤器编译器：将过滤文本编译为可重复求值的过滤器
pub trait FilterCompiler: Send + Sync {
    /// 编译失败必须返回 `DispatchError::InvalidFilter`
    fn compile(&self, text: &str) -> DispatchResult<CompiledFilter>;
}

/// 已编译的过滤器
///
/// `text` 为规范化文本，相等性与去重只依赖它。
#[derive(Clone)]
pub struct CompiledFilter {
    text: Arc<str>,
    spec: Arc<dyn Specification<Value>>,
}

impl CompiledFilter {
    pub fn new(text: impl Into<Arc<str>>, spec: Arc<dyn Specification<Value>>) -> Self {
        Self {
            text: text.into(),
            spec,
        }
    }

    /// 规范化后的过滤文本
    pub fn text(&self) -> &str {
        &self.text
    }

    /// 对单个实体求值
    pub fn evaluate(&self, entity: &Value) -> bool {
        self.spec.is_satisfied_by(entity)
    }
}

impl PartialEq for CompiledFilter {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for CompiledFilter {}

impl fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledFilter").field(&self.text).finish()
    }
}
