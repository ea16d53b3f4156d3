//! 规约（Specification）组合
//!
//! 订阅过滤器编译后即为一棵 `Specification<serde_json::Value>` 组合树，
//! 分发时对每个实体逐一求值。连续的 `&&` / `||` 会被拍平为一个多路节点。
//!
/// 规约：对候选对象做布尔判定，可在线程间共享
pub trait Specification<T>: Send + Sync {
    fn is_satisfied_by(&self, candidate: &T) -> bool;

    /// AND 组合
    fn and<S>(self, other: S) -> AllOf<T>
    where
        Self: Sized + 'static,
        S: Specification<T> + 'static,
    {
        AllOf::new(vec![Box::new(self), Box::new(other)])
    }

    /// OR 组合
    fn or<S>(self, other: S) -> AnyOf<T>
    where
        Self: Sized + 'static,
        S: Specification<T> + 'static,
    {
        AnyOf::new(vec![Box::new(self), Box::new(other)])
    }

    fn not(self) -> Not<T>
    where
        Self: Sized + 'static,
    {
        Not::new(Box::new(self))
    }
}

/// 类型擦除后的规约
pub type BoxSpecification<T> = Box<dyn Specification<T>>;

impl<T> Specification<T> for BoxSpecification<T> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.as_ref().is_satisfied_by(candidate)
    }
}

/// 全部满足（空列表恒为真）
pub struct AllOf<T> {
    parts: Vec<BoxSpecification<T>>,
}

impl<T> AllOf<T> {
    pub fn new(parts: Vec<BoxSpecification<T>>) -> Self {
        Self { parts }
    }

    pub fn push(&mut self, part: BoxSpecification<T>) {
        self.parts.push(part);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl<T> Specification<T> for AllOf<T> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.parts.iter().all(|part| part.is_satisfied_by(candidate))
    }
}

/// 任一满足（空列表恒为假）
pub struct AnyOf<T> {
    parts: Vec<BoxSpecification<T>>,
}

impl<T> AnyOf<T> {
    pub fn new(parts: Vec<BoxSpecification<T>>) -> Self {
        Self { parts }
    }

    pub fn push(&mut self, part: BoxSpecification<T>) {
        self.parts.push(part);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl<T> Specification<T> for AnyOf<T> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.parts.iter().any(|part| part.is_satisfied_by(candidate))
    }
}

pub struct Not<T> {
    inner: BoxSpecification<T>,
}

impl<T> Not<T> {
    pub fn new(inner: BoxSpecification<T>) -> Self {
        Self { inner }
    }
}

impl<T> Specification<T> for Not<T> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        !self.inner.is_satisfied_by(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    struct HasField(&'static str);
    impl Specification<Value> for HasField {
        fn is_satisfied_by(&self, candidate: &Value) -> bool {
            candidate.get(self.0).is_some()
        }
    }

    #[test]
    fn combinators_follow_boolean_logic() {
        // (a AND b) OR (NOT c)
        let spec = HasField("a").and(HasField("b")).or(HasField("c").not());
        assert!(spec.is_satisfied_by(&json!({"a": 1, "b": 1, "c": 1})));
        assert!(spec.is_satisfied_by(&json!({})));
        assert!(!spec.is_satisfied_by(&json!({"a": 1, "c": 1})));
    }

    #[test]
    fn multiway_nodes_grow_in_place() {
        let mut all: AllOf<Value> = AllOf::new(Vec::new());
        assert!(all.is_satisfied_by(&json!({})));
        all.push(Box::new(HasField("a")));
        all.push(Box::new(HasField("b")));
        all.push(Box::new(HasField("c")));
        assert_eq!(all.len(), 3);
        assert!(all.is_satisfied_by(&json!({"a": 1, "b": 2, "c": 3})));
        assert!(!all.is_satisfied_by(&json!({"a": 1, "b": 2})));

        let mut any: AnyOf<Value> = AnyOf::new(Vec::new());
        assert!(!any.is_satisfied_by(&json!({"a": 1})));
        any.push(Box::new(HasField("z")));
        assert!(any.is_satisfied_by(&json!({"z": null})));
    }
}
