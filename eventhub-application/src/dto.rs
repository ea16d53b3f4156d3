use serde::Serialize;

/// 数据传输对象（DTO）
///
/// - 作为应用层的输出载体，面向接口/外部系统序列化友好；
/// - 与领域模型解耦，避免将订阅集、队列等内部状态直接暴露到接口层。
pub trait Dto: Serialize + Send + Sync + 'static {}

/// 单个请求任务的处理结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn ok(index: usize) -> Self {
        Self { index, error: None }
    }

    pub fn failed(index: usize, error: impl ToString) -> Self {
        Self {
            index,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 同步请求的响应
#[derive(Clone, Debug, Serialize)]
pub struct SyncResponse {
    pub database: String,
    pub results: Vec<TaskResult>,
    /// 交给分发器的任务数
    pub dispatched: usize,
}

impl Dto for SyncResponse {}
