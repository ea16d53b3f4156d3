use crate::context::AppContext;
use crate::dto::{SyncResponse, TaskResult};
use crate::error::AppError;
use crate::request::{RequestTask, SyncRequest};
use async_trait::async_trait;
use eventhub_domain::eventing::EventDispatcher;
use eventhub_domain::task::SyncTask;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span, warn};

#[async_trait]
pub trait RequestHandler<R: Send + 'static>: Send + Sync {
    type Output;

    async fn execute(&self, ctx: &AppContext, request: R) -> Result<Self::Output, AppError>;
}

/// 同步请求处理器
///
/// 依次处理事件确认、订阅任务，最后把被接受的写操作/消息一次性交给分发器。
/// 单个订阅任务失败只记录在对应的 `TaskResult` 中，不影响同一请求的其他任务。
#[derive(Clone)]
pub struct SyncRequestHandler {
    dispatcher: Arc<EventDispatcher>,
}

impl SyncRequestHandler {
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    async fn process(&self, ctx: &AppContext, request: SyncRequest) -> SyncResponse {
        let client_id = ctx.client.client_id();
        if let Some(seq) = request.event_ack {
            self.dispatcher.acknowledge(client_id, seq);
        }

        let mut results = Vec::with_capacity(request.tasks.len());
        let mut accepted: Vec<SyncTask> = Vec::new();
        for (index, task) in request.tasks.into_iter().enumerate() {
            match task {
                RequestTask::Subscribe(subscribe) => {
                    match self
                        .dispatcher
                        .subscribe(&request.database, &ctx.client, subscribe.into())
                        .await
                    {
                        Ok(()) => results.push(TaskResult::ok(index)),
                        Err(err) => {
                            warn!(error = %err, index, "subscription rejected");
                            results.push(TaskResult::failed(index, err));
                        }
                    }
                }
                RequestTask::Sync(task) => match validate(&task) {
                    Ok(()) => {
                        accepted.push(task);
                        results.push(TaskResult::ok(index));
                    }
                    Err(err) => results.push(TaskResult::failed(index, err)),
                },
            }
        }

        let dispatched = accepted.len();
        if !accepted.is_empty() {
            self.dispatcher
                .dispatch(&request.database, &accepted, Some(client_id))
                .await;
        }
        debug!(dispatched, tasks = results.len(), "sync request processed");

        SyncResponse {
            database: request.database,
            results,
            dispatched,
        }
    }
}

#[async_trait]
impl RequestHandler<SyncRequest> for SyncRequestHandler {
    type Output = SyncResponse;

    async fn execute(
        &self,
        ctx: &AppContext,
        request: SyncRequest,
    ) -> Result<SyncResponse, AppError> {
        if request.database.is_empty() {
            return Err(AppError::Validation("database name is empty".into()));
        }

        let span = info_span!(
            "sync_request",
            database = %request.database,
            client_id = ctx.client.client_id(),
            correlation_id = ctx.correlation_id.as_deref(),
        );
        Ok(self.process(ctx, request).instrument(span).await)
    }
}

fn validate(task: &SyncTask) -> Result<(), AppError> {
    match task {
        SyncTask::Message { name, .. } | SyncTask::Command { name, .. } if name.is_empty() => {
            Err(AppError::Validation("message name is empty".into()))
        }
        _ if task.container().is_some_and(str::is_empty) => {
            Err(AppError::Validation("container name is empty".into()))
        }
        _ => Ok(()),
    }
}
