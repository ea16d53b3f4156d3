use async_trait::async_trait;
use bytes::Bytes;
use eventhub_application::context::AppContext;
use eventhub_application::request::SyncRequest;
use eventhub_application::{RequestHandler, SyncRequestHandler};
use eventhub_domain::config::{DeliveryMode, DispatcherConfig};
use eventhub_domain::eventing::{EventClient, EventDispatcher, EventReceiver};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 把线上消息打印到控制台的接收端
struct Console {
    name: &'static str,
}

#[async_trait]
impl EventReceiver for Console {
    fn is_open(&self) -> bool {
        true
    }

    async fn send_event(&self, message: Bytes) -> anyhow::Result<()> {
        println!("[{}] {}", self.name, String::from_utf8_lossy(&message));
        Ok(())
    }
}

fn context(client_id: &'static str, user_id: &str) -> AppContext {
    AppContext {
        client: EventClient::builder()
            .client_id(client_id)
            .user_id(user_id)
            .receiver(Arc::new(Console { name: client_id }) as Arc<dyn EventReceiver>)
            .durable(true)
            .build(),
        correlation_id: None,
    }
}

fn request(value: serde_json::Value) -> anyhow::Result<SyncRequest> {
    Ok(serde_json::from_value(value)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dispatcher = Arc::new(
        EventDispatcher::builder()
            .config(DispatcherConfig {
                mode: DeliveryMode::QueueSend,
                ..Default::default()
            })
            .build(),
    );
    dispatcher.start()?;
    let handler = SyncRequestHandler::new(dispatcher.clone());

    let alice = context("alice-phone", "alice");
    let bob = context("bob-laptop", "bob");

    handler
        .execute(
            &alice,
            request(json!({
                "db": "shop",
                "tasks": [
                    {"task": "subscribe_changes", "cont": "Order", "changes": ["create", "upsert"],
                     "filter": "o => o.total >= 100"},
                    {"task": "subscribe_message", "name": "Chat.*"}
                ]
            }))?,
        )
        .await?;
    handler
        .execute(
            &bob,
            request(json!({
                "db": "shop",
                "tasks": [{"task": "subscribe_message", "name": "*"}]
            }))?,
        )
        .await?;

    let response = handler
        .execute(
            &bob,
            request(json!({
                "db": "shop",
                "tasks": [
                    {"task": "create", "cont": "Order", "set": [
                        {"id": "o-1", "total": 250},
                        {"id": "o-2", "total": 20}
                    ]},
                    {"task": "msg", "name": "Chat.Join", "param": {"room": "lobby"}},
                    {"task": "cmd", "name": "Refresh", "targets": {"users": ["bob"]}}
                ]
            }))?,
        )
        .await?;
    info!(dispatched = response.dispatched, "write batch accepted");

    dispatcher.stop().await;
    if let Some(report) = dispatcher.subscriber_info("alice-phone") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
