use anyhow::Result as AnyResult;
use bytes::Bytes;
use eventhub_application::context::AppContext;
use eventhub_application::error::AppError;
use eventhub_application::request::SyncRequest;
use eventhub_application::{RequestHandler, SyncRequestHandler};
use eventhub_domain::config::{DeliveryMode, DispatcherConfig};
use eventhub_domain::eventing::{EventClient, EventDispatcher, EventMessage, EventReceiver};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Inbox {
    messages: Arc<Mutex<Vec<EventMessage>>>,
}
#[async_trait::async_trait]
impl EventReceiver for Inbox {
    fn is_open(&self) -> bool {
        true
    }
    async fn send_event(&self, message: Bytes) -> anyhow::Result<()> {
        let message: EventMessage = serde_json::from_slice(&message)?;
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

fn ctx(client_id: &str, user_id: &str, inbox: &Inbox) -> AppContext {
    AppContext {
        client: EventClient::builder()
            .client_id(client_id)
            .user_id(user_id)
            .receiver(Arc::new(inbox.clone()) as Arc<dyn EventReceiver>)
            .durable(true)
            .build(),
        correlation_id: Some(format!("cor-{client_id}")),
    }
}

fn request(value: serde_json::Value) -> SyncRequest {
    serde_json::from_value(value).expect("valid sync request")
}

fn handler(mode: DeliveryMode) -> SyncRequestHandler {
    let dispatcher = EventDispatcher::builder()
        .config(DispatcherConfig {
            mode,
            send_target_client_id: false,
        })
        .build();
    SyncRequestHandler::new(Arc::new(dispatcher))
}

#[tokio::test]
async fn subscribe_then_write_notifies_subscribers() -> AnyResult<()> {
    let handler = handler(DeliveryMode::Send);
    let (reader_inbox, writer_inbox) = (Inbox::default(), Inbox::default());
    let reader = ctx("reader", "u1", &reader_inbox);
    let writer = ctx("writer", "u2", &writer_inbox);

    let response = handler
        .execute(
            &reader,
            request(json!({
                "db": "main",
                "tasks": [
                    {"task": "subscribe_changes", "cont": "Item", "changes": ["create", "upsert"]},
                    {"task": "subscribe_message", "name": "Chat.*"}
                ]
            })),
        )
        .await?;
    assert!(response.results.iter().all(|r| r.is_ok()));
    assert_eq!(response.dispatched, 0);

    let response = handler
        .execute(
            &writer,
            request(json!({
                "db": "main",
                "tasks": [
                    {"task": "create", "cont": "Item", "set": [{"id": "1"}]},
                    {"task": "delete", "cont": "Item", "ids": [{"id": "0"}]},
                    {"task": "msg", "name": "Chat.Join"}
                ]
            })),
        )
        .await?;
    assert_eq!(response.dispatched, 3);

    let messages = reader_inbox.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    let tasks = serde_json::to_value(&messages[0].events[0].tasks)?;
    assert_eq!(
        tasks,
        json!([
            {"task": "create", "cont": "Item", "set": [{"id": "1"}]},
            {"task": "msg", "name": "Chat.Join"}
        ])
    );
    assert!(writer_inbox.messages.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_subscription_is_reported_per_task() -> AnyResult<()> {
    let handler = handler(DeliveryMode::Queue);
    let inbox = Inbox::default();
    let client = ctx("c1", "u1", &inbox);

    let response = handler
        .execute(
            &client,
            request(json!({
                "db": "main",
                "tasks": [
                    {"task": "subscribe_changes", "cont": "Item", "changes": ["create"], "filter": "o => (o.qty"},
                    {"task": "subscribe_message", "name": "Ping"},
                    {"task": "upsert", "cont": "", "set": [{"id": "1"}]}
                ]
            })),
        )
        .await?;

    assert_eq!(response.results.len(), 3);
    assert!(!response.results[0].is_ok());
    assert!(response.results[1].is_ok());
    assert!(!response.results[2].is_ok());
    assert_eq!(response.dispatched, 0);

    let info = handler.dispatcher().subscriber_info("c1").unwrap();
    assert!(info.databases[0].changes.is_empty());
    assert_eq!(info.databases[0].messages, vec!["Ping".to_string()]);
    Ok(())
}

#[tokio::test]
async fn event_ack_trims_unacknowledged_messages() -> AnyResult<()> {
    let handler = handler(DeliveryMode::Queue);
    let inbox = Inbox::default();
    let client = ctx("c1", "u1", &inbox);

    handler
        .execute(
            &client,
            request(json!({
                "db": "main",
                "tasks": [{"task": "subscribe_message", "name": "*"}]
            })),
        )
        .await?;
    for name in ["A", "B"] {
        handler
            .execute(
                &client,
                request(json!({"db": "main", "tasks": [{"task": "msg", "name": name}]})),
            )
            .await?;
        handler.dispatcher().flush_all().await?;
    }
    assert_eq!(
        handler.dispatcher().subscriber_info("c1").unwrap().unacknowledged,
        vec![1, 2]
    );

    handler
        .execute(
            &client,
            request(json!({"db": "main", "ev_ack": 2, "tasks": []})),
        )
        .await?;
    assert!(
        handler
            .dispatcher()
            .subscriber_info("c1")
            .unwrap()
            .unacknowledged
            .is_empty()
    );
    Ok(())
}

#[tokio::test]
async fn empty_database_name_is_rejected() {
    let handler = handler(DeliveryMode::Queue);
    let inbox = Inbox::default();
    let err = handler
        .execute(
            &ctx("c1", "u1", &inbox),
            request(json!({"db": "", "tasks": []})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
