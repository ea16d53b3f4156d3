pub mod client;
pub mod dispatcher;
pub mod queue;
pub mod receiver;
pub mod registry;
pub mod serializer;
pub mod subscriber;

pub use client::{EventClient, Subscription};
pub use dispatcher::EventDispatcher;
pub use queue::ClientQueue;
pub use receiver::EventReceiver;
pub use registry::{
    AuthDirectory, ChangeSubscriptionInfo, DatabaseSubscriptions, NoGroups, SubscriberInfo,
    SubscriberRegistry,
};
pub use serializer::{EventHeader, EventMessage, EventSerializer, JsonEventSerializer, SyncEvent};
pub use subscriber::Subscriber;
