//! Cluster-aware publish/subscribe fabric: topic subscriptions with
//! refcounting and debounced adapter unsubscribe, plus the wire framing
//! used to move broadcasts across a cluster adapter.

pub mod adapter;
pub mod compress;
pub mod error;
pub mod framing;
pub mod pubsub;
pub mod subscription;

pub use adapter::{AdapterConfig, AdapterRegistry, LocalAdapter, DUMMY_ADAPTER_NAME};
pub use error::{PubSubError, PubSubResult};
pub use framing::{BroadcastOptions, DecodedFrame, NodeId, NODE_ID_LEN};
pub use pubsub::{direct_topic, PubSub};
pub use subscription::{Dispatcher, SubscriptionMap, TopicTransition};
