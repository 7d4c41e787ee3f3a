// ABOUTME: Event module with the bus and correlation contracts consumed by emit and listen
// ABOUTME: Exports the CloudEvent model and an in-memory broker implementing both contracts

pub mod broker;
pub mod cloud_event;
pub mod error;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::parser::ListenerDefinition;

pub use broker::MemoryEventBroker;
pub use cloud_event::CloudEvent;
pub use error::{EventError, Result};

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: CloudEvent) -> Result<()>;
}

/// Events that satisfied a single-shot listener, in filter order.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    pub events: Vec<CloudEvent>,
}

#[async_trait]
pub trait EventAcknowledger: Send + Sync {
    async fn acknowledge(&self, offset: u64) -> Result<()>;
}

/// One event delivered to a streaming listener.
pub struct StreamedEvent {
    pub event: CloudEvent,
    /// 1-based position in the listener's stream
    pub offset: u64,
    acknowledger: Arc<dyn EventAcknowledger>,
}

impl StreamedEvent {
    pub fn new(event: CloudEvent, offset: u64, acknowledger: Arc<dyn EventAcknowledger>) -> Self {
        Self {
            event,
            offset,
            acknowledger,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acknowledger.acknowledge(self.offset).await
    }
}

pub type EventStream = BoxStream<'static, Result<StreamedEvent>>;

#[async_trait]
pub trait EventCorrelator: Send + Sync {
    /// Waits until the listener's consumption strategy is satisfied.
    async fn correlate(
        &self,
        listener: &ListenerDefinition,
        cancellation: CancellationToken,
    ) -> Result<CorrelationContext>;

    /// Live stream of matching events; ends when the source closes or the token is cancelled.
    async fn stream(
        &self,
        listener: &ListenerDefinition,
        cancellation: CancellationToken,
    ) -> Result<EventStream>;
}
