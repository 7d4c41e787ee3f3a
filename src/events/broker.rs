// ABOUTME: In-memory event broker implementing both the event bus and the correlator
// ABOUTME: Keeps the published event log in a watch channel so listeners can wait for matches

use async_trait::async_trait;
use futures::StreamExt;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cloud_event::CloudEvent;
use super::error::{EventError, Result};
use super::{
    CorrelationContext, EventAcknowledger, EventBus, EventCorrelator, EventStream, StreamedEvent,
};
use crate::parser::{EventConsumptionStrategy, ListenerDefinition};

#[derive(Debug, Clone, Default)]
struct BrokerState {
    events: Vec<CloudEvent>,
    closed: bool,
}

/// Every listener sees the full published log from the beginning.
pub struct MemoryEventBroker {
    state: watch::Sender<BrokerState>,
    acknowledged: Arc<Mutex<Vec<u64>>>,
}

struct BrokerAcknowledger {
    acknowledged: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl EventAcknowledger for BrokerAcknowledger {
    async fn acknowledge(&self, offset: u64) -> Result<()> {
        let mut acknowledged = self
            .acknowledged
            .lock()
            .map_err(|_| EventError::PublishFailed("acknowledgement log poisoned".to_string()))?;
        acknowledged.push(offset);
        Ok(())
    }
}

impl MemoryEventBroker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(BrokerState::default());
        Self {
            state,
            acknowledged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Ends every open stream once the already published events are delivered.
    pub fn close(&self) {
        self.state.send_modify(|state| state.closed = true);
    }

    pub fn published(&self) -> Vec<CloudEvent> {
        self.state.borrow().events.clone()
    }

    /// Offsets acknowledged by streaming listeners, in acknowledgement order.
    pub fn acknowledged(&self) -> Vec<u64> {
        self.acknowledged
            .lock()
            .map(|acknowledged| acknowledged.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryEventBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_any(event: &CloudEvent, filters: &[IndexMap<String, Value>]) -> bool {
    filters.is_empty() || filters.iter().any(|filter| event.matches(filter))
}

fn satisfy(strategy: &EventConsumptionStrategy, events: &[CloudEvent]) -> Option<Vec<CloudEvent>> {
    match strategy {
        EventConsumptionStrategy::One(filter) => events
            .iter()
            .find(|event| event.matches(&filter.with))
            .map(|event| vec![event.clone()]),
        EventConsumptionStrategy::Any(filters) => {
            let filters: Vec<_> = filters.iter().map(|filter| filter.with.clone()).collect();
            events
                .iter()
                .find(|event| matches_any(event, &filters))
                .map(|event| vec![event.clone()])
        }
        EventConsumptionStrategy::All(filters) => {
            let mut used = Vec::new();
            let mut matched = Vec::new();
            for filter in filters {
                let (index, event) = events
                    .iter()
                    .enumerate()
                    .find(|(index, event)| !used.contains(index) && event.matches(&filter.with))?;
                used.push(index);
                matched.push(event.clone());
            }
            Some(matched)
        }
    }
}

#[async_trait]
impl EventBus for MemoryEventBroker {
    async fn publish(&self, event: CloudEvent) -> Result<()> {
        let mut rejected = false;
        self.state.send_modify(|state| {
            if state.closed {
                rejected = true;
            } else {
                state.events.push(event.clone());
            }
        });
        if rejected {
            return Err(EventError::PublishFailed("broker is closed".to_string()));
        }
        debug!("Published event {} ({})", event.id, event.type_);
        Ok(())
    }
}

#[async_trait]
impl EventCorrelator for MemoryEventBroker {
    async fn correlate(
        &self,
        listener: &ListenerDefinition,
        cancellation: CancellationToken,
    ) -> Result<CorrelationContext> {
        let mut rx = self.state.subscribe();
        loop {
            {
                let state = rx.borrow_and_update();
                if let Some(events) = satisfy(&listener.to, &state.events) {
                    return Ok(CorrelationContext { events });
                }
                if state.closed {
                    return Err(EventError::Closed);
                }
            }

            tokio::select! {
                _ = cancellation.cancelled() => return Err(EventError::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(EventError::Closed);
                    }
                }
            }
        }
    }

    async fn stream(
        &self,
        listener: &ListenerDefinition,
        cancellation: CancellationToken,
    ) -> Result<EventStream> {
        let filters: Vec<IndexMap<String, Value>> = listener
            .to
            .filters()
            .into_iter()
            .map(|filter| filter.with.clone())
            .collect();
        let acknowledger: Arc<dyn EventAcknowledger> = Arc::new(BrokerAcknowledger {
            acknowledged: Arc::clone(&self.acknowledged),
        });
        let rx = self.state.subscribe();

        let stream = futures::stream::unfold(
            (rx, 0usize, 0u64),
            move |(mut rx, mut cursor, mut offset)| {
                let filters = filters.clone();
                let cancellation = cancellation.clone();
                let acknowledger = Arc::clone(&acknowledger);
                async move {
                    loop {
                        let (found, closed) = {
                            let state = rx.borrow_and_update();
                            let mut found = None;
                            while cursor < state.events.len() {
                                let event = &state.events[cursor];
                                cursor += 1;
                                if matches_any(event, &filters) {
                                    found = Some(event.clone());
                                    break;
                                }
                            }
                            (found, state.closed)
                        };

                        if let Some(event) = found {
                            offset += 1;
                            let streamed = StreamedEvent::new(event, offset, acknowledger);
                            return Some((Ok(streamed), (rx, cursor, offset)));
                        }
                        if closed {
                            return None;
                        }

                        tokio::select! {
                            _ = cancellation.cancelled() => return None,
                            changed = rx.changed() => {
                                if changed.is_err() {
                                    return None;
                                }
                            }
                        }
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}
